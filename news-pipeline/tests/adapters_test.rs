mod common;

use common::init_tracing;
use news_pipeline::testing::sample_entry;
use news_pipeline::{
    ArticleAnalyzer, ArticleStore, Category, ChatCompletionModel, Classification, Coordinates, EnrichedArticle,
    Geocoder, InsertOutcome, LlmAnalyzer, LocationExtraction, MapboxGeocoder, PgArticleStore,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "cmpl-1",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
    }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chat_model_classifies_through_completion_endpoint() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer secret"))
        .and(body_string_contains("Answer with the category name only"))
        .respond_with(completion(" Crime\n"))
        .expect(1)
        .mount(&server)
        .await;

    let model = ChatCompletionModel::new(&format!("{}/v1/", server.uri()), "secret", "llama3").unwrap();
    let analyzer = LlmAnalyzer::new(model, 2, Category::ALL.to_vec());

    let answer = analyzer
        .classify("Detienen a ladrón", "<p>Robo en Zapopan</p>")
        .await
        .unwrap();
    assert_eq!(answer, Classification::Category(Category::Crime));
    server.verify().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chat_model_signals_map_to_discard_and_no_location() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Answer with the category name only"))
        .respond_with(completion("DISCARD"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Answer with the place name only"))
        .respond_with(completion("NO_LOCATION"))
        .mount(&server)
        .await;

    let model = ChatCompletionModel::new(&server.uri(), "", "llama3").unwrap();
    let analyzer = LlmAnalyzer::new(model, 1, Category::ALL.to_vec());

    assert_eq!(
        analyzer.classify("Gol de último minuto", "<p>Futbol</p>").await.unwrap(),
        Classification::Discard
    );
    assert_eq!(
        analyzer.extract_location("Gol de último minuto", "<p>Futbol</p>").await.unwrap(),
        LocationExtraction::NoLocation
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chat_model_server_error_is_an_error() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let model = ChatCompletionModel::new(&server.uri(), "", "llama3").unwrap();
    let analyzer = LlmAnalyzer::new(model, 1, Category::ALL.to_vec());

    assert!(analyzer.extract_location("t", "d").await.is_err());
}

#[tokio::test]
async fn mapbox_returns_center_of_best_match() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/geocoding/v5/mapbox\.places/.+\.json$"))
        .and(query_param("access_token", "tok"))
        .and(query_param("limit", "1"))
        .and(query_param("country", "mx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "FeatureCollection",
            "features": [{
                "place_name": "Guadalajara, Jalisco, México",
                "center": [-103.3496, 20.6597]
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let geocoder = MapboxGeocoder::with_base_url(&server.uri(), "tok", "MX").unwrap();
    let coordinates = geocoder.geocode("Guadalajara, Mexico").await.unwrap();

    assert_eq!(
        coordinates,
        Some(Coordinates {
            longitude: -103.3496,
            latitude: 20.6597
        })
    );
}

#[tokio::test]
async fn mapbox_without_features_is_not_found() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "type": "FeatureCollection", "features": [] })))
        .mount(&server)
        .await;

    let geocoder = MapboxGeocoder::with_base_url(&server.uri(), "tok", "mx").unwrap();
    assert_eq!(geocoder.geocode("Atlantis, Mexico").await.unwrap(), None);
}

#[tokio::test]
async fn mapbox_rejected_request_is_an_error() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let geocoder = MapboxGeocoder::with_base_url(&server.uri(), "bad", "mx").unwrap();
    assert!(geocoder.geocode("Guadalajara, Mexico").await.is_err());
}

#[tokio::test]
#[ignore = "requires a PostgreSQL database with PostGIS (DATABASE_URL)"]
async fn postgres_store_round_trip() {
    init_tracing();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgArticleStore::new(&database_url).await.unwrap();
    store.setup_schema().await.unwrap();

    let url = format!("https://news.example.com/{}", uuid::Uuid::new_v4());
    let article = EnrichedArticle {
        entry: sample_entry(&url, "Choque múltiple"),
        category: Category::Infrastructure,
        location: "Monterrey, Mexico".to_string(),
        coordinates: Coordinates {
            longitude: -100.31,
            latitude: 25.67,
        },
    };

    let before = store.count_articles().await.unwrap();
    assert_eq!(store.insert_article(&article).await.unwrap(), InsertOutcome::Inserted);
    assert_eq!(store.insert_article(&article).await.unwrap(), InsertOutcome::Duplicate);
    assert_eq!(store.count_articles().await.unwrap(), before + 1);
    assert!(store.load_known_urls().await.unwrap().contains(&url));

    store.close().await;
}
