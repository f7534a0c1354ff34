use crate::traits::{ArticleStore, InsertOutcome};
use crate::types::{EnrichedArticle, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Pool, Postgres, Row};
use std::collections::HashSet;
use tracing::{debug, info};

/// PostgreSQL + PostGIS storage for enriched articles. `url` is unique, which is
/// what makes repeated inserts harmless.
pub struct PgArticleStore {
    db: Pool<Postgres>,
}

impl PgArticleStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let db = PgPool::connect(database_url).await?;
        Ok(Self { db })
    }

    pub fn from_pool(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn setup_schema(&self) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS postgis")
            .execute(&self.db)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS news (
                id SERIAL PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                coordinates GEOGRAPHY(POINT, 4326) NOT NULL,
                type VARCHAR(32) NOT NULL,
                location TEXT,
                date DATE NOT NULL,
                url TEXT NOT NULL UNIQUE,
                news_source TEXT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS news_date_idx ON news (date)")
            .execute(&self.db)
            .await?;

        Ok(())
    }

    pub async fn count_articles(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM news")
            .fetch_one(&self.db)
            .await?;
        Ok(row.try_get("count")?)
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[async_trait]
impl ArticleStore for PgArticleStore {
    async fn load_known_urls(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT url FROM news").fetch_all(&self.db).await?;

        let mut urls = HashSet::with_capacity(rows.len());
        for row in rows {
            urls.insert(row.try_get::<String, _>("url")?);
        }

        info!("Loaded {} known article URLs", urls.len());
        Ok(urls)
    }

    async fn insert_article(&self, article: &EnrichedArticle) -> Result<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO news (title, description, coordinates, type, location, date, url, news_source)
            VALUES ($1, $2, ST_SetSRID(ST_MakePoint($3, $4), 4326)::geography, $5, $6, $7, $8, $9)
            ON CONFLICT (url) DO NOTHING
            "#,
        )
        .bind(&article.entry.title)
        .bind(&article.entry.description)
        .bind(article.coordinates.longitude)
        .bind(article.coordinates.latitude)
        .bind(article.category.as_str())
        .bind(&article.location)
        .bind(article.entry.published_date)
        .bind(&article.entry.url)
        .bind(&article.entry.source_name)
        .execute(&self.db)
        .await?;

        if result.rows_affected() > 0 {
            debug!("Stored article {}", article.entry.url);
            Ok(InsertOutcome::Inserted)
        } else {
            debug!("Article already stored: {}", article.entry.url);
            Ok(InsertOutcome::Duplicate)
        }
    }
}
