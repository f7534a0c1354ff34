#![allow(dead_code)]

use news_pipeline::PipelineConfig;
use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// RSS 2.0 document with one `<item>` per `(title, link, description)`.
pub fn rss_feed(channel: &str, items: &[(&str, &str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, link, description)| {
            format!(
                "<item><title>{}</title><link>{}</link><description><![CDATA[{}]]></description>\
                 <pubDate>Tue, 14 May 2024 08:30:00 -0600</pubDate></item>",
                title, link, description
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>{}</title><link>https://news.example.com</link>
<description>Test feed</description>{}</channel></rss>"#,
        channel, items
    )
}

/// Short delays so retry tests finish quickly.
pub fn test_config(feeds: Vec<String>) -> PipelineConfig {
    PipelineConfig {
        timeout: Duration::from_millis(500),
        max_retries: 3,
        retry_delay: Duration::from_millis(200),
        polling_interval: Duration::from_secs(60),
        drain_timeout: Duration::from_secs(5),
        ..PipelineConfig::default()
    }
    .with_feeds(feeds)
}
