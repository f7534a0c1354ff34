/// Feed-related helpers shared by the fetcher, coordinator and analyzers

/// URL utilities for feed sources
pub mod url {
    use url::Url;

    /// Extract domain from URL
    pub fn extract_domain(url_str: &str) -> Option<String> {
        if let Ok(url) = Url::parse(url_str) {
            url.domain().map(|d| d.to_string())
        } else {
            None
        }
    }

    /// Validate feed URL format
    pub fn is_valid_rss_url(url_str: &str) -> bool {
        if let Ok(url) = Url::parse(url_str) {
            url.scheme() == "http" || url.scheme() == "https"
        } else {
            false
        }
    }

    /// Short label for log lines: the domain when there is one, else the raw URL
    pub fn source_label(url_str: &str) -> String {
        extract_domain(url_str).unwrap_or_else(|| url_str.to_string())
    }
}

/// Time utilities for polling
pub mod time {
    use std::time::Duration;

    /// Format duration in human-readable form
    pub fn format_duration(duration: Duration) -> String {
        let total_seconds = duration.as_secs();

        if total_seconds == 0 {
            format!("{}ms", duration.as_millis())
        } else if total_seconds < 60 {
            format!("{}s", total_seconds)
        } else if total_seconds < 3600 {
            format!("{}m", total_seconds / 60)
        } else if total_seconds < 86400 {
            format!("{}h", total_seconds / 3600)
        } else {
            format!("{}d", total_seconds / 86400)
        }
    }
}

/// Feed content utilities
pub mod feed {
    use html2text::render::text_renderer::TrivialDecorator;

    /// Wide enough that html2text never wraps a description.
    const RENDER_WIDTH: usize = 10_000;

    /// Plain text of an HTML fragment: markup dropped, entities decoded, whitespace
    /// collapsed to single spaces.
    pub fn extract_text_from_html(html: &str) -> String {
        html2text::from_read_with_decorator(html.as_bytes(), RENDER_WIDTH, TrivialDecorator::new())
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}
