use crate::rss_utils::url::is_valid_rss_url;
use crate::types::{FeedEntry, ParsedFeed, PipelineError, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use tracing::{debug, warn};

/// Zoned formats tried when a feed carries a date the RFC parsers reject.
const ZONED_TIMESTAMP_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%d %b %Y %H:%M:%S %z",
];

/// Formats without an offset; interpreted as UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

type DateCandidate = (&'static str, fn(&Entry) -> Option<DateTime<Utc>>);
type TextCandidate = (&'static str, fn(&Entry) -> Option<String>);

/// Date fields in priority order. RSS `pubDate` and Atom `published` both land in
/// `published`; the timestamp parser has already turned the raw text into a value.
const DATE_CANDIDATES: &[DateCandidate] = &[("published", published), ("updated", updated)];

/// Article URL in priority order: an explicit link, then an RSS `<guid>` that is
/// itself a web address. feed-rs invents hash ids for items without a guid, so
/// only http(s) ids count.
const URL_CANDIDATES: &[TextCandidate] = &[("link", first_link), ("guid", permalink_guid)];

/// Body fields in priority order. RSS `description` and Atom `summary` both land in
/// `summary`.
const DESCRIPTION_CANDIDATES: &[TextCandidate] = &[("summary", summary), ("content", content_blocks)];

pub struct FeedParser;

impl FeedParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_feed(&self, content: &[u8], source_url: &str) -> Result<ParsedFeed> {
        debug!("Parsing feed content from {} ({} bytes)", source_url, content.len());

        let feed = parser::Builder::new()
            .timestamp_parser(parse_timestamp)
            .build()
            .parse(content)
            .map_err(|e| PipelineError::Parse(format!("Failed to parse feed {}: {}", source_url, e)))?;

        let source_name = feed
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| source_url.to_string());

        let mut entries = Vec::with_capacity(feed.entries.len());
        let mut dropped = 0;

        for entry in &feed.entries {
            match self.parse_entry(entry, &source_name) {
                Ok(parsed) => entries.push(parsed),
                Err(reason) => {
                    dropped += 1;
                    warn!(source = %source_name, entry_id = %entry.id, "Dropping feed entry: {}", reason);
                }
            }
        }

        debug!("Parsed {} entries from {} ({} dropped)", entries.len(), source_name, dropped);

        Ok(ParsedFeed {
            source_name,
            entries,
            dropped,
        })
    }

    fn parse_entry(&self, entry: &Entry, source_name: &str) -> std::result::Result<FeedEntry, &'static str> {
        let url = first_text(entry, URL_CANDIDATES).ok_or("missing url")?;

        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or("missing title")?;

        let description = first_text(entry, DESCRIPTION_CANDIDATES).ok_or("missing description")?;

        let published_date = first_date(entry, DATE_CANDIDATES)
            .map(|ts| ts.date_naive())
            .unwrap_or_else(|| Local::now().date_naive());

        Ok(FeedEntry {
            source_name: source_name.to_string(),
            title,
            description,
            url,
            published_date,
        })
    }
}

impl Default for FeedParser {
    fn default() -> Self {
        Self::new()
    }
}

fn first_date(entry: &Entry, candidates: &[DateCandidate]) -> Option<DateTime<Utc>> {
    candidates.iter().find_map(|(field, extract)| {
        let value = extract(entry);
        if value.is_some() {
            debug!("Resolved date from `{}`", field);
        }
        value
    })
}

fn first_text(entry: &Entry, candidates: &[TextCandidate]) -> Option<String> {
    candidates
        .iter()
        .find_map(|(_, extract)| extract(entry).filter(|text| !text.trim().is_empty()))
}

fn first_link(entry: &Entry) -> Option<String> {
    entry
        .links
        .iter()
        .map(|link| link.href.trim())
        .find(|href| !href.is_empty())
        .map(str::to_string)
}

fn permalink_guid(entry: &Entry) -> Option<String> {
    let id = entry.id.trim();
    if is_valid_rss_url(id) {
        Some(id.to_string())
    } else {
        None
    }
}

fn published(entry: &Entry) -> Option<DateTime<Utc>> {
    entry.published
}

fn updated(entry: &Entry) -> Option<DateTime<Utc>> {
    entry.updated
}

fn summary(entry: &Entry) -> Option<String> {
    entry.summary.as_ref().map(|text| text.content.clone())
}

/// The entry body and any media descriptions, concatenated in document order.
fn content_blocks(entry: &Entry) -> Option<String> {
    let blocks = entry
        .content
        .iter()
        .filter_map(|content| content.body.as_deref())
        .chain(
            entry
                .media
                .iter()
                .filter_map(|media| media.description.as_ref())
                .map(|text| text.content.as_str()),
        );

    let joined: String = blocks.collect();
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// Timestamp parser handed to feed-rs. Returns `None` when nothing matches so the
/// entry falls through to the next date candidate.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc2822(text) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ZONED_TIMESTAMP_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(text, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for format in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ts.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}
