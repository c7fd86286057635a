use crate::types::{AggregatorError, RawArticle, Result};
use chrono::{DateTime, Utc};
use feed_rs::parser;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<RawArticle>,
    /// Entries dropped for having no link or repeating an earlier URL
    pub skipped: usize,
}

/// Turns RSS/Atom markup into normalized `RawArticle`s.
pub struct FeedParser;

impl FeedParser {
    /// `fetched_at` stands in for the publication time of undated entries.
    pub fn parse_feed(content: &str, fetched_at: DateTime<Utc>) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| AggregatorError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);

        let mut seen_urls = HashSet::new();
        let mut entries = Vec::new();
        let mut skipped = 0;

        for entry in feed.entries {
            match Self::parse_entry(entry, fetched_at) {
                Some(article) if seen_urls.insert(article.url.clone()) => entries.push(article),
                Some(article) => {
                    debug!("Skipping duplicate entry with URL: {}", article.url);
                    skipped += 1;
                }
                None => skipped += 1,
            }
        }

        info!("Parsed feed with {} entries ({} skipped)", entries.len(), skipped);

        Ok(ParsedFeed {
            title,
            entries,
            skipped,
        })
    }

    fn parse_entry(entry: feed_rs::model::Entry, fetched_at: DateTime<Utc>) -> Option<RawArticle> {
        let headline = entry
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        let url = match entry.links.first() {
            Some(link) if !link.href.trim().is_empty() => link.href.trim().to_string(),
            _ => {
                debug!("Skipping entry without URL: {}", headline);
                return None;
            }
        };

        let dated_at = entry.published.or(entry.updated).map(|dt| dt.with_timezone(&Utc));
        let dated = dated_at.is_some();
        let published_at = dated_at.unwrap_or(fetched_at);

        // Prefer the short summary; fall back to the full content body
        let summary_content = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Some(RawArticle {
            url,
            headline,
            published_at,
            summary_content,
            dated,
        })
    }
}
