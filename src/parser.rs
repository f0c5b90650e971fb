use std::collections::HashSet;

use chrono::Utc;
use feed_rs::parser;
use tracing::debug;

use crate::types::{BotError, FeedItem, Result};

/// Turns raw feed content into normalized [`FeedItem`]s with stable ids.
/// One instance per poll cycle; the seen-set dedups within a single parse run.
pub struct FeedParser {
    seen_ids: HashSet<String>,
}

impl FeedParser {
    pub fn new() -> Self {
        Self {
            seen_ids: HashSet::new(),
        }
    }

    pub fn parse_feed(&mut self, feed_url: &str, content: &str) -> Result<Vec<FeedItem>> {
        let feed = parser::parse(content.as_bytes())
            .map_err(|e| BotError::Parse(format!("failed to parse feed {feed_url}: {e}")))?;

        let mut items = Vec::new();
        for entry in feed.entries {
            if let Some(item) = self.parse_entry(feed_url, entry) {
                items.push(item);
            }
        }

        debug!(%feed_url, items = items.len(), "parsed feed");
        Ok(items)
    }

    fn parse_entry(&mut self, feed_url: &str, entry: feed_rs::model::Entry) -> Option<FeedItem> {
        let link = entry.links.first()?.href.clone();

        let guid = if entry.id.is_empty() {
            None
        } else {
            Some(entry.id.clone())
        };

        let id = stable_item_id(feed_url, guid.as_deref(), &link);
        if !self.seen_ids.insert(id.clone()) {
            debug!(%id, "skipping duplicate entry");
            return None;
        }

        // Entries without any date cannot be compared against the fetch
        // window, so they are dropped rather than guessed at.
        let published_at = match entry.published.or(entry.updated) {
            Some(dt) => dt.with_timezone(&Utc),
            None => {
                debug!(%link, "skipping undated entry");
                return None;
            }
        };

        let title = entry
            .title
            .map(|t| t.content)
            .unwrap_or_else(|| "Untitled".to_string());

        let raw_summary = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
            .unwrap_or_default();
        let summary = sanitize_text(&raw_summary);

        let image = entry
            .media
            .first()
            .and_then(|m| m.content.first())
            .and_then(|c| c.url.as_ref())
            .map(|u| u.to_string())
            .or_else(|| {
                entry
                    .content
                    .as_ref()
                    .and_then(|c| c.body.as_deref())
                    .and_then(extract_image)
            });

        let categories = entry
            .categories
            .into_iter()
            .map(|c| c.term)
            .filter(|t| !t.is_empty())
            .collect();

        // Feeds routed through link shorteners put the short URL in the
        // entry id; keep it alongside the canonical link.
        let short_link = guid.filter(|g| g.starts_with("http"));

        Some(FeedItem {
            id,
            feed_url: feed_url.to_string(),
            title: unescape_entities(&title),
            summary,
            link,
            short_link,
            categories,
            image,
            published_at,
        })
    }
}

impl Default for FeedParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable dedup key: same article, same key, across fetches and restarts.
pub fn stable_item_id(feed_url: &str, guid: Option<&str>, link: &str) -> String {
    match guid {
        Some(g) if !g.is_empty() => format!("{feed_url}#{g}"),
        _ => format!("{feed_url}#{link}"),
    }
}

/// Strip HTML tags, unescape common entities, cut at the first newline and
/// collapse runs of whitespace.
pub fn sanitize_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    let text = unescape_entities(&text);
    let text = text.split('\n').next().unwrap_or("");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn unescape_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

/// First `<img src="...">` URL in an HTML snippet, if any.
fn extract_image(html: &str) -> Option<String> {
    let img_at = html.find("<img")?;
    let rest = &html[img_at..];
    let src_at = rest.find("src=\"")?;
    let after = &rest[src_at + 5..];
    let end = after.find('"')?;
    let url = &after[..end];
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}
