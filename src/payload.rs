use url::Url;

use crate::types::{FeedItem, PlatformKind};

/// Rendered, platform-ready message for one (item, destination) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub text: String,
    /// Article link attached out-of-band (Bluesky embed, LinkedIn media).
    pub link: Option<String>,
    pub link_title: Option<String>,
    pub link_description: Option<String>,
}

/// Hard per-platform message limits, in characters.
pub fn char_limit(kind: PlatformKind) -> usize {
    match kind {
        PlatformKind::Telegram => 4096,
        PlatformKind::Bluesky => 300,
        PlatformKind::Linkedin => 3000,
    }
}

const MAX_HASHTAGS: usize = 5;

/// Build the outgoing payload for one platform, attaching the augmented
/// comment when available and truncating to the platform limit.
pub fn render(item: &FeedItem, comment: Option<&str>, kind: PlatformKind) -> Payload {
    let link = best_link(item);
    let body = comment.unwrap_or(item.summary.as_str());

    match kind {
        // Telegram carries the link inline in the message text.
        PlatformKind::Telegram => {
            let text = format!("{}\n{}\n{}", item.title, body, link);
            Payload {
                text: truncate_chars(&text, char_limit(kind)),
                link: None,
                link_title: None,
                link_description: None,
            }
        }
        // Bluesky gets a short post plus an external-link embed.
        PlatformKind::Bluesky => {
            let text = if body.is_empty() {
                item.title.clone()
            } else {
                format!("{}\n\n{}", item.title, body)
            };
            Payload {
                text: truncate_chars(&text, char_limit(kind)),
                link: Some(link.to_string()),
                link_title: Some(item.title.clone()),
                link_description: Some(item.summary.clone()),
            }
        }
        // LinkedIn commentary is the comment (or summary) plus hashtags;
        // the article rides along as an ARTICLE share.
        PlatformKind::Linkedin => {
            let tags = hashtags(&item.categories, MAX_HASHTAGS);
            let text = if tags.is_empty() {
                body.to_string()
            } else {
                format!("{}\n\n{}", body, tags.join(" "))
            };
            Payload {
                text: truncate_chars(&text, char_limit(kind)),
                link: Some(link.to_string()),
                link_title: Some(item.title.clone()),
                link_description: None,
            }
        }
    }
}

/// Prefer the entry's short link when it is a usable http(s) URL.
pub fn best_link(item: &FeedItem) -> &str {
    match &item.short_link {
        Some(short) if is_valid_url(short) => short,
        _ => &item.link,
    }
}

pub fn is_valid_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Truncate on a character boundary, appending an ellipsis when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = text.chars().take(keep).collect();
    out.push('…');
    out
}

/// Turn feed categories into hashtags: lowercase, spaces removed, entries
/// with more than three words or apostrophes dropped, deduplicated, capped.
pub fn hashtags(categories: &[String], max_tags: usize) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for category in categories {
        if category.split_whitespace().count() > 3 {
            continue;
        }
        let cleaned: String = category
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        if cleaned.is_empty() || cleaned.contains('\'') {
            continue;
        }
        let tag = format!("#{cleaned}");
        if !tags.contains(&tag) {
            tags.push(tag);
        }
        if tags.len() == max_tags {
            break;
        }
    }
    tags
}
