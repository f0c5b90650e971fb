#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use socialbot::augment::{CommentConstraints, Commentator};
use socialbot::mute::MuteWindow;
use socialbot::payload::Payload;
use socialbot::platforms::{PlatformError, Publisher};
use socialbot::types::{BotError, Credentials, Destination, FeedItem, PlatformKind};
use socialbot::{FeedCacheHeaders, FeedSource, FetchOutcome};

pub fn item(n: u32) -> FeedItem {
    item_published_at(n, Utc::now())
}

pub fn item_published_at(n: u32, published_at: DateTime<Utc>) -> FeedItem {
    FeedItem {
        id: format!("https://example.com/feed#item-{n}"),
        feed_url: "https://example.com/feed".to_string(),
        title: format!("Item {n}"),
        summary: format!("Summary of item {n}."),
        link: format!("https://example.com/{n}"),
        short_link: None,
        categories: vec!["News".to_string()],
        image: None,
        published_at,
    }
}

pub fn destination(name: &str, mute_eligible: bool, mute_window: Option<MuteWindow>) -> Arc<Destination> {
    Arc::new(Destination {
        name: name.to_string(),
        credentials: Credentials::Telegram {
            token: "test-token".to_string(),
            chat_id: "1".to_string(),
        },
        mute_eligible,
        mute_window,
    })
}

/// Scripted publisher: pops programmed responses, then keeps succeeding.
/// Every accepted payload is captured for assertions.
pub struct MockPublisher {
    kind: PlatformKind,
    responses: Mutex<VecDeque<Result<String, PlatformError>>>,
    default_error: Option<PlatformError>,
    calls: Mutex<Vec<Payload>>,
}

impl MockPublisher {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            kind: PlatformKind::Telegram,
            responses: Mutex::new(VecDeque::new()),
            default_error: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn scripted(responses: Vec<Result<String, PlatformError>>) -> Arc<Self> {
        Arc::new(Self {
            kind: PlatformKind::Telegram,
            responses: Mutex::new(responses.into()),
            default_error: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn always_failing(error: PlatformError) -> Arc<Self> {
        Arc::new(Self {
            kind: PlatformKind::Telegram,
            responses: Mutex::new(VecDeque::new()),
            default_error: Some(error),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn payloads(&self) -> Vec<Payload> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn kind(&self) -> PlatformKind {
        self.kind
    }

    async fn publish(&self, payload: &Payload) -> Result<String, PlatformError> {
        self.calls.lock().unwrap().push(payload.clone());
        if let Some(response) = self.responses.lock().unwrap().pop_front() {
            return response;
        }
        if let Some(error) = &self.default_error {
            return Err(error.clone());
        }
        let n = self.calls.lock().unwrap().len();
        Ok(format!("post-{n}"))
    }
}

/// Commentator that always answers with a fixed comment, or always fails.
pub struct MockCommentator {
    pub response: Result<String, String>,
}

impl MockCommentator {
    pub fn ok(comment: &str) -> (Arc<dyn Commentator>, CommentConstraints) {
        (
            Arc::new(Self {
                response: Ok(comment.to_string()),
            }),
            CommentConstraints {
                max_chars: 160,
                language: "en".to_string(),
            },
        )
    }

    pub fn failing() -> (Arc<dyn Commentator>, CommentConstraints) {
        (
            Arc::new(Self {
                response: Err("model unavailable".to_string()),
            }),
            CommentConstraints {
                max_chars: 160,
                language: "en".to_string(),
            },
        )
    }
}

#[async_trait]
impl Commentator for MockCommentator {
    async fn comment(
        &self,
        _item: &FeedItem,
        _constraints: &CommentConstraints,
    ) -> socialbot::types::Result<String> {
        match &self.response {
            Ok(comment) => Ok(comment.clone()),
            Err(reason) => Err(BotError::Augment(reason.clone())),
        }
    }
}

/// Feed source serving canned content per URL, with an optional delay to
/// exercise cycle overlap.
pub struct StaticSource {
    pub feeds: HashMap<String, Result<String, String>>,
    pub delay: Option<Duration>,
}

impl StaticSource {
    pub fn new(feeds: Vec<(&str, Result<String, String>)>) -> Arc<Self> {
        Arc::new(Self {
            feeds: feeds
                .into_iter()
                .map(|(url, body)| (url.to_string(), body))
                .collect(),
            delay: None,
        })
    }

    pub fn with_delay(mut feeds: Vec<(&str, Result<String, String>)>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            feeds: feeds
                .drain(..)
                .map(|(url, body)| (url.to_string(), body))
                .collect(),
            delay: Some(delay),
        })
    }
}

#[async_trait]
impl FeedSource for StaticSource {
    async fn fetch(&self, url: &str, _cache: &FeedCacheHeaders) -> socialbot::types::Result<FetchOutcome> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.feeds.get(url) {
            Some(Ok(content)) => Ok(FetchOutcome {
                content: Some(content.clone()),
                not_modified: false,
                etag: None,
                last_modified: None,
            }),
            Some(Err(message)) => Err(BotError::Parse(message.clone())),
            None => Err(BotError::Parse(format!("unknown feed {url}"))),
        }
    }
}

/// A minimal RSS document whose entries are dated `now`, so they always land
/// inside the fetch window.
pub fn rss_with_items(count: u32) -> String {
    rss_with_items_at(count, Utc::now())
}

pub fn rss_with_items_at(count: u32, published_at: DateTime<Utc>) -> String {
    let pub_date = published_at.to_rfc2822();
    let mut items = String::new();
    for n in 1..=count {
        items.push_str(&format!(
            r#"
    <item>
      <title>Item {n}</title>
      <link>https://example.com/{n}</link>
      <guid>item-{n}</guid>
      <description>Summary of item {n}.</description>
      <pubDate>{pub_date}</pubDate>
    </item>"#
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>{items}
  </channel>
</rss>"#
    )
}
