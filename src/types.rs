use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized feed entry, immutable once fetched.
///
/// The `id` is stable across fetches: it is derived from the source feed URL
/// plus the entry GUID (or the entry link when no GUID is present), so the
/// same article always maps to the same dedup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: String,
    pub feed_url: String,
    pub title: String,
    pub summary: String,
    pub link: String,
    pub short_link: Option<String>,
    pub categories: Vec<String>,
    pub image: Option<String>,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Telegram,
    Bluesky,
    Linkedin,
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformKind::Telegram => write!(f, "telegram"),
            PlatformKind::Bluesky => write!(f, "bluesky"),
            PlatformKind::Linkedin => write!(f, "linkedin"),
        }
    }
}

/// Credential bundle for one destination. Owned by configuration and
/// read-only to the dispatch pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Credentials {
    Telegram {
        token: String,
        chat_id: String,
    },
    Bluesky {
        handle: String,
        password: String,
        #[serde(default = "default_bluesky_service")]
        service: String,
    },
    Linkedin {
        urn: String,
        access_token: String,
    },
}

fn default_bluesky_service() -> String {
    "https://bsky.social".to_string()
}

impl Credentials {
    pub fn kind(&self) -> PlatformKind {
        match self {
            Credentials::Telegram { .. } => PlatformKind::Telegram,
            Credentials::Bluesky { .. } => PlatformKind::Bluesky,
            Credentials::Linkedin { .. } => PlatformKind::Linkedin,
        }
    }
}

/// A single credentialed social-platform target.
#[derive(Debug, Clone)]
pub struct Destination {
    pub name: String,
    pub credentials: Credentials,
    pub mute_eligible: bool,
    pub mute_window: Option<crate::mute::MuteWindow>,
}

impl Destination {
    pub fn kind(&self) -> PlatformKind {
        self.credentials.kind()
    }

    /// Stable identifier used as the dedup key; must survive restarts,
    /// so it is derived from configuration rather than generated.
    pub fn id(&self) -> String {
        format!("{}:{}", self.kind(), self.name)
    }
}

/// Status of one (item, destination) dispatch record.
///
/// `Sent` and `Failed` are terminal; `Pending` and `Skipped` remain
/// eligible for a later cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    Pending,
    Sent { post_id: String },
    Failed { reason: String },
    Skipped { reason: String },
}

impl DispatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchStatus::Sent { .. } | DispatchStatus::Failed { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Pending => "pending",
            DispatchStatus::Sent { .. } => "sent",
            DispatchStatus::Failed { .. } => "failed",
            DispatchStatus::Skipped { .. } => "skipped",
        }
    }
}

pub const SKIP_REASON_MUTED: &str = "muted";

/// Persisted dedup unit: one row per (item, destination) pair.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub item_id: String,
    pub destination_id: String,
    pub status: DispatchStatus,
    /// Raw status detail as stored: post id, failure reason, or the last
    /// transient error while the record is still pending.
    pub detail: Option<String>,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid cron expression: {0}")]
    Cron(#[from] cron::error::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("comment generation failed: {0}")]
    Augment(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BotError>;
