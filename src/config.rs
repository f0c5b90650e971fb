use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::fetcher::FetchConfig;
use crate::mute::{MuteEvaluator, MutePolicy, MuteWindow};
use crate::types::{BotError, Credentials, Destination, Result};

/// Static settings loaded once at startup; read-only to the pipeline.
/// Hot reload is out of scope.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_cron")]
    pub cron: String,
    /// Fetch window: items published more than this many days ago are ignored.
    #[serde(default = "default_days_of_news")]
    pub days_of_news: i64,
    /// Prune window: terminal dedup state older than this many days is removed.
    #[serde(default = "default_days_of_retention")]
    pub days_of_retention: i64,
    /// Publish attempt ceiling per (item, destination) pair.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub mute: Option<MuteTimes>,
    #[serde(default)]
    pub mute_policy: MutePolicy,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub ai: Option<AiConfig>,
    pub feeds: Vec<FeedConfig>,
    pub destinations: Vec<DestinationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MuteTimes {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub key: String,
    pub model: String,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_ai_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_ai_language")]
    pub language: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub rss: String,
    /// Generate an AI comment for new items of this feed.
    #[serde(default)]
    pub ai: bool,
    /// Destination names this feed publishes to; defaults to all destinations.
    #[serde(default)]
    pub destinations: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    pub name: String,
    #[serde(flatten)]
    pub credentials: Credentials,
    /// Mute-eligibility flag: only flagged destinations honor mute windows.
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub mute_window: Option<MuteTimes>,
}

fn default_database() -> String {
    "socialbot.db".to_string()
}

fn default_cron() -> String {
    "0 * * * *".to_string()
}

fn default_days_of_news() -> i64 {
    2
}

fn default_days_of_retention() -> i64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_max_chars() -> usize {
    160
}

fn default_ai_language() -> String {
    "en".to_string()
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut settings: Settings = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Cross-field validation. Pruning must never outrun the fetch window,
    /// otherwise a pruned item could reappear as "new" on the next fetch.
    fn validate(&mut self) -> Result<()> {
        if self.feeds.is_empty() {
            return Err(BotError::Config("no feeds configured".to_string()));
        }
        if self.destinations.is_empty() {
            return Err(BotError::Config("no destinations configured".to_string()));
        }

        let mut seen = HashSet::new();
        for dest in &self.destinations {
            let id = format!("{}:{}", dest.credentials.kind(), dest.name);
            if !seen.insert(id.clone()) {
                return Err(BotError::Config(format!("duplicate destination {id}")));
            }
        }

        let known: HashSet<&str> = self.destinations.iter().map(|d| d.name.as_str()).collect();
        for feed in &self.feeds {
            if let Some(names) = &feed.destinations {
                for name in names {
                    if !known.contains(name.as_str()) {
                        return Err(BotError::Config(format!(
                            "feed {} bound to unknown destination {name:?}",
                            feed.rss
                        )));
                    }
                }
            }
        }

        if self.days_of_retention < self.days_of_news {
            warn!(
                days_of_retention = self.days_of_retention,
                days_of_news = self.days_of_news,
                "retention shorter than the fetch window; raising retention to match"
            );
            self.days_of_retention = self.days_of_news;
        }

        Ok(())
    }

    pub fn build_destinations(&self) -> Result<Vec<Arc<Destination>>> {
        self.destinations
            .iter()
            .map(|cfg| {
                let mute_window = match &cfg.mute_window {
                    Some(times) => Some(MuteWindow::parse(&times.from, &times.to)?),
                    None => None,
                };
                Ok(Arc::new(Destination {
                    name: cfg.name.clone(),
                    credentials: cfg.credentials.clone(),
                    mute_eligible: cfg.mute,
                    mute_window,
                }))
            })
            .collect()
    }

    pub fn mute_evaluator(&self) -> Result<MuteEvaluator> {
        let global = match &self.mute {
            Some(times) => Some(MuteWindow::parse(&times.from, &times.to)?),
            None => None,
        };
        Ok(MuteEvaluator::new(global, self.mute_policy))
    }

    /// Destinations a feed publishes to; an unbound feed targets all of them.
    pub fn bound_destinations(
        feed: &FeedConfig,
        all: &[Arc<Destination>],
    ) -> Vec<Arc<Destination>> {
        match &feed.destinations {
            Some(names) => all
                .iter()
                .filter(|d| names.iter().any(|n| n == &d.name))
                .cloned()
                .collect(),
            None => all.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "cron": "0 * * * *",
            "days_of_news": 2,
            "days_of_retention": 10,
            "mute": { "from": "22:00", "to": "06:00" },
            "ai": { "key": "sk-test", "model": "gpt-4.1-nano", "language": "it" },
            "feeds": [
                { "rss": "https://example.com/feed", "ai": true },
                { "rss": "https://other.example/rss", "destinations": ["tg-main"] }
            ],
            "destinations": [
                { "name": "tg-main", "kind": "telegram", "token": "t", "chat_id": "1", "mute": true },
                { "name": "bsky", "kind": "bluesky", "handle": "bot.bsky.social", "password": "pw" }
            ]
        })
    }

    #[test]
    fn parses_full_settings() {
        let mut settings: Settings = serde_json::from_value(sample_json()).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.feeds.len(), 2);
        assert_eq!(settings.destinations.len(), 2);
        assert_eq!(settings.ai.as_ref().unwrap().max_chars, 160);
        let dests = settings.build_destinations().unwrap();
        assert_eq!(dests[0].id(), "telegram:tg-main");
        assert!(dests[0].mute_eligible);
        assert!(!dests[1].mute_eligible);
        if let Credentials::Bluesky { service, .. } = &dests[1].credentials {
            assert_eq!(service, "https://bsky.social");
        } else {
            panic!("expected bluesky credentials");
        }
    }

    #[test]
    fn rejects_unknown_binding() {
        let mut raw = sample_json();
        raw["feeds"][1]["destinations"] = serde_json::json!(["nope"]);
        let mut settings: Settings = serde_json::from_value(raw).unwrap();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("unknown destination"));
    }

    #[test]
    fn rejects_duplicate_destination() {
        let mut raw = sample_json();
        raw["destinations"][1] = raw["destinations"][0].clone();
        let mut settings: Settings = serde_json::from_value(raw).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn retention_is_raised_to_cover_fetch_window() {
        let mut raw = sample_json();
        raw["days_of_retention"] = serde_json::json!(1);
        raw["days_of_news"] = serde_json::json!(5);
        let mut settings: Settings = serde_json::from_value(raw).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.days_of_retention, 5);
    }

    #[test]
    fn unbound_feed_targets_all_destinations() {
        let settings: Settings = serde_json::from_value(sample_json()).unwrap();
        let dests = settings.build_destinations().unwrap();
        let all = Settings::bound_destinations(&settings.feeds[0], &dests);
        assert_eq!(all.len(), 2);
        let bound = Settings::bound_destinations(&settings.feeds[1], &dests);
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].name, "tg-main");
    }
}
