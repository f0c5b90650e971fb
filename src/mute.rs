use chrono::NaiveTime;
use serde::Deserialize;
use tracing::debug;

use crate::types::{Destination, Result};

/// A time-of-day range during which publishing is suppressed.
///
/// Compared in local time. A window whose start is later than its end wraps
/// past midnight (22:00–06:00 covers late evening and early morning). A
/// window with `from == to` never mutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuteWindow {
    pub from: NaiveTime,
    pub to: NaiveTime,
}

impl MuteWindow {
    pub fn new(from: NaiveTime, to: NaiveTime) -> Self {
        Self { from, to }
    }

    /// Parse a window from "HH:MM" strings.
    pub fn parse(from: &str, to: &str) -> Result<Self> {
        let parse_one = |s: &str| {
            NaiveTime::parse_from_str(s, "%H:%M")
                .map_err(|e| crate::types::BotError::Config(format!("bad mute time {s:?}: {e}")))
        };
        Ok(Self {
            from: parse_one(from)?,
            to: parse_one(to)?,
        })
    }

    /// True when `t` falls inside the half-open interval `[from, to)`.
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.from == self.to {
            return false;
        }
        if self.from < self.to {
            self.from <= t && t < self.to
        } else {
            t >= self.from || t < self.to
        }
    }
}

/// How a destination-level window interacts with the process-wide one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutePolicy {
    /// A destination window, when present, replaces the process window.
    #[default]
    Override,
    /// Muted when either the destination window or the process window is active.
    Combine,
}

/// Pure evaluator over the configured windows; holds no clock of its own.
#[derive(Debug, Clone)]
pub struct MuteEvaluator {
    global: Option<MuteWindow>,
    policy: MutePolicy,
}

impl MuteEvaluator {
    pub fn new(global: Option<MuteWindow>, policy: MutePolicy) -> Self {
        Self { global, policy }
    }

    /// A destination not marked mute-eligible is never muted, regardless of
    /// any configured window.
    pub fn is_muted(&self, now: NaiveTime, destination: &Destination) -> bool {
        if !destination.mute_eligible {
            return false;
        }
        let muted = match self.policy {
            MutePolicy::Override => destination
                .mute_window
                .as_ref()
                .or(self.global.as_ref())
                .is_some_and(|w| w.contains(now)),
            MutePolicy::Combine => {
                destination.mute_window.is_some_and(|w| w.contains(now))
                    || self.global.is_some_and(|w| w.contains(now))
            }
        };
        if muted {
            debug!(destination = %destination.id(), %now, "destination is muted");
        }
        muted
    }
}
