use std::sync::Arc;

use chrono::{DateTime, Duration, Local, NaiveTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::dispatch::{DispatchEngine, DispatchSummary, DispatchTarget};
use crate::fetcher::FeedSource;
use crate::parser::FeedParser;
use crate::platforms;
use crate::store::DedupStore;
use crate::types::{Destination, FeedItem, Result};

const FETCH_CONCURRENCY: usize = 4;

/// A configured feed with its resolved destination set.
#[derive(Clone)]
pub struct FeedBinding {
    pub url: String,
    pub want_comment: bool,
    pub targets: Vec<DispatchTarget>,
}

/// Resolve feed bindings from settings: build one publisher per destination
/// and attach each feed to its bound (or, by default, all) destinations.
pub fn build_bindings(
    settings: &Settings,
    destinations: &[Arc<Destination>],
) -> Result<Vec<FeedBinding>> {
    let mut targets_by_name = Vec::new();
    for destination in destinations {
        let publisher = platforms::build_publisher(destination)?;
        targets_by_name.push(DispatchTarget {
            destination: destination.clone(),
            publisher,
        });
    }

    let ai_available = settings.ai.is_some();
    let mut bindings = Vec::new();
    for feed in &settings.feeds {
        let bound = Settings::bound_destinations(feed, destinations);
        let targets = targets_by_name
            .iter()
            .filter(|t| bound.iter().any(|d| d.id() == t.destination.id()))
            .cloned()
            .collect();
        bindings.push(FeedBinding {
            url: feed.rss.clone(),
            want_comment: feed.ai && ai_available,
            targets,
        });
    }
    Ok(bindings)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Filtering,
    Dispatching,
    Pruning,
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    /// True when the trigger was dropped because a cycle was still running.
    pub dropped: bool,
    pub feeds_ok: usize,
    pub feeds_failed: usize,
    pub items_seen: usize,
    pub items_new: usize,
    pub dispatch: DispatchSummary,
    pub pruned: u64,
}

impl CycleReport {
    fn dropped(cycle_id: Uuid) -> Self {
        Self {
            cycle_id,
            dropped: true,
            feeds_ok: 0,
            feeds_failed: 0,
            items_seen: 0,
            items_new: 0,
            dispatch: DispatchSummary::default(),
            pruned: 0,
        }
    }
}

/// Drives one poll cycle end to end:
/// fetch → filter-new → mute-check/augment/dispatch → prune.
///
/// At most one cycle runs at a time; a trigger that fires while a cycle is
/// still dispatching is dropped, not queued. Pruning runs strictly after the
/// dispatch phase, never concurrently with record writes.
pub struct Orchestrator {
    source: Arc<dyn FeedSource>,
    store: Arc<DedupStore>,
    engine: DispatchEngine,
    feeds: Vec<FeedBinding>,
    days_of_news: i64,
    days_of_retention: i64,
    cycle_lock: Mutex<()>,
    phase: std::sync::Mutex<CyclePhase>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn FeedSource>,
        store: Arc<DedupStore>,
        engine: DispatchEngine,
        feeds: Vec<FeedBinding>,
        days_of_news: i64,
        days_of_retention: i64,
    ) -> Self {
        Self {
            source,
            store,
            engine,
            feeds,
            days_of_news,
            days_of_retention,
            cycle_lock: Mutex::new(()),
            phase: std::sync::Mutex::new(CyclePhase::Idle),
        }
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.lock().expect("phase lock poisoned")
    }

    fn enter_phase(&self, phase: CyclePhase) {
        debug!(?phase, "cycle phase");
        *self.phase.lock().expect("phase lock poisoned") = phase;
    }

    /// Run one poll cycle. Returns a dropped report when a cycle is already
    /// in flight.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            warn!(%cycle_id, "previous cycle still running, dropping trigger");
            return Ok(CycleReport::dropped(cycle_id));
        };

        info!(%cycle_id, feeds = self.feeds.len(), "starting poll cycle");

        // Fetching: feeds are fetched in parallel and fail in isolation.
        // The futures are built up front so the cycle future stays Send.
        self.enter_phase(CyclePhase::Fetching);
        let fetches: Vec<_> = self
            .feeds
            .iter()
            .enumerate()
            .map(|(index, binding)| {
                let fetch = self.fetch_one(binding);
                async move { (index, fetch.await) }
            })
            .collect();
        let fetched: Vec<(usize, Result<Vec<FeedItem>>)> = stream::iter(fetches)
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut feeds_ok = 0;
        let mut feeds_failed = 0;
        let mut items_seen = 0;
        let mut per_feed_items: Vec<(usize, Vec<FeedItem>)> = Vec::new();

        for (index, result) in fetched {
            match result {
                Ok(items) => {
                    feeds_ok += 1;
                    items_seen += items.len();
                    per_feed_items.push((index, items));
                }
                Err(e) => {
                    feeds_failed += 1;
                    error!(feed = %self.feeds[index].url, error = %e, "feed fetch failed, continuing cycle");
                }
            }
        }

        // Filtering: drop everything already terminal on all bound destinations.
        self.enter_phase(CyclePhase::Filtering);
        let mut items_new = 0;
        let mut dispatchable: Vec<(usize, Vec<FeedItem>)> = Vec::new();
        for (index, items) in per_feed_items {
            let binding = &self.feeds[index];
            // Store errors stay scoped to the affected item or batch; the
            // rest of the cycle keeps going.
            let mut remembered = Vec::with_capacity(items.len());
            for item in items {
                match self.store.upsert_item(&item).await {
                    Ok(()) => remembered.push(item),
                    Err(e) => {
                        error!(item = %item.id, error = %e, "failed to remember item, skipping it");
                    }
                }
            }
            let bound: Vec<Arc<Destination>> = binding
                .targets
                .iter()
                .map(|t| t.destination.clone())
                .collect();
            match self.store.filter_new(remembered, &bound).await {
                Ok(new_items) => {
                    items_new += new_items.len();
                    if !new_items.is_empty() {
                        dispatchable.push((index, new_items));
                    }
                }
                Err(e) => {
                    error!(feed = %binding.url, error = %e, "dedup filtering failed, skipping this feed's batch");
                }
            }
        }

        // Dispatching: per-item fan-out; destinations are isolated inside
        // the engine.
        self.enter_phase(CyclePhase::Dispatching);
        let now_local = Local::now().time();
        let mut dispatch = DispatchSummary::default();
        for (index, items) in dispatchable {
            let binding = &self.feeds[index];
            for item in items {
                let summary = self
                    .engine
                    .dispatch_item(&item, &binding.targets, binding.want_comment, now_local)
                    .await;
                dispatch.merge(summary);
            }
        }

        // Pruning: only runs once dispatch is fully done.
        self.enter_phase(CyclePhase::Pruning);
        let cutoff = day_floor(Utc::now() - Duration::days(self.days_of_retention));
        let pruned = match self.store.prune(cutoff).await {
            Ok(pruned) => pruned,
            Err(e) => {
                error!(error = %e, "pruning failed");
                0
            }
        };

        self.enter_phase(CyclePhase::Idle);
        info!(
            %cycle_id,
            feeds_ok,
            feeds_failed,
            items_seen,
            items_new,
            sent = dispatch.sent,
            failed = dispatch.failed,
            skipped = dispatch.skipped,
            retrying = dispatch.retrying,
            pruned,
            "poll cycle finished"
        );

        Ok(CycleReport {
            cycle_id,
            dropped: false,
            feeds_ok,
            feeds_failed,
            items_seen,
            items_new,
            dispatch,
            pruned,
        })
    }

    /// Fetch and parse one feed, keeping only items inside the news window.
    async fn fetch_one(&self, binding: &FeedBinding) -> Result<Vec<FeedItem>> {
        let cache = self
            .store
            .feed_cache_headers(&binding.url)
            .await
            .unwrap_or_default();

        let outcome = match self.source.fetch(&binding.url, &cache).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.to_string();
                if let Err(store_err) = self
                    .store
                    .record_feed_fetch(&binding.url, Some(&message), &cache)
                    .await
                {
                    error!(feed = %binding.url, error = %store_err, "failed to record fetch error");
                }
                return Err(e);
            }
        };

        let headers = crate::fetcher::FeedCacheHeaders {
            etag: outcome.etag.clone(),
            last_modified: outcome.last_modified.clone(),
        };
        self.store
            .record_feed_fetch(&binding.url, None, &headers)
            .await?;

        let Some(content) = outcome.content else {
            debug!(feed = %binding.url, "not modified");
            return Ok(Vec::new());
        };

        let mut parser = FeedParser::new();
        let items = parser.parse_feed(&binding.url, &content)?;

        let window_start = day_floor(Utc::now() - Duration::days(self.days_of_news));
        let fresh: Vec<FeedItem> = items
            .into_iter()
            .filter(|item| item.published_at >= window_start)
            .collect();

        debug!(feed = %binding.url, fresh = fresh.len(), "fetched feed items in window");
        Ok(fresh)
    }
}

/// Midnight-of-day cutoff, matching how the retention windows are anchored.
fn day_floor(moment: DateTime<Utc>) -> DateTime<Utc> {
    moment
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc()
}
