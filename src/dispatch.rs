use std::sync::Arc;

use chrono::NaiveTime;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::augment::{CommentConstraints, Commentator};
use crate::mute::MuteEvaluator;
use crate::payload;
use crate::platforms::Publisher;
use crate::store::{DedupStore, FinalizeOutcome};
use crate::types::{Destination, FeedItem, SKIP_REASON_MUTED};

/// One destination a feed item can be published to, with its publish capability.
#[derive(Clone)]
pub struct DispatchTarget {
    pub destination: Arc<Destination>,
    pub publisher: Arc<dyn Publisher>,
}

/// Per-cycle dispatch counters, aggregated across items and destinations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub retrying: usize,
    pub store_errors: usize,
}

impl DispatchSummary {
    pub fn merge(&mut self, other: DispatchSummary) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.retrying += other.retrying;
        self.store_errors += other.store_errors;
    }
}

enum PublishResult {
    Sent,
    Failed,
    Retrying,
    AlreadyDone,
    StoreError,
}

/// Fans one new feed item out to its bound destinations.
///
/// Destinations are fully isolated from one another: a permanent failure on
/// one never rolls back or blocks a send on another. Record transitions go
/// through the store's guarded updates, so at most one Sent can ever result
/// per (item, destination) pair.
pub struct DispatchEngine {
    store: Arc<DedupStore>,
    mute: MuteEvaluator,
    commentator: Option<(Arc<dyn Commentator>, CommentConstraints)>,
    max_attempts: u32,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<DedupStore>,
        mute: MuteEvaluator,
        commentator: Option<(Arc<dyn Commentator>, CommentConstraints)>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            mute,
            commentator,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Dispatch one item to every bound destination that still needs it.
    /// `now` is the local time-of-day used for mute evaluation.
    pub async fn dispatch_item(
        &self,
        item: &FeedItem,
        targets: &[DispatchTarget],
        want_comment: bool,
        now: NaiveTime,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        let mut live: Vec<&DispatchTarget> = Vec::new();

        for target in targets {
            let dest_id = target.destination.id();
            match self.store.needs_dispatch(&item.id, &dest_id).await {
                Ok(false) => {
                    debug!(item = %item.id, destination = %dest_id, "already terminal, skipping");
                    continue;
                }
                Ok(true) => {}
                Err(e) => {
                    error!(item = %item.id, destination = %dest_id, error = %e, "dedup lookup failed");
                    summary.store_errors += 1;
                    continue;
                }
            }

            if self.mute.is_muted(now, &target.destination) {
                match self
                    .store
                    .record_skip(&item.id, &dest_id, SKIP_REASON_MUTED)
                    .await
                {
                    Ok(()) => {
                        info!(item = %item.id, destination = %dest_id, "muted, skipping");
                        summary.skipped += 1;
                    }
                    Err(e) => {
                        error!(item = %item.id, destination = %dest_id, error = %e, "failed to record skip");
                        summary.store_errors += 1;
                    }
                }
                continue;
            }

            live.push(target);
        }

        if live.is_empty() {
            return summary;
        }

        // One comment per item, shared by all destinations. Generation is
        // skipped entirely while nothing will actually be published.
        let comment = if want_comment {
            self.generate_comment(item).await
        } else {
            None
        };

        let results = join_all(
            live.iter()
                .map(|target| self.publish_one(item, target, comment.as_deref())),
        )
        .await;

        for result in results {
            match result {
                PublishResult::Sent => summary.sent += 1,
                PublishResult::Failed => summary.failed += 1,
                PublishResult::Retrying => summary.retrying += 1,
                PublishResult::AlreadyDone => {}
                PublishResult::StoreError => summary.store_errors += 1,
            }
        }

        summary
    }

    /// Augmentation failure is non-fatal: fall back to the raw item text.
    async fn generate_comment(&self, item: &FeedItem) -> Option<String> {
        let (commentator, constraints) = self.commentator.as_ref()?;
        match commentator.comment(item, constraints).await {
            Ok(comment) => {
                info!(item = %item.id, chars = comment.chars().count(), "generated comment");
                Some(comment)
            }
            Err(e) => {
                warn!(item = %item.id, error = %e, "comment generation failed, using raw text");
                None
            }
        }
    }

    async fn publish_one(
        &self,
        item: &FeedItem,
        target: &DispatchTarget,
        comment: Option<&str>,
    ) -> PublishResult {
        let dest_id = target.destination.id();

        let attempts = match self.store.record_attempt(&item.id, &dest_id).await {
            Ok(Some(attempts)) => attempts,
            Ok(None) => {
                debug!(item = %item.id, destination = %dest_id, "terminal record appeared, skipping");
                return PublishResult::AlreadyDone;
            }
            Err(e) => {
                // The record (if any) stays as it was; the pair is
                // re-evaluated next cycle.
                error!(item = %item.id, destination = %dest_id, error = %e, "failed to acquire pending record");
                return PublishResult::StoreError;
            }
        };

        let rendered = payload::render(item, comment, target.destination.kind());

        match target.publisher.publish(&rendered).await {
            Ok(post_id) => {
                let outcome = FinalizeOutcome::Sent {
                    post_id: post_id.clone(),
                };
                match self.store.finalize(&item.id, &dest_id, &outcome).await {
                    Ok(_) => {
                        info!(item = %item.id, destination = %dest_id, %post_id, "published");
                        PublishResult::Sent
                    }
                    Err(e) => {
                        error!(item = %item.id, destination = %dest_id, error = %e, "failed to record send");
                        PublishResult::StoreError
                    }
                }
            }
            Err(platform_error) => {
                let reason = platform_error.to_string();
                let retry_eligible = platform_error.is_transient() && attempts < self.max_attempts;
                let outcome = if retry_eligible {
                    FinalizeOutcome::RetryLater {
                        reason: reason.clone(),
                    }
                } else {
                    FinalizeOutcome::Failed {
                        reason: reason.clone(),
                    }
                };

                if let Err(e) = self.store.finalize(&item.id, &dest_id, &outcome).await {
                    error!(item = %item.id, destination = %dest_id, error = %e, "failed to record outcome");
                    return PublishResult::StoreError;
                }

                if retry_eligible {
                    warn!(
                        item = %item.id,
                        destination = %dest_id,
                        attempts,
                        %reason,
                        "publish failed, will retry next cycle"
                    );
                    PublishResult::Retrying
                } else {
                    error!(
                        item = %item.id,
                        destination = %dest_id,
                        attempts,
                        %reason,
                        "publish failed permanently"
                    );
                    PublishResult::Failed
                }
            }
        }
    }
}
