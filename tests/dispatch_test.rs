mod common;

use std::sync::Arc;

use chrono::NaiveTime;

use socialbot::dispatch::{DispatchEngine, DispatchTarget};
use socialbot::mute::{MuteEvaluator, MutePolicy, MuteWindow};
use socialbot::platforms::PlatformError;
use socialbot::store::DedupStore;
use socialbot::types::DispatchStatus;

use common::{destination, item, MockCommentator, MockPublisher};

fn t(hhmm: &str) -> NaiveTime {
    NaiveTime::parse_from_str(hhmm, "%H:%M").unwrap()
}

fn no_mute() -> MuteEvaluator {
    MuteEvaluator::new(None, MutePolicy::Override)
}

async fn store_with(items: &[socialbot::types::FeedItem]) -> Arc<DedupStore> {
    let store = Arc::new(DedupStore::open_in_memory().await.unwrap());
    for item in items {
        store.upsert_item(item).await.unwrap();
    }
    store
}

#[tokio::test]
async fn sends_each_item_at_most_once() {
    let item = item(1);
    let store = store_with(std::slice::from_ref(&item)).await;
    let publisher = MockPublisher::ok();
    let targets = vec![DispatchTarget {
        destination: destination("main", false, None),
        publisher: publisher.clone(),
    }];
    let engine = DispatchEngine::new(store.clone(), no_mute(), None, 3);

    let first = engine.dispatch_item(&item, &targets, false, t("12:00")).await;
    assert_eq!(first.sent, 1);

    // Second cycle sees the terminal record and never calls out again.
    let second = engine.dispatch_item(&item, &targets, false, t("12:00")).await;
    assert_eq!(second.sent, 0);
    assert_eq!(second.skipped, 0);
    assert_eq!(publisher.call_count(), 1);
}

#[tokio::test]
async fn destination_failure_never_blocks_the_others() {
    let item = item(1);
    let store = store_with(std::slice::from_ref(&item)).await;
    let broken = MockPublisher::always_failing(PlatformError::Permanent("HTTP 403".to_string()));
    let healthy = MockPublisher::ok();
    let dest_broken = destination("broken", false, None);
    let dest_healthy = destination("healthy", false, None);
    let targets = vec![
        DispatchTarget {
            destination: dest_broken.clone(),
            publisher: broken.clone(),
        },
        DispatchTarget {
            destination: dest_healthy.clone(),
            publisher: healthy.clone(),
        },
    ];
    let engine = DispatchEngine::new(store.clone(), no_mute(), None, 3);

    let summary = engine.dispatch_item(&item, &targets, false, t("12:00")).await;
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.failed, 1);

    let broken_record = store.record(&item.id, &dest_broken.id()).await.unwrap().unwrap();
    assert!(matches!(broken_record.status, DispatchStatus::Failed { .. }));
    let healthy_record = store.record(&item.id, &dest_healthy.id()).await.unwrap().unwrap();
    assert!(matches!(healthy_record.status, DispatchStatus::Sent { .. }));

    // Both pairs are terminal now; a rerun touches neither publisher.
    let rerun = engine.dispatch_item(&item, &targets, false, t("12:00")).await;
    assert_eq!(rerun.sent + rerun.failed + rerun.retrying, 0);
    assert_eq!(broken.call_count(), 1);
    assert_eq!(healthy.call_count(), 1);
}

#[tokio::test]
async fn transient_failures_retry_up_to_the_ceiling() {
    let item = item(1);
    let store = store_with(std::slice::from_ref(&item)).await;
    let publisher = MockPublisher::always_failing(PlatformError::Transient("HTTP 503".to_string()));
    let dest = destination("main", false, None);
    let targets = vec![DispatchTarget {
        destination: dest.clone(),
        publisher: publisher.clone(),
    }];
    let engine = DispatchEngine::new(store.clone(), no_mute(), None, 3);

    // Two cycles leave the record pending for another try.
    for _ in 0..2 {
        let summary = engine.dispatch_item(&item, &targets, false, t("12:00")).await;
        assert_eq!(summary.retrying, 1);
        let record = store.record(&item.id, &dest.id()).await.unwrap().unwrap();
        assert_eq!(record.status, DispatchStatus::Pending);
    }

    // The third attempt exhausts the budget and goes terminal.
    let summary = engine.dispatch_item(&item, &targets, false, t("12:00")).await;
    assert_eq!(summary.failed, 1);
    let record = store.record(&item.id, &dest.id()).await.unwrap().unwrap();
    assert!(matches!(record.status, DispatchStatus::Failed { .. }));
    assert_eq!(record.attempts, 3);

    // And stays terminal.
    let rerun = engine.dispatch_item(&item, &targets, false, t("12:00")).await;
    assert_eq!(rerun.failed + rerun.retrying, 0);
    assert_eq!(publisher.call_count(), 3);
}

#[tokio::test]
async fn transient_failure_then_success() {
    let item = item(1);
    let store = store_with(std::slice::from_ref(&item)).await;
    let publisher =
        MockPublisher::scripted(vec![Err(PlatformError::Transient("HTTP 429".to_string()))]);
    let dest = destination("main", false, None);
    let targets = vec![DispatchTarget {
        destination: dest.clone(),
        publisher: publisher.clone(),
    }];
    let engine = DispatchEngine::new(store.clone(), no_mute(), None, 3);

    let first = engine.dispatch_item(&item, &targets, false, t("12:00")).await;
    assert_eq!(first.retrying, 1);

    let second = engine.dispatch_item(&item, &targets, false, t("12:00")).await;
    assert_eq!(second.sent, 1);

    let record = store.record(&item.id, &dest.id()).await.unwrap().unwrap();
    assert!(matches!(record.status, DispatchStatus::Sent { .. }));
    assert_eq!(record.attempts, 2);
}

#[tokio::test]
async fn muted_destination_is_skipped_without_calling_out() {
    let item = item(1);
    let store = store_with(std::slice::from_ref(&item)).await;
    let publisher = MockPublisher::ok();
    let window = MuteWindow::parse("09:00", "17:00").unwrap();
    let dest = destination("quiet", true, Some(window));
    let targets = vec![DispatchTarget {
        destination: dest.clone(),
        publisher: publisher.clone(),
    }];
    let engine = DispatchEngine::new(store.clone(), no_mute(), None, 3);

    let muted = engine.dispatch_item(&item, &targets, false, t("12:00")).await;
    assert_eq!(muted.skipped, 1);
    assert_eq!(publisher.call_count(), 0);
    let record = store.record(&item.id, &dest.id()).await.unwrap().unwrap();
    assert_eq!(
        record.status,
        DispatchStatus::Skipped {
            reason: "muted".to_string()
        }
    );

    // Once the window ends, the skipped item goes out normally.
    let later = engine.dispatch_item(&item, &targets, false, t("18:00")).await;
    assert_eq!(later.sent, 1);
    assert_eq!(publisher.call_count(), 1);
}

#[tokio::test]
async fn comment_failure_falls_back_to_raw_text() {
    let item = item(1);
    let store = store_with(std::slice::from_ref(&item)).await;
    let publisher = MockPublisher::ok();
    let targets = vec![DispatchTarget {
        destination: destination("main", false, None),
        publisher: publisher.clone(),
    }];
    let engine = DispatchEngine::new(
        store.clone(),
        no_mute(),
        Some(MockCommentator::failing()),
        3,
    );

    let summary = engine.dispatch_item(&item, &targets, true, t("12:00")).await;
    assert_eq!(summary.sent, 1);
    let payloads = publisher.payloads();
    assert!(payloads[0].text.contains("Summary of item 1."));
}

#[tokio::test]
async fn comment_replaces_the_item_summary() {
    let item = item(1);
    let store = store_with(std::slice::from_ref(&item)).await;
    let publisher = MockPublisher::ok();
    let targets = vec![DispatchTarget {
        destination: destination("main", false, None),
        publisher: publisher.clone(),
    }];
    let engine = DispatchEngine::new(
        store.clone(),
        no_mute(),
        Some(MockCommentator::ok("A sharp one-liner.")),
        3,
    );

    let summary = engine.dispatch_item(&item, &targets, true, t("12:00")).await;
    assert_eq!(summary.sent, 1);
    let payloads = publisher.payloads();
    assert!(payloads[0].text.contains("A sharp one-liner."));
    assert!(!payloads[0].text.contains("Summary of item 1."));
}

// Two destinations, one muted during the first cycle. Every item must reach
// every destination exactly once across the two cycles.
#[tokio::test]
async fn muted_backlog_drains_on_the_next_cycle() {
    let items = vec![item(1), item(2), item(3)];
    let store = store_with(&items).await;
    let active_pub = MockPublisher::ok();
    let quiet_pub = MockPublisher::ok();
    let window = MuteWindow::parse("22:00", "06:00").unwrap();
    let active = destination("active", false, None);
    let quiet = destination("quiet", true, Some(window));
    let targets = vec![
        DispatchTarget {
            destination: active.clone(),
            publisher: active_pub.clone(),
        },
        DispatchTarget {
            destination: quiet.clone(),
            publisher: quiet_pub.clone(),
        },
    ];
    let engine = DispatchEngine::new(store.clone(), no_mute(), None, 3);

    // First cycle fires inside the quiet window (wraps midnight).
    let mut first = socialbot::DispatchSummary::default();
    for item in &items {
        first.merge(engine.dispatch_item(item, &targets, false, t("23:30")).await);
    }
    assert_eq!(first.sent, 3);
    assert_eq!(first.skipped, 3);
    assert_eq!(active_pub.call_count(), 3);
    assert_eq!(quiet_pub.call_count(), 0);

    // Second cycle runs in the morning: only the muted backlog goes out.
    let mut second = socialbot::DispatchSummary::default();
    for item in &items {
        second.merge(engine.dispatch_item(item, &targets, false, t("09:00")).await);
    }
    assert_eq!(second.sent, 3);
    assert_eq!(second.skipped, 0);
    assert_eq!(active_pub.call_count(), 3);
    assert_eq!(quiet_pub.call_count(), 3);

    for item in &items {
        for dest in [&active, &quiet] {
            let record = store.record(&item.id, &dest.id()).await.unwrap().unwrap();
            assert!(matches!(record.status, DispatchStatus::Sent { .. }));
        }
    }
}
