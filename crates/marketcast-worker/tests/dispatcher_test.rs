mod helpers;

use std::time::Duration;

use helpers::fixtures::{png, s3_event};
use helpers::{Harness, HarnessOptions};
use marketcast_core::{Classify, UploadStatus};
use marketcast_db::UploadEventCache;
use marketcast_worker::{BatchReport, FailureCause, ObjectRecord};
use tokio_util::sync::CancellationToken;

fn records(keys: &[&str]) -> Vec<ObjectRecord> {
    keys.iter()
        .map(|key| ObjectRecord::new("marketcast-landing", *key))
        .collect()
}

#[tokio::test]
async fn test_terminal_failures_do_not_fail_the_batch() {
    let harness = Harness::new();
    harness.land("video/1/a.mp4", vec![1; 32], "video/mp4");
    harness.land("user-avatar/2/b.pdf", b"%PDF".to_vec(), "application/pdf");
    harness.land("shop-logo/3/c.png", png(6, 6), "image/png");

    let report = harness
        .dispatcher
        .dispatch_records(
            records(&["video/1/a.mp4", "user-avatar/2/b.pdf", "shop-logo/3/c.png"]),
            &CancellationToken::new(),
            BatchReport::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.records, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.retryable, 0);
    assert_eq!(report.not_started, 0);

    let failed = harness.cache.get("user-avatar/2/b.pdf").await.unwrap();
    assert_eq!(failed.status, UploadStatus::Failed);
}

#[tokio::test]
async fn test_retryable_failure_fails_the_batch_but_keeps_earlier_outcomes() {
    let harness = Harness::new();
    harness.land("user-avatar/2/b.pdf", b"%PDF".to_vec(), "application/pdf");
    harness.land("video/1/a.mp4", vec![1; 32], "video/mp4");
    harness.land("video/1/flaky.mp4", vec![2; 32], "video/mp4");
    harness.temporary.fail_head("video/1/flaky.mp4");

    let err = harness
        .dispatcher
        .dispatch_records(
            records(&["user-avatar/2/b.pdf", "video/1/a.mp4", "video/1/flaky.mp4"]),
            &CancellationToken::new(),
            BatchReport::default(),
        )
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(err.key, "video/1/flaky.mp4");

    let cache = &harness.cache;
    assert_eq!(
        cache.get("user-avatar/2/b.pdf").await.unwrap().status,
        UploadStatus::Failed
    );
    assert_eq!(
        cache.get("video/1/a.mp4").await.unwrap().status,
        UploadStatus::Succeeded
    );
    assert_eq!(
        cache.get("video/1/flaky.mp4").await.unwrap().status,
        UploadStatus::Unknown
    );

    // Redelivery of the same batch skips what already succeeded.
    harness.temporary.heal_head("video/1/flaky.mp4");
    let report = harness
        .dispatcher
        .dispatch_records(
            records(&["user-avatar/2/b.pdf", "video/1/a.mp4", "video/1/flaky.mp4"]),
            &CancellationToken::new(),
            BatchReport::default(),
        )
        .await
        .unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(harness.permanent.uploads(), 2);
}

#[tokio::test]
async fn test_retryable_failure_stops_new_records() {
    let harness = Harness::new();
    harness.land("video/1/flaky.mp4", vec![2; 32], "video/mp4");
    harness.land("video/1/b.mp4", vec![1; 32], "video/mp4");
    harness.land("video/1/c.mp4", vec![1; 32], "video/mp4");
    harness.temporary.fail_head("video/1/flaky.mp4");

    let err = harness
        .dispatcher
        .dispatch_records(
            records(&["video/1/flaky.mp4", "video/1/b.mp4", "video/1/c.mp4"]),
            &CancellationToken::new(),
            BatchReport::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err.cause, FailureCause::Storage(_)));
    assert_eq!(harness.temporary.head_calls(), 1);
    assert!(!harness.permanent.contains("video/1/b.mp4"));
    assert!(!harness.permanent.contains("video/1/c.mp4"));
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let keys: Vec<String> = (0..6).map(|i| format!("video/7/clip-{i}.mp4")).collect();
    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();

    for concurrency in [1, 2, 4] {
        let harness = Harness::with_options(HarnessOptions {
            concurrency,
            gated: true,
            ..HarnessOptions::default()
        });
        for key in &keys {
            harness.land(key, vec![3; 16], "video/mp4");
        }

        let dispatcher = harness.dispatcher.clone();
        let batch = records(&keys);
        let handle = tokio::spawn(async move {
            dispatcher
                .dispatch_records(batch, &CancellationToken::new(), BatchReport::default())
                .await
        });

        tokio::time::timeout(
            Duration::from_secs(5),
            harness.temporary.wait_for_in_flight(concurrency),
        )
        .await
        .unwrap();
        // Let the dispatch loop run as far as it can while every slot is held.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert_eq!(harness.temporary.in_flight(), concurrency);

        harness.gate.as_ref().unwrap().open();
        let report = handle.await.unwrap().unwrap();

        assert_eq!(report.succeeded, 6);
        assert_eq!(harness.temporary.in_flight(), 0);
        assert_eq!(harness.temporary.max_in_flight(), concurrency);
    }
}

#[tokio::test]
async fn test_cancelled_batch_is_retryable() {
    let harness = Harness::new();
    harness.land("video/1/a.mp4", vec![1; 32], "video/mp4");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = harness
        .dispatcher
        .dispatch_records(records(&["video/1/a.mp4"]), &cancel, BatchReport::default())
        .await
        .unwrap_err();

    assert!(matches!(err.cause, FailureCause::Cancelled));
    assert!(err.is_retryable());
    assert_eq!(harness.permanent.uploads(), 0);
}

#[tokio::test]
async fn test_dispatch_parses_queue_bodies() {
    let harness = Harness::with_options(HarnessOptions {
        concurrency: 4,
        ..HarnessOptions::default()
    });
    harness.land("product-image/5/my photo.png", png(12, 12), "image/png");
    harness.land("video/5/intro.mp4", vec![9; 64], "video/mp4");

    let bodies = vec![
        s3_event(&["product-image/5/my photo.png", "video/5/intro.mp4"]),
        r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Bucket":"marketcast-landing"}"#
            .to_string(),
        "not json".to_string(),
    ];

    let report = harness
        .dispatcher
        .dispatch(&bodies, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        report,
        BatchReport {
            records: 2,
            succeeded: 2,
            ignored: 1,
            malformed: 1,
            ..BatchReport::default()
        }
    );
    assert!(harness.permanent.contains("product-image/5/my photo.webp"));
    assert!(harness.permanent.contains("video/5/intro.mp4"));
}
