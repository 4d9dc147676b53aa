use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use figment::providers::{Format, Serialized, Toml};
use figment::Figment;

use ragdb_core::config::{expand_path, resolve_with_base, Config, StoreConfig};
use ragdb_core::progress::{Progress, ProgressTracker};
use ragdb_core::retry::{RetryConfig, RetryExecutor};
use ragdb_core::types::{Document, MetadataValue, StoredRow};
use ragdb_core::{CancellationToken, Error};

fn fast_retry(max_attempts: u32) -> RetryExecutor {
    RetryExecutor::new(RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
    })
}

#[tokio::test]
async fn retry_succeeds_after_transient_failures() {
    let executor = fast_retry(3);
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let cancel = CancellationToken::new();

    let out = executor
        .run(&cancel, "flaky", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::storage("add", "connection reset"))
            } else {
                Ok(n)
            }
        })
        .await
        .expect("third attempt succeeds");

    assert_eq!(out, 2);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(executor.retries(), 2, "attempts-1 retries recorded");
}

#[tokio::test]
async fn retry_never_repeats_permanent_errors() {
    let executor = fast_retry(5);
    let counter = AtomicU32::new(0);
    let calls = &counter;
    let cancel = CancellationToken::new();

    let err = executor
        .run(&cancel, "parse", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::storage("query", "failed to parse predicate"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Storage { .. }), "original error returned: {err}");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(executor.retries(), 0);
}

#[tokio::test]
async fn retry_exhaustion_wraps_last_error() {
    let executor = fast_retry(2);
    let cancel = CancellationToken::new();

    let err = executor
        .run(&cancel, "down", || async { Err::<(), _>(Error::storage("add", "timeout")) })
        .await
        .unwrap_err();

    let msg = err.to_string();
    assert!(msg.contains("max retry attempts (2) exceeded"), "{msg}");
    assert!(msg.contains("timeout"), "last error carried: {msg}");
}

#[tokio::test]
async fn retry_backoff_is_cancellable() {
    let executor = RetryExecutor::new(RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(30),
        multiplier: 1.0,
    });
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = executor
        .run(&cancel, "slow", || async { Err::<(), _>(Error::storage("add", "busy")) })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5), "sleep interrupted promptly");
}

#[test]
fn progress_reports_every_mutation() {
    let seen: Arc<Mutex<Vec<Progress>>> = Arc::default();
    let sink = seen.clone();
    let tracker = ProgressTracker::new(
        4,
        Some(Arc::new(move |p: &Progress| sink.lock().expect("lock").push(p.clone()))),
    );

    tracker.set_stage("inserting");
    tracker.add(2);
    let mid = tracker.snapshot();
    assert_eq!(mid.percent(), 50.0);
    assert!(!mid.is_complete());

    tracker.set_message("batch 2");
    tracker.complete();

    let seen = seen.lock().expect("lock");
    assert_eq!(seen.len(), 4, "one callback per mutation");
    assert_eq!(seen[1].current, 2);
    assert_eq!(seen[2].message, "batch 2");
    assert!(seen[3].is_complete());
    assert_eq!(seen[3].stage, "complete");
}

#[test]
fn progress_with_unknown_total_is_zero_percent() {
    let tracker = ProgressTracker::new(0, None);
    tracker.add(10);
    let p = tracker.snapshot();
    assert_eq!(p.percent(), 0.0);
    assert_eq!(p.estimated_remaining(), Duration::ZERO);
    tracker.advance_to(3);
    assert_eq!(tracker.snapshot().current, 10, "advance_to never moves backwards");
}

#[test]
fn progress_elapsed_keeps_running_between_updates() {
    let tracker = ProgressTracker::new(10, None);
    tracker.add(1);
    let snapshot = tracker.snapshot();
    let first = snapshot.elapsed();
    let eta = snapshot.estimated_remaining();

    std::thread::sleep(Duration::from_millis(30));
    assert!(snapshot.elapsed() >= first + Duration::from_millis(30));
    assert!(snapshot.estimated_remaining() > eta, "rate is recomputed against the clock");
}

#[test]
fn store_config_merges_toml_over_defaults() {
    let figment = Figment::from(Serialized::defaults(StoreConfig::default())).merge(Toml::string(
        r#"
            embedding_dim = 4
            max_documents_for_bm25 = 2

            [retry]
            max_attempts = 7
            initial_delay = 25
        "#,
    ));
    let cfg = Config::from_figment(figment).store().expect("valid config");

    assert_eq!(cfg.embedding_dim, 4);
    assert_eq!(cfg.max_documents_for_bm25, 2);
    assert_eq!(cfg.max_batch_size, 1000, "default kept");
    assert_eq!(cfg.retry.max_attempts, 7);
    assert_eq!(cfg.retry.initial_delay, Duration::from_millis(25));
}

#[test]
fn store_config_reads_app_env_vars() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("config.toml", "embedding_dim = 8\n")?;
        jail.set_env("RUST_ENV", "test");
        jail.set_env("APP_POOL_SIZE", "2");
        jail.set_env("APP_RETRY__MAX_ATTEMPTS", "9");
        let cfg = Config::load().map_err(|e| e.to_string())?.store().map_err(|e| e.to_string())?;
        assert_eq!(cfg.embedding_dim, 8);
        assert_eq!(cfg.pool_size, 2);
        assert_eq!(cfg.retry.max_attempts, 9);
        Ok(())
    });
}

#[test]
fn store_config_rejects_zero_dimension() {
    let cfg = StoreConfig { embedding_dim: 0, ..StoreConfig::default() };
    assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
}

#[test]
fn paths_expand_relative_to_base() {
    let tmp = tempfile::TempDir::new().expect("tempdir");
    let resolved = resolve_with_base(tmp.path(), "db/tenants");
    assert_eq!(resolved, tmp.path().join("db/tenants"));
    assert!(expand_path("/abs/path").is_absolute());
}

#[test]
fn stored_row_round_trips_typed_metadata() {
    let doc = Document::new("a", "alpha", vec![1.0, 0.0])
        .with_source("guide.md")
        .with_metadata("page", 3_i64)
        .with_metadata("score", 0.5_f64)
        .with_metadata("draft", false)
        .with_metadata("author", "kim");

    let row = StoredRow::from_document(&doc).expect("encode");
    let back = row.into_document().expect("decode");

    assert_eq!(back, doc);
    assert_eq!(back.metadata.get("page"), Some(&MetadataValue::Integer(3)));
}
