//! # Integration Tests
//!
//! Cross-crate scenarios for the delivery engine:
//! - queue caps loaded from configuration reach the store
//! - session-first delivery with a single worker
//! - durability across restarts (pending calls, snapshots)
//! - retry and 429 behaviour driven by a loaded configuration
//! - admission limits pulled from a configuration file

#[cfg(test)]
mod contract_tests {
    use std::sync::Arc;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{ConfigVersion, Destination, FakeClock, RecordingErrorSink};
    use storage::{PendingCallStore, StoreLayout};

    #[test]
    fn test_store_caps_follow_loaded_config() {
        let config = ConfigLoader::load_from_str(
            "version = \"V1\"\n\n[queue_limits]\nlogs = 3\n",
            ConfigFormat::Toml,
        )
        .unwrap();
        assert_eq!(config.version, ConfigVersion::V1);

        let dir = tempfile::tempdir().unwrap();
        let store = PendingCallStore::open(
            StoreLayout::new(dir.path()),
            config.queue_limits.clone(),
            Arc::new(FakeClock::new(0)),
            Arc::new(RecordingErrorSink::new()),
        )
        .unwrap();
        for destination in Destination::ALL {
            assert_eq!(store.max_pending(destination), config.max_pending(destination));
        }
        assert_eq!(store.max_pending(Destination::Logs), 3);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        DeliveryConfig, Destination, FakeClock, InternalErrorKind, RecordingErrorSink, Snapshot,
        TransportOutcome,
    };
    use delivery::transports::ScriptedTransport;
    use delivery::{DeliveryOrchestrator, DeliveryOrchestratorBuilder};
    use storage::{PendingCallStore, PeriodicSnapshotCache, StoreLayout};

    const START_MS: i64 = 1_700_000_000_000;

    /// One "process": store, orchestrator and transport over `root`
    struct Process {
        orchestrator: DeliveryOrchestrator<ScriptedTransport>,
        transport: Arc<ScriptedTransport>,
        clock: Arc<FakeClock>,
        sink: Arc<RecordingErrorSink>,
    }

    fn launch(root: &Path, config: &DeliveryConfig, transport: ScriptedTransport) -> Process {
        let clock = Arc::new(FakeClock::new(START_MS));
        let sink = Arc::new(RecordingErrorSink::new());
        let store = PendingCallStore::open(
            StoreLayout::new(root),
            config.queue_limits.clone(),
            clock.clone(),
            sink.clone(),
        )
        .unwrap();
        let transport = Arc::new(transport);
        let orchestrator = DeliveryOrchestratorBuilder::new()
            .config(config)
            .clock(clock.clone())
            .error_sink(sink.clone())
            .build(Arc::new(store), transport.clone())
            .unwrap();
        Process {
            orchestrator,
            transport,
            clock,
            sink,
        }
    }

    fn single_worker() -> DeliveryConfig {
        DeliveryConfig {
            workers: 1,
            ..Default::default()
        }
    }

    fn sent_bodies(transport: &ScriptedTransport) -> Vec<String> {
        transport
            .sent()
            .into_iter()
            .map(|sent| String::from_utf8(sent.payload.to_vec()).unwrap())
            .collect()
    }

    /// 3 session calls and 5 log calls, one worker, one cycle: every session
    /// is sent before any log, and nothing is left pending
    #[tokio::test]
    async fn test_sessions_first_single_worker_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let process = launch(dir.path(), &single_worker(), ScriptedTransport::always_success());

        let mut arrival = Vec::new();
        for i in 0..5 {
            arrival.push((Destination::Logs, format!("log-{i}")));
            if i < 3 {
                arrival.push((Destination::Sessions, format!("session-{i}")));
            }
        }
        for (destination, body) in &arrival {
            process
                .orchestrator
                .enqueue(*destination, body.as_bytes(), HashMap::new())
                .unwrap();
        }

        let report = process.orchestrator.run_cycle().await;
        assert_eq!(report.submitted, 8);
        assert_eq!(report.succeeded, 8);

        let sent = process.transport.sent();
        let first_log = sent
            .iter()
            .position(|call| call.destination == Destination::Logs)
            .unwrap();
        assert!(sent[..first_log]
            .iter()
            .all(|call| call.destination == Destination::Sessions));
        assert_eq!(first_log, 3);
        assert_eq!(
            sent_bodies(&process.transport)[..3],
            ["session-0", "session-1", "session-2"]
        );
        assert_eq!(process.orchestrator.store().total_pending(), 0);
        process.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_pending_calls_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = single_worker();

        {
            let first = launch(
                dir.path(),
                &config,
                ScriptedTransport::new("down", TransportOutcome::NoResponse),
            );
            first
                .orchestrator
                .enqueue(Destination::Crashes, b"crash", HashMap::new())
                .unwrap();
            first
                .orchestrator
                .enqueue(Destination::Logs, b"log", HashMap::new())
                .unwrap();

            // Collector unreachable: both calls stay queued for retry
            let report = first.orchestrator.run_cycle().await;
            assert_eq!(report.retried, 2);
            first.orchestrator.shutdown().await;
        }

        let second = launch(dir.path(), &config, ScriptedTransport::always_success());
        assert_eq!(second.orchestrator.resume().unwrap(), 2);

        // Retry bookkeeping is in memory only: reloaded calls are eligible now
        let report = second.orchestrator.run_cycle().await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(
            sent_bodies(&second.transport),
            vec!["crash".to_string(), "log".to_string()]
        );

        let third = launch(dir.path(), &config, ScriptedTransport::always_success());
        assert_eq!(third.orchestrator.resume().unwrap(), 0);
        second.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_payload_dropped_at_resume() {
        let dir = tempfile::tempdir().unwrap();
        let config = single_worker();

        let payload_path = {
            let first = launch(dir.path(), &config, ScriptedTransport::always_success());
            let kept = first
                .orchestrator
                .enqueue(Destination::Sessions, b"kept", HashMap::new())
                .unwrap();
            let lost = first
                .orchestrator
                .enqueue(Destination::Sessions, b"lost", HashMap::new())
                .unwrap();
            assert_ne!(kept.payload_ref, lost.payload_ref);
            first
                .orchestrator
                .store()
                .layout()
                .payload_path(Destination::Sessions, &lost.payload_ref)
        };
        std::fs::remove_file(payload_path).unwrap();

        let second = launch(dir.path(), &config, ScriptedTransport::always_success());
        assert_eq!(second.orchestrator.resume().unwrap(), 1);
        assert_eq!(second.orchestrator.metrics().dropped_corrupt(), 1);

        second.orchestrator.run_cycle().await;
        assert_eq!(sent_bodies(&second.transport), vec!["kept".to_string()]);
    }

    #[tokio::test]
    async fn test_loaded_retry_config_drives_backoff_and_blocking() {
        let config = ConfigLoader::load_from_str(
            r#"
workers = 1

[retry]
initial_backoff_ms = 2000
max_backoff_ms = 8000
min_retry_delay_ms = 500
max_attempts = 3
"#,
            ConfigFormat::Toml,
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let process = launch(dir.path(), &config, ScriptedTransport::always_success());
        process.transport.push_outcomes([
            TransportOutcome::TooManyRequests {
                destination: Destination::Logs,
                retry_after_ms: Some(100),
            },
            TransportOutcome::Failure {
                status_code: 500,
                headers: HashMap::new(),
            },
        ]);
        let call = process
            .orchestrator
            .enqueue(Destination::Logs, b"log", HashMap::new())
            .unwrap();

        // 429: hint floored at min_retry_delay_ms, destination blocked for the hint
        assert_eq!(process.orchestrator.run_cycle().await.retried, 1);
        assert_eq!(
            process.orchestrator.blocked_until(Destination::Logs),
            Some(START_MS + 100)
        );
        assert_eq!(process.orchestrator.next_wake_ms(), Some(START_MS + 100));

        process.clock.advance(100);
        assert_eq!(process.orchestrator.run_cycle().await.submitted, 0);
        assert_eq!(process.orchestrator.blocked_until(Destination::Logs), None);

        // 500: second failure, backoff 2000 * 2
        process.clock.advance(400);
        assert_eq!(process.orchestrator.run_cycle().await.retried, 1);
        assert_eq!(process.orchestrator.failed_attempts(&call), 2);
        assert_eq!(process.orchestrator.next_wake_ms(), Some(START_MS + 500 + 4000));

        process.clock.advance(4000);
        assert_eq!(process.orchestrator.run_cycle().await.succeeded, 1);
        assert_eq!(process.transport.sent_count(), 3);
        assert_eq!(process.sink.count(InternalErrorKind::DeliveryDropped), 0);
        process.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_snapshot_recovered_after_crash() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        let snapshot_path = layout.snapshot_path("session");

        {
            let sink = Arc::new(RecordingErrorSink::new());
            let cache = PeriodicSnapshotCache::new(&snapshot_path, sink);
            cache.start(Duration::from_secs(60), || {
                Some(Snapshot::new(Destination::Sessions, START_MS, &b"in-progress"[..]))
            });
            for _ in 0..50 {
                if cache.stats().written > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(cache.stats().written, 1);
            // Process dies: the cache is never told the session ended
            cache.shutdown_and_wait().await;
        }

        let process = launch(dir.path(), &single_worker(), ScriptedTransport::always_success());
        let cache = PeriodicSnapshotCache::new(&snapshot_path, process.sink.clone());
        let recovered = process.orchestrator.recover_snapshot(&cache).unwrap().unwrap();
        assert_eq!(recovered.destination, Destination::Sessions);
        assert!(cache.load_last().unwrap().is_none());

        process.orchestrator.run_cycle().await;
        assert_eq!(sent_bodies(&process.transport), vec!["in-progress".to_string()]);
        assert!(process.orchestrator.recover_snapshot(&cache).unwrap().is_none());
        process.orchestrator.shutdown().await;
    }
}

#[cfg(test)]
mod admission_tests {
    use std::sync::Arc;

    use config_loader::{ConfigLoader, FileConfigSource};
    use contracts::{InternalErrorKind, RecordingErrorSink};
    use delivery::RateLimiter;

    #[test]
    fn test_limits_follow_config_file_at_session_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("delivery.toml");
        std::fs::write(
            &path,
            "[rate_limits]\ndefault_limit = 2\n[rate_limits.domain_suffix_limits]\n\"example.com\" = 3\n",
        )
        .unwrap();

        let sink = Arc::new(RecordingErrorSink::new());
        let initial = ConfigLoader::load_from_path(&path).unwrap();
        let source = Arc::new(FileConfigSource::new(&path, initial, sink.clone()));
        let limiter = RateLimiter::new(source);

        let admitted = (0..5).filter(|_| limiter.admit("api.example.com")).count();
        assert_eq!(admitted, 3);
        assert!(limiter.admit("other.org"));
        assert!(limiter.admit("other.org"));
        assert!(!limiter.admit("other.org"));

        std::fs::write(&path, "[rate_limits]\ndefault_limit = 1\n").unwrap();
        limiter.reset();
        assert!(limiter.admit("api.example.com"));
        assert!(!limiter.admit("api.example.com"));

        // Broken file: last good limits stay in force and the failure is reported
        std::fs::write(&path, "[rate_limits\n").unwrap();
        limiter.reset();
        assert!(limiter.admit("api.example.com"));
        assert!(!limiter.admit("api.example.com"));
        assert_eq!(sink.count(InternalErrorKind::Config), 1);
    }
}
