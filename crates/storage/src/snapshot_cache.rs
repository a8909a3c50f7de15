//! PeriodicSnapshotCache - timer-driven crash-recovery snapshots
//!
//! One tokio task per started cache. Every tick runs the snapshot function
//! and the file write on the blocking pool, so a slow disk never stalls the
//! runtime and a panicking snapshot function only loses that tick.
//!
//! File format: one JSON header line (destination, metadata, capture time)
//! followed by the raw payload bytes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use contracts::{InternalErrorKind, InternalErrorSink, Snapshot};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::layout::{remove_if_exists, write_atomic};
use crate::StoreError;

/// Shortest accepted tick period
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Copyable view of the cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub written: u64,
    pub skipped: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    written: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct Shared {
    path: PathBuf,
    background: AtomicBool,
    dirty: AtomicBool,
    counters: Counters,
    error_sink: Arc<dyn InternalErrorSink>,
    /// Held while a snapshot file is written; every task shares the tmp path
    write_lock: Mutex<()>,
}

pub struct PeriodicSnapshotCache {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
    /// Tasks of replaced cycles that may still be finishing an invocation
    retired: Mutex<Vec<JoinHandle<()>>>,
}

impl PeriodicSnapshotCache {
    /// Create a cache writing to `path` (see `StoreLayout::snapshot_path`)
    pub fn new(path: impl Into<PathBuf>, error_sink: Arc<dyn InternalErrorSink>) -> Self {
        Self {
            shared: Arc::new(Shared {
                path: path.into(),
                background: AtomicBool::new(false),
                dirty: AtomicBool::new(false),
                counters: Counters::default(),
                error_sink,
                write_lock: Mutex::new(()),
            }),
            running: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Start invoking `snapshot_fn` every `interval`, first tick immediately.
    ///
    /// Replaces any cycle started earlier; [`Self::shutdown_and_wait`] still
    /// waits for the replaced task. A zero interval is raised to 1 ms. Must
    /// be called within a tokio runtime.
    pub fn start<F>(&self, interval: Duration, snapshot_fn: F)
    where
        F: Fn() -> Option<Snapshot> + Send + Sync + 'static,
    {
        let interval = if interval < MIN_INTERVAL {
            warn!(interval_ms = interval.as_millis() as u64, "Snapshot interval too short, using 1ms");
            MIN_INTERVAL
        } else {
            interval
        };

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = running.take() {
            // Finishes its current invocation, if any, then exits
            previous.stop.send_replace(true);
            let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
            retired.retain(|handle| !handle.is_finished());
            retired.push(previous.handle);
        }

        let (stop, stop_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let snapshot_fn = Arc::new(snapshot_fn);
        let handle = tokio::spawn(run_loop(shared, interval, snapshot_fn, stop_rx));

        info!(path = %self.shared.path.display(), interval_ms = interval.as_millis() as u64, "Snapshot cache started");
        *running = Some(Running { stop, handle });
    }

    /// Cancel the pending tick. An invocation already running completes.
    pub fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = running.as_ref() {
            running.stop.send_replace(true);
        }
    }

    /// Stop and wait until every snapshot task, replaced ones included,
    /// has fully exited.
    ///
    /// Idempotent.
    pub async fn shutdown_and_wait(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut handles = std::mem::take(
            &mut *self.retired.lock().unwrap_or_else(PoisonError::into_inner),
        );

        if let Some(Running { stop, handle }) = running {
            stop.send_replace(true);
            handles.push(handle);
        }
        if handles.is_empty() {
            return;
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Snapshot task ended abnormally");
            }
        }
        debug!(path = %self.shared.path.display(), "Snapshot cache shut down");
    }

    /// Whether a cycle is currently scheduled
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|running| !*running.stop.borrow() && !running.handle.is_finished())
    }

    /// Mark the process as backgrounded (only dirty state is snapshotted)
    pub fn set_background(&self, background: bool) {
        self.shared.background.store(background, Ordering::SeqCst);
    }

    /// Note that the in-progress payload changed since the last snapshot
    pub fn report_state_change(&self) {
        self.shared.dirty.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> SnapshotStats {
        let counters = &self.shared.counters;
        SnapshotStats {
            written: counters.written.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Last durably written snapshot, if any
    pub fn load_last(&self) -> Result<Option<Snapshot>, StoreError> {
        let path = &self.shared.path;
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };

        let split = content
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| StoreError::CorruptIndex {
                path: path.clone(),
                message: "missing snapshot header".to_string(),
            })?;

        let mut snapshot: Snapshot = serde_json::from_slice(&content[..split])?;
        snapshot.payload = Bytes::copy_from_slice(&content[split + 1..]);
        Ok(Some(snapshot))
    }

    /// Delete the snapshot file (after it was recovered)
    pub fn clear(&self) -> Result<(), StoreError> {
        remove_if_exists(&self.shared.path)
    }
}

async fn run_loop<F>(
    shared: Arc<Shared>,
    interval: Duration,
    snapshot_fn: Arc<F>,
    mut stop_rx: watch::Receiver<bool>,
) where
    F: Fn() -> Option<Snapshot> + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.wait_for(|stopped| *stopped) => break,
            _ = ticker.tick() => {}
        }
        if *stop_rx.borrow() {
            break;
        }
        run_once(&shared, &snapshot_fn).await;
    }
}

async fn run_once<F>(shared: &Arc<Shared>, snapshot_fn: &Arc<F>)
where
    F: Fn() -> Option<Snapshot> + Send + Sync + 'static,
{
    let was_dirty = shared.dirty.swap(false, Ordering::SeqCst);
    if shared.background.load(Ordering::SeqCst) && !was_dirty {
        shared.counters.skipped.fetch_add(1, Ordering::Relaxed);
        observability::record_snapshot("skipped");
        return;
    }

    let snapshot_fn = Arc::clone(snapshot_fn);
    let writer = Arc::clone(shared);
    let result = tokio::task::spawn_blocking(move || match snapshot_fn() {
        Some(snapshot) => {
            let _guard = writer.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            write_snapshot(&writer.path, &snapshot).map(|()| true)
        }
        None => Ok(false),
    })
    .await;

    match result {
        Ok(Ok(true)) => {
            shared.counters.written.fetch_add(1, Ordering::Relaxed);
            observability::record_snapshot("written");
        }
        Ok(Ok(false)) => {
            shared.counters.skipped.fetch_add(1, Ordering::Relaxed);
            observability::record_snapshot("empty");
        }
        Ok(Err(e)) => {
            restore_dirty(shared, was_dirty);
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            observability::record_snapshot("failed");
            warn!(error = %e, "Snapshot write failed, skipping cycle");
            shared
                .error_sink
                .track_internal_error(InternalErrorKind::SnapshotWrite, &e);
        }
        Err(join_error) => {
            restore_dirty(shared, was_dirty);
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            observability::record_snapshot("panicked");
            let e = StoreError::SnapshotPanic {
                message: join_error.to_string(),
            };
            error!(error = %e, "Snapshot function panicked");
            shared
                .error_sink
                .track_internal_error(InternalErrorKind::SnapshotPanic, &e);
        }
    }
}

fn restore_dirty(shared: &Shared, was_dirty: bool) {
    if was_dirty {
        shared.dirty.store(true, Ordering::SeqCst);
    }
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    let mut bytes = serde_json::to_vec(snapshot)?;
    bytes.push(b'\n');
    bytes.extend_from_slice(&snapshot.payload);
    write_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Destination, RecordingErrorSink};
    use std::sync::atomic::AtomicUsize;

    fn cache_in(dir: &Path) -> (PeriodicSnapshotCache, Arc<RecordingErrorSink>) {
        let sink = Arc::new(RecordingErrorSink::new());
        let cache = PeriodicSnapshotCache::new(dir.join("snapshots/session.snapshot"), sink.clone());
        (cache, sink)
    }

    fn session_snapshot(body: &'static [u8]) -> Snapshot {
        Snapshot::new(Destination::Sessions, 42, Bytes::from_static(body))
    }

    #[tokio::test]
    async fn test_first_tick_is_immediate_and_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_in(dir.path());

        cache.start(Duration::from_secs(3600), || Some(session_snapshot(b"{\"spans\":[]}")));
        tokio::time::sleep(Duration::from_millis(200)).await;
        cache.shutdown_and_wait().await;

        let recovered = cache.load_last().unwrap().unwrap();
        assert_eq!(recovered.destination, Destination::Sessions);
        assert_eq!(recovered.taken_at_ms, 42);
        assert_eq!(recovered.payload, Bytes::from_static(b"{\"spans\":[]}"));
        assert_eq!(cache.stats().written, 1);

        cache.clear().unwrap();
        assert!(cache.load_last().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_panicking_snapshot_does_not_stop_future_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, sink) = cache_in(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        cache.start(Duration::from_millis(20), move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("snapshot exploded");
            }
            Some(session_snapshot(b"ok"))
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        cache.shutdown_and_wait().await;

        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(sink.count(InternalErrorKind::SnapshotPanic), 1);
        assert!(cache.stats().written >= 1);
    }

    #[tokio::test]
    async fn test_write_failure_is_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        // Parent of the snapshot path is a regular file, so writes fail
        fs::write(dir.path().join("snapshots"), b"not a dir").unwrap();
        let (cache, sink) = cache_in(dir.path());

        cache.start(Duration::from_millis(20), || Some(session_snapshot(b"x")));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.shutdown_and_wait().await;

        assert!(sink.count(InternalErrorKind::SnapshotWrite) >= 1);
        assert_eq!(cache.stats().written, 0);
    }

    #[tokio::test]
    async fn test_background_skips_unless_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_in(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        cache.set_background(true);

        let counter = Arc::clone(&calls);
        cache.start(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(session_snapshot(b"bg"))
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        cache.report_state_change();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.shutdown_and_wait().await;

        // Exactly one write for one state change
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.stats().skipped >= 1);
    }

    #[tokio::test]
    async fn test_stop_and_shutdown_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_in(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        cache.start(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        cache.stop();
        cache.stop();
        cache.shutdown_and_wait().await;
        cache.shutdown_and_wait().await;
        assert!(!cache.is_running());

        let after_stop = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_stop_waits_for_running_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_in(dir.path());

        cache.start(Duration::from_secs(3600), || {
            std::thread::sleep(Duration::from_millis(100));
            Some(session_snapshot(b"slow"))
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.stop();
        cache.shutdown_and_wait().await;

        // The in-flight write was allowed to finish
        assert_eq!(cache.stats().written, 1);
        assert!(cache.load_last().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_replaced_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_in(dir.path());
        let finished = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&finished);
        cache.start(Duration::from_secs(3600), move || {
            std::thread::sleep(Duration::from_millis(300));
            flag.store(true, Ordering::SeqCst);
            Some(session_snapshot(b"first"))
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        cache.start(Duration::from_secs(3600), || Some(session_snapshot(b"second")));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.shutdown_and_wait().await;

        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(cache.stats().written, 2);
        assert!(cache.load_last().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_zero_interval_is_raised_to_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_in(dir.path());

        cache.start(Duration::ZERO, || Some(session_snapshot(b"fast")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.shutdown_and_wait().await;

        assert!(cache.stats().written >= 1);
        assert_eq!(cache.load_last().unwrap().unwrap().payload, Bytes::from_static(b"fast"));
    }
}
