//! DeliveryOrchestrator - store, scheduler, transport and classifier glued together
//!
//! Per call: IDLE -> SCHEDULED -> IN_FLIGHT -> {SUCCEEDED, RETRY_QUEUED, DROPPED}.
//! Only terminal outcomes remove a call from the store. A retry-queued call
//! stays durable, leased back to the queue with its next retry time kept in
//! memory; after a restart it resumes at IDLE.
//!
//! One delivery cycle runs at a time. Intake wakes the background loop; a
//! wake-up during a cycle makes the loop run once more when it finishes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use contracts::{
    CallRef, Clock, DeliveryConfig, Destination, InternalErrorKind, InternalErrorSink,
    PayloadProducer, PendingCall, RetryConfig, SystemClock, Transport, TransportOutcome,
};
use scheduler::{PriorityScheduler, SessionFirst, Task};
use storage::{PendingCallStore, PeriodicSnapshotCache, StoreError};
use thiserror::Error;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::classifier::classify;
use crate::error::DeliveryError;
use crate::error_sink::LogErrorSink;
use crate::metrics::DeliveryMetrics;
use crate::retry::{RetryPolicy, RetryState};

/// Drop reasons used in logs and metrics
mod reason {
    pub const QUEUE_FULL: &str = "queue_full";
    pub const PAYLOAD_MISSING: &str = "payload_missing";
    pub const RETRIES_EXHAUSTED: &str = "retries_exhausted";
}

/// Where one attempt left its call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Succeeded,
    RetryQueued,
    Dropped,
    /// Not attempted (destination blocked, shutdown); back to IDLE
    Deferred,
}

/// Outcome counts of one delivery cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub submitted: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub dropped: usize,
    pub deferred: usize,
}

impl CycleReport {
    fn record(&mut self, transition: Transition) {
        match transition {
            Transition::Succeeded => self.succeeded += 1,
            Transition::RetryQueued => self.retried += 1,
            Transition::Dropped => self.dropped += 1,
            Transition::Deferred => self.deferred += 1,
        }
    }
}

/// Terminal outcome reported to the internal-error sink
#[derive(Debug, Error)]
#[error("call '{payload_ref}' to {destination} dropped: {reason}")]
struct DroppedCall {
    destination: Destination,
    payload_ref: CallRef,
    reason: String,
}

/// Delivery task ended without reporting back
#[derive(Debug, Error)]
#[error("delivery task for '{payload_ref}' ended without a result")]
struct LostTask {
    payload_ref: CallRef,
}

/// Retry bookkeeping of one call leased back to its queue
#[derive(Debug, Clone, Copy)]
struct QueuedRetry {
    destination: Destination,
    state: RetryState,
}

#[derive(Debug, Default)]
struct DeliveryState {
    retries: HashMap<CallRef, QueuedRetry>,
    blocked_until: HashMap<Destination, i64>,
}

impl DeliveryState {
    /// Block end of `destination` if it is still in the future
    fn active_block(&self, destination: Destination, now: i64) -> Option<i64> {
        self.blocked_until
            .get(&destination)
            .copied()
            .filter(|until| *until > now)
    }
}

struct Inner<T> {
    store: Arc<PendingCallStore>,
    scheduler: PriorityScheduler<SessionFirst>,
    transport: Arc<T>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    error_sink: Arc<dyn InternalErrorSink>,
    metrics: Arc<DeliveryMetrics>,
    state: Mutex<DeliveryState>,
    wake: Notify,
    cycle: tokio::sync::Mutex<()>,
    shutdown: AtomicBool,
}

/// Builder for creating a DeliveryOrchestrator
pub struct DeliveryOrchestratorBuilder {
    workers: usize,
    retry: RetryConfig,
    clock: Arc<dyn Clock>,
    error_sink: Arc<dyn InternalErrorSink>,
    metrics: Arc<DeliveryMetrics>,
}

impl DeliveryOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            workers: 2,
            retry: RetryConfig::default(),
            clock: Arc::new(SystemClock),
            error_sink: Arc::new(LogErrorSink),
            metrics: Arc::new(DeliveryMetrics::new()),
        }
    }

    /// Take worker count and retry policy from `config`
    pub fn config(mut self, config: &DeliveryConfig) -> Self {
        self.workers = config.workers;
        self.retry = config.retry.clone();
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn error_sink(mut self, error_sink: Arc<dyn InternalErrorSink>) -> Self {
        self.error_sink = error_sink;
        self
    }

    pub fn metrics(mut self, metrics: Arc<DeliveryMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Build the orchestrator. Must be called within a tokio runtime.
    ///
    /// The background loop is not started; see
    /// [`DeliveryOrchestrator::start`].
    #[instrument(name = "delivery_builder_build", skip_all, fields(workers = self.workers))]
    pub fn build<T>(
        self,
        store: Arc<PendingCallStore>,
        transport: Arc<T>,
    ) -> Result<DeliveryOrchestrator<T>, DeliveryError>
    where
        T: Transport + Sync + 'static,
    {
        let scheduler = PriorityScheduler::new("delivery", self.workers)?;
        Ok(DeliveryOrchestrator {
            inner: Arc::new(Inner {
                store,
                scheduler,
                transport,
                policy: RetryPolicy::new(self.retry),
                clock: self.clock,
                error_sink: self.error_sink,
                metrics: self.metrics,
                state: Mutex::new(DeliveryState::default()),
                wake: Notify::new(),
                cycle: tokio::sync::Mutex::new(()),
                shutdown: AtomicBool::new(false),
            }),
            loop_handle: Mutex::new(None),
        })
    }
}

impl Default for DeliveryOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DeliveryOrchestrator<T> {
    inner: Arc<Inner<T>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T> DeliveryOrchestrator<T>
where
    T: Transport + Sync + 'static,
{
    pub fn store(&self) -> &Arc<PendingCallStore> {
        &self.inner.store
    }

    pub fn metrics(&self) -> &Arc<DeliveryMetrics> {
        &self.inner.metrics
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.inner.transport
    }

    /// Reload calls persisted by a previous process. Returns how many resumed.
    #[instrument(name = "delivery_resume", skip(self))]
    pub fn resume(&self) -> Result<usize, DeliveryError> {
        let before = self.inner.store.dropped_corrupt();
        let loaded = self.inner.store.load_all().inspect_err(|e| {
            self.inner
                .error_sink
                .track_internal_error(InternalErrorKind::StoreLoad, e);
        })?;

        self.inner
            .metrics
            .add_dropped_corrupt(self.inner.store.dropped_corrupt().saturating_sub(before));
        self.inner.lock_state().retries.clear();

        let resumed = loaded.values().map(Vec::len).sum();
        info!(resumed, "Pending calls resumed");
        self.inner.wake.notify_one();
        Ok(resumed)
    }

    /// Durably enqueue a payload and wake the delivery loop.
    ///
    /// Returns once the payload is on disk. A persistence failure is
    /// returned to the caller, never reported as success.
    pub fn enqueue(
        &self,
        destination: Destination,
        payload: &[u8],
        metadata: HashMap<String, String>,
    ) -> Result<PendingCall, DeliveryError> {
        let inner = &self.inner;
        if inner.is_shut_down() {
            return Err(DeliveryError::ShutDown);
        }

        let enqueued = match inner.store.enqueue(destination, payload, metadata) {
            Ok(enqueued) => enqueued,
            Err(e) => {
                inner.metrics.inc_enqueue_failures();
                warn!(destination = %destination, error = %e, "Enqueue failed");
                inner
                    .error_sink
                    .track_internal_error(InternalErrorKind::StoreWrite, &e);
                return Err(e.into());
            }
        };

        if let Some(evicted) = &enqueued.evicted {
            inner.lock_state().retries.remove(&evicted.payload_ref);
            inner.metrics.inc_dropped();
            observability::record_call_dropped(destination, reason::QUEUE_FULL);
        }

        inner.metrics.inc_enqueued();
        observability::record_call_enqueued(destination);
        inner.wake.notify_one();
        Ok(enqueued.call)
    }

    /// Enqueue the next payload offered by `producer`, if any
    pub fn intake(
        &self,
        producer: &dyn PayloadProducer,
    ) -> Result<Option<PendingCall>, DeliveryError> {
        match producer.assemble_payload() {
            Some(payload) => self
                .enqueue(payload.destination, &payload.bytes, payload.metadata)
                .map(Some),
            None => Ok(None),
        }
    }

    /// Enqueue the snapshot left by a previous process, then clear it
    pub fn recover_snapshot(
        &self,
        cache: &PeriodicSnapshotCache,
    ) -> Result<Option<PendingCall>, DeliveryError> {
        let Some(snapshot) = cache.load_last()? else {
            return Ok(None);
        };
        let call = self.enqueue(snapshot.destination, &snapshot.payload, snapshot.metadata)?;
        cache.clear()?;
        info!(payload_ref = %call.payload_ref, destination = %call.destination, "Recovered snapshot enqueued");
        Ok(Some(call))
    }

    /// Run one delivery cycle and wait for all of its attempts.
    ///
    /// Dequeues every eligible call (destination not blocked, retry time
    /// reached) and submits them as one batch.
    pub async fn run_cycle(&self) -> CycleReport {
        Inner::run_cycle(&self.inner).await
    }

    /// Earliest time (ms) at which deferred work becomes eligible
    pub fn next_wake_ms(&self) -> Option<i64> {
        self.inner.next_wake_ms()
    }

    /// Failed attempts recorded for `call` in this process
    pub fn failed_attempts(&self, call: &PendingCall) -> u32 {
        self.inner
            .lock_state()
            .retries
            .get(&call.payload_ref)
            .map_or(0, |retry| retry.state.failed_attempts)
    }

    /// Time until which `destination` is blocked after a 429, if it is
    pub fn blocked_until(&self, destination: Destination) -> Option<i64> {
        let now = self.inner.clock.now_ms();
        self.inner.lock_state().active_block(destination, now)
    }

    /// Start the background delivery loop (no-op if already running)
    pub fn start(&self) {
        let mut handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() || self.inner.is_shut_down() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *handle = Some(tokio::spawn(async move { Inner::run_loop(inner).await }));
        info!("Delivery loop started");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Stop accepting payloads, drop scheduled work and wait for in-flight
    /// attempts. Idempotent.
    #[instrument(name = "delivery_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        let first = !self.inner.shutdown.swap(true, Ordering::SeqCst);
        self.inner.wake.notify_one();

        let dropped = self.inner.scheduler.shutdown().await;
        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Delivery loop ended abnormally");
            }
        }

        if first {
            info!(dropped_tasks = dropped, metrics = ?self.inner.metrics.snapshot(), "Delivery orchestrator shut down");
        }
    }
}

impl<T> Inner<T>
where
    T: Transport + Sync + 'static,
{
    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> MutexGuard<'_, DeliveryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_loop(inner: Arc<Self>) {
        loop {
            if inner.is_shut_down() {
                break;
            }
            let report = Self::run_cycle(&inner).await;
            if report.submitted > 0 {
                debug!(?report, "Delivery cycle finished");
            }
            if inner.is_shut_down() {
                break;
            }

            match inner.next_wake_ms() {
                Some(wake_ms) => {
                    let delay_ms = wake_ms.saturating_sub(inner.clock.now_ms()).max(0);
                    let delay = Duration::from_millis(u64::try_from(delay_ms).unwrap_or(0));
                    tokio::select! {
                        _ = inner.wake.notified() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => inner.wake.notified().await,
            }
        }
        debug!("Delivery loop stopped");
    }

    #[instrument(name = "delivery_cycle", skip(inner))]
    async fn run_cycle(inner: &Arc<Self>) -> CycleReport {
        let _cycle = inner.cycle.lock().await;
        let mut report = CycleReport::default();
        if inner.is_shut_down() {
            return report;
        }

        let batch = inner.collect_eligible();
        if batch.is_empty() {
            return report;
        }

        let mut tasks: Vec<(SessionFirst, Task)> = Vec::with_capacity(batch.len());
        let mut waiting = Vec::with_capacity(batch.len());
        for call in batch {
            let (tx, rx) = oneshot::channel();
            let key = SessionFirst::new(call.is_session_payload());
            let task_inner = Arc::clone(inner);
            let task_call = call.clone();
            let task: Task = Box::pin(async move {
                let transition = task_inner.attempt(task_call).await;
                let _ = tx.send(transition);
            });
            tasks.push((key, task));
            waiting.push((call, rx));
        }

        report.submitted = waiting.len();
        if let Err(e) = inner.scheduler.submit_batch(tasks) {
            // Shut down between collecting and submitting
            debug!(error = %e, "Batch not submitted");
            for (call, _) in &waiting {
                inner.store.release(call);
            }
            report.deferred = report.submitted;
            return report;
        }

        for (call, rx) in waiting {
            match rx.await {
                Ok(transition) => report.record(transition),
                Err(_) => {
                    // Dropped by shutdown or the task panicked; the call stays durable
                    inner.store.release(&call);
                    if !inner.is_shut_down() {
                        let e = LostTask {
                            payload_ref: call.payload_ref.clone(),
                        };
                        inner
                            .error_sink
                            .track_internal_error(InternalErrorKind::DeliveryTask, &e);
                    }
                    report.record(Transition::Deferred);
                }
            }
        }

        report
    }

    /// Lease every call that may be attempted now, sessions first
    fn collect_eligible(&self) -> Vec<PendingCall> {
        let now = self.clock.now_ms();
        let (retry_times, blocked) = {
            let state = self.lock_state();
            let retry_times: HashMap<CallRef, i64> = state
                .retries
                .iter()
                .map(|(payload_ref, retry)| (payload_ref.clone(), retry.state.next_retry_time_ms))
                .collect();
            let blocked: Vec<Destination> = state
                .blocked_until
                .iter()
                .filter(|(_, until)| **until > now)
                .map(|(destination, _)| *destination)
                .collect();
            (retry_times, blocked)
        };

        let mut batch = Vec::new();
        for destination in Destination::ALL {
            if blocked.contains(&destination) {
                continue;
            }
            while let Some(call) = self.store.dequeue_next_where(destination, |call| {
                retry_times
                    .get(&call.payload_ref)
                    .is_none_or(|retry_at| *retry_at <= now)
            }) {
                batch.push(call);
            }
        }
        batch
    }

    /// One transport attempt for `call` and the resulting transition
    #[instrument(
        name = "delivery_attempt",
        skip(self, call),
        fields(destination = %call.destination, payload_ref = %call.payload_ref)
    )]
    async fn attempt(&self, call: PendingCall) -> Transition {
        let destination = call.destination;
        if self.is_shut_down() || self.is_blocked(destination) {
            self.store.release(&call);
            return Transition::Deferred;
        }

        let payload: Bytes = match self.store.load_payload(&call) {
            Ok(payload) => payload,
            Err(StoreError::PayloadMissing { .. }) => {
                return self.drop_call(&call, reason::PAYLOAD_MISSING);
            }
            Err(e) => {
                self.error_sink
                    .track_internal_error(InternalErrorKind::StoreLoad, &e);
                return self.schedule_retry(&call, None);
            }
        };

        let outcome = self
            .transport
            .send(destination, payload, &call.metadata)
            .await;
        observability::record_delivery_outcome(destination, outcome.label());
        self.update_block(destination, &outcome);

        let decision = classify(&outcome);
        if decision.retry {
            debug!(outcome = outcome.label(), "Retryable outcome");
            return self.schedule_retry(&call, decision.retry_after_ms);
        }

        if outcome.is_delivered() {
            match self.store.remove(&call) {
                Ok(_) => {
                    self.lock_state().retries.remove(&call.payload_ref);
                    self.metrics.inc_delivered();
                    Transition::Succeeded
                }
                Err(e) => {
                    // Delivered but still durable: it will be sent again
                    warn!(error = %e, "Failed to remove delivered call");
                    self.error_sink
                        .track_internal_error(InternalErrorKind::StoreWrite, &e);
                    self.store.release(&call);
                    Transition::Deferred
                }
            }
        } else {
            self.drop_call(&call, outcome.label())
        }
    }

    fn schedule_retry(&self, call: &PendingCall, retry_after_ms: Option<i64>) -> Transition {
        let now = self.clock.now_ms();
        let next = {
            let mut state = self.lock_state();
            let previous = state
                .retries
                .get(&call.payload_ref)
                .map(|retry| retry.state)
                .unwrap_or_default();
            let next = self.policy.next_state(previous, now, retry_after_ms);
            if !self.policy.is_exhausted(next.failed_attempts) {
                let retry = QueuedRetry {
                    destination: call.destination,
                    state: next,
                };
                state.retries.insert(call.payload_ref.clone(), retry);
            }
            next
        };

        if self.policy.is_exhausted(next.failed_attempts) {
            return self.drop_call(call, reason::RETRIES_EXHAUSTED);
        }

        self.store.release(call);
        self.metrics.inc_retried();
        let delay_ms = next.next_retry_time_ms.saturating_sub(now).max(0) as u64;
        observability::record_retry_scheduled(call.destination, delay_ms);
        debug!(
            failed_attempts = next.failed_attempts,
            delay_ms,
            "Retry scheduled"
        );
        Transition::RetryQueued
    }

    fn drop_call(&self, call: &PendingCall, reason: &str) -> Transition {
        if let Err(e) = self.store.remove(call) {
            warn!(error = %e, "Failed to remove dropped call");
            self.error_sink
                .track_internal_error(InternalErrorKind::StoreWrite, &e);
            self.store.release(call);
            return Transition::Deferred;
        }

        self.lock_state().retries.remove(&call.payload_ref);
        self.metrics.inc_dropped();
        observability::record_call_dropped(call.destination, reason);

        let dropped = DroppedCall {
            destination: call.destination,
            payload_ref: call.payload_ref.clone(),
            reason: reason.to_string(),
        };
        warn!(reason, "Call dropped");
        self.error_sink
            .track_internal_error(InternalErrorKind::DeliveryDropped, &dropped);
        Transition::Dropped
    }

    fn is_blocked(&self, destination: Destination) -> bool {
        let now = self.clock.now_ms();
        self.lock_state().active_block(destination, now).is_some()
    }

    /// A 429 with a hint blocks the destination; any non-429 outcome clears it
    fn update_block(&self, destination: Destination, outcome: &TransportOutcome) {
        let mut state = self.lock_state();
        match outcome {
            TransportOutcome::TooManyRequests {
                retry_after_ms: Some(retry_after_ms),
                ..
            } => {
                let until = self.clock.now_ms().saturating_add((*retry_after_ms).max(0));
                info!(destination = %destination, until, "Destination blocked by 429");
                state.blocked_until.insert(destination, until);
            }
            TransportOutcome::TooManyRequests { .. } => {}
            _ => {
                state.blocked_until.remove(&destination);
            }
        }
    }

    /// A retry on a blocked destination cannot run before the block ends,
    /// so a past retry time never wakes the loop while nothing is eligible.
    fn next_wake_ms(&self) -> Option<i64> {
        let now = self.clock.now_ms();
        let state = self.lock_state();
        let retry_wake = state.retries.values().map(|retry| {
            match state.active_block(retry.destination, now) {
                Some(until) => retry.state.next_retry_time_ms.max(until),
                None => retry.state.next_retry_time_ms,
            }
        });
        let block_wake = Destination::ALL
            .into_iter()
            .filter_map(|destination| state.active_block(destination, now));
        retry_wake.chain(block_wake).min()
    }
}
