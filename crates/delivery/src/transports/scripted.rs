//! ScriptedTransport - returns queued outcomes and records every call

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use contracts::{Destination, Transport, TransportOutcome};

/// One call observed by [`ScriptedTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCall {
    pub destination: Destination,
    pub payload: Bytes,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug)]
struct Script {
    queued: VecDeque<TransportOutcome>,
    fallback: TransportOutcome,
    sent: Vec<SentCall>,
}

/// Transport driven by a script of outcomes.
///
/// Queued outcomes are returned in order; once exhausted every call gets
/// the fallback outcome.
#[derive(Debug)]
pub struct ScriptedTransport {
    name: String,
    delay: Duration,
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new(name: impl Into<String>, fallback: TransportOutcome) -> Self {
        Self {
            name: name.into(),
            delay: Duration::ZERO,
            script: Mutex::new(Script {
                queued: VecDeque::new(),
                fallback,
                sent: Vec::new(),
            }),
        }
    }

    /// Transport that always reports success
    pub fn always_success() -> Self {
        Self::new(
            "scripted",
            TransportOutcome::Success {
                body: Bytes::new(),
                headers: HashMap::new(),
            },
        )
    }

    /// Simulated network latency per call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue outcomes for the next calls
    pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = TransportOutcome>) {
        self.lock().queued.extend(outcomes);
    }

    pub fn set_fallback(&self, fallback: TransportOutcome) {
        self.lock().fallback = fallback;
    }

    /// Calls observed so far, in send order
    pub fn sent(&self) -> Vec<SentCall> {
        self.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.lock().sent.len()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(
        &self,
        destination: Destination,
        payload: Bytes,
        metadata: &HashMap<String, String>,
    ) -> TransportOutcome {
        let outcome = {
            let mut script = self.lock();
            script.sent.push(SentCall {
                destination,
                payload,
                metadata: metadata.clone(),
            });
            script
                .queued
                .pop_front()
                .unwrap_or_else(|| script.fallback.clone())
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        outcome
    }
}
