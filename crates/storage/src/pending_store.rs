//! PendingCallStore - durable per-destination queue of outgoing calls
//!
//! Write ordering is what keeps the store consistent across a crash:
//! - enqueue: payload file (fsync) first, then the index record
//! - remove: index record first, then the payload file
//!
//! A crash between the two steps leaves at worst an orphaned payload file,
//! which [`PendingCallStore::sweep_orphans`] deletes. An index record never
//! points at a payload that was deleted on purpose.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use contracts::{
    CallRef, Clock, Destination, InternalErrorKind, InternalErrorSink, PendingCall,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::layout::{remove_if_exists, write_atomic, write_durable};
use crate::{StoreError, StoreLayout};

/// On-disk index of one destination, oldest call first
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    #[serde(default)]
    calls: Vec<PendingCall>,
}

#[derive(Debug)]
struct Entry {
    call: PendingCall,
    /// Handed out by `dequeue_next` and not yet removed or released
    leased: bool,
}

type Queues = HashMap<Destination, VecDeque<Entry>>;

/// Result of a successful enqueue
#[derive(Debug, Clone)]
pub struct Enqueued {
    /// The durable call
    pub call: PendingCall,
    /// Oldest call evicted because the destination was at its cap
    pub evicted: Option<PendingCall>,
}

pub struct PendingCallStore {
    layout: StoreLayout,
    limits: HashMap<Destination, usize>,
    queues: Mutex<Queues>,
    clock: Arc<dyn Clock>,
    error_sink: Arc<dyn InternalErrorSink>,
    dropped_corrupt: AtomicU64,
}

impl PendingCallStore {
    /// Open a store rooted at `layout`, creating its directories.
    ///
    /// The in-memory queue starts empty; call [`Self::load_all`] to resume
    /// calls persisted by a previous process.
    pub fn open(
        layout: StoreLayout,
        limits: HashMap<Destination, usize>,
        clock: Arc<dyn Clock>,
        error_sink: Arc<dyn InternalErrorSink>,
    ) -> Result<Self, StoreError> {
        layout.ensure_dirs()?;
        Ok(Self {
            layout,
            limits,
            queues: Mutex::new(HashMap::new()),
            clock,
            error_sink,
            dropped_corrupt: AtomicU64::new(0),
        })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Cap on pending calls for `destination`
    pub fn max_pending(&self, destination: Destination) -> usize {
        self.limits
            .get(&destination)
            .copied()
            .unwrap_or_else(|| destination.default_max_pending())
    }

    /// Index entries dropped at load time because their payload was missing
    pub fn dropped_corrupt(&self) -> u64 {
        self.dropped_corrupt.load(Ordering::Relaxed)
    }

    /// Durably enqueue `payload` for `destination`.
    ///
    /// Returns only once both the payload file and the index record are on
    /// disk. On error nothing was enqueued.
    #[instrument(name = "store_enqueue", skip(self, payload, metadata), fields(destination = %destination, bytes = payload.len()))]
    pub fn enqueue(
        &self,
        destination: Destination,
        payload: &[u8],
        metadata: HashMap<String, String>,
    ) -> Result<Enqueued, StoreError> {
        let now_ms = self.clock.now_ms();
        let payload_ref = CallRef::from(format!("{now_ms}-{}", Uuid::new_v4().simple()));
        let call = PendingCall {
            destination,
            payload_ref,
            metadata,
            enqueue_time_ms: now_ms,
        };

        let payload_path = self.layout.payload_path(destination, &call.payload_ref);
        let mut queues = self.lock();

        write_durable(&payload_path, payload)?;

        let queue = queues.entry(destination).or_default();
        queue.push_back(Entry {
            call: call.clone(),
            leased: false,
        });

        let evicted = if queue.len() > self.max_pending(destination) {
            Self::evict_oldest(queue)
        } else {
            None
        };

        if let Err(e) = self.persist_index(destination, queue) {
            // Undo in memory so the index on disk stays authoritative
            queue.retain(|entry| entry.call != call);
            if let Some(evicted) = &evicted {
                queue.push_front(Entry {
                    call: evicted.clone(),
                    leased: false,
                });
            }
            let _ = remove_if_exists(&payload_path);
            return Err(e);
        }

        if let Some(evicted) = &evicted {
            let path = self.layout.payload_path(destination, &evicted.payload_ref);
            if let Err(e) = remove_if_exists(&path) {
                warn!(error = %e, "Failed to delete evicted payload, left for orphan sweep");
            }
            warn!(payload_ref = %evicted.payload_ref, "Queue full, evicted oldest pending call");
        }

        debug!(payload_ref = %call.payload_ref, pending = queue.len(), "Call enqueued");
        Ok(Enqueued { call, evicted })
    }

    /// Lease the oldest call of `destination` that is not already in flight.
    ///
    /// The call stays durable until [`Self::remove`]; [`Self::release`]
    /// makes it eligible again.
    pub fn dequeue_next(&self, destination: Destination) -> Option<PendingCall> {
        self.dequeue_next_where(destination, |_| true)
    }

    /// Like [`Self::dequeue_next`], skipping calls rejected by `eligible`
    pub fn dequeue_next_where(
        &self,
        destination: Destination,
        eligible: impl Fn(&PendingCall) -> bool,
    ) -> Option<PendingCall> {
        let mut queues = self.lock();
        let entry = queues
            .get_mut(&destination)?
            .iter_mut()
            .find(|entry| !entry.leased && eligible(&entry.call))?;
        entry.leased = true;
        Some(entry.call.clone())
    }

    /// Return a leased call to the queue (retry later)
    pub fn release(&self, call: &PendingCall) {
        let mut queues = self.lock();
        if let Some(entry) = queues
            .get_mut(&call.destination)
            .and_then(|queue| queue.iter_mut().find(|entry| entry.call == *call))
        {
            entry.leased = false;
        }
    }

    /// Durably remove `call`. Returns false if it was not queued.
    ///
    /// The call is gone once its index is rewritten. Failing to delete the
    /// payload file afterwards is logged, not returned.
    #[instrument(name = "store_remove", skip(self, call), fields(destination = %call.destination, payload_ref = %call.payload_ref))]
    pub fn remove(&self, call: &PendingCall) -> Result<bool, StoreError> {
        let mut queues = self.lock();
        let Some(queue) = queues.get_mut(&call.destination) else {
            return Ok(false);
        };
        let Some(position) = queue.iter().position(|entry| entry.call == *call) else {
            return Ok(false);
        };

        let entry = queue.remove(position);
        if let Err(e) = self.persist_index(call.destination, queue) {
            if let Some(entry) = entry {
                queue.insert(position, entry);
            }
            return Err(e);
        }

        // The index no longer lists the call; a leftover payload is an orphan
        let payload_path = self.layout.payload_path(call.destination, &call.payload_ref);
        if let Err(e) = remove_if_exists(&payload_path) {
            warn!(error = %e, "Payload left behind for the orphan sweep");
        }
        Ok(true)
    }

    /// Read the payload bytes of `call`
    pub fn load_payload(&self, call: &PendingCall) -> Result<Bytes, StoreError> {
        let path = self.layout.payload_path(call.destination, &call.payload_ref);
        match fs::read(&path) {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::PayloadMissing {
                payload_ref: call.payload_ref.to_string(),
            }),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Number of calls queued for `destination` (leased ones included)
    pub fn pending_count(&self, destination: Destination) -> usize {
        self.lock().get(&destination).map_or(0, VecDeque::len)
    }

    /// Number of calls queued across all destinations
    pub fn total_pending(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    /// Calls queued for `destination`, oldest first
    pub fn pending_calls(&self, destination: Destination) -> Vec<PendingCall> {
        self.lock()
            .get(&destination)
            .map(|queue| queue.iter().map(|entry| entry.call.clone()).collect())
            .unwrap_or_default()
    }

    /// Reload every destination from disk, replacing the in-memory queue.
    ///
    /// Index entries whose payload file is missing are dropped and the
    /// index rewritten. A corrupt index is moved aside and its destination
    /// starts empty. An index that cannot be read is left alone: its
    /// destination starts empty for this process and keeps its payload
    /// files. Orphaned payload files of the other destinations are deleted
    /// afterwards.
    #[instrument(name = "store_load_all", skip(self))]
    pub fn load_all(&self) -> Result<HashMap<Destination, Vec<PendingCall>>, StoreError> {
        let mut loaded = HashMap::new();
        let mut unreadable = Vec::new();
        {
            let mut queues = self.lock();
            queues.clear();

            for destination in Destination::ALL {
                let Some(calls) = self.read_index(destination) else {
                    unreadable.push(destination);
                    queues.insert(destination, VecDeque::new());
                    loaded.insert(destination, Vec::new());
                    continue;
                };
                let (present, missing): (Vec<_>, Vec<_>) = calls.into_iter().partition(|call| {
                    call.destination == destination
                        && call.payload_ref.is_file_safe()
                        && self
                            .layout
                            .payload_path(destination, &call.payload_ref)
                            .exists()
                });

                let queue: VecDeque<Entry> = present
                    .iter()
                    .cloned()
                    .map(|call| Entry {
                        call,
                        leased: false,
                    })
                    .collect();

                if !missing.is_empty() {
                    for call in &missing {
                        warn!(destination = %destination, payload_ref = %call.payload_ref, "Dropping index entry without payload");
                        observability::record_call_dropped(destination, "corrupt");
                    }
                    self.dropped_corrupt
                        .fetch_add(missing.len() as u64, Ordering::Relaxed);
                    self.persist_index(destination, &queue)?;
                }

                observability::record_queue_depth(destination, queue.len());
                queues.insert(destination, queue);
                loaded.insert(destination, present);
            }
        }

        let swept = self.sweep_orphans_except(&unreadable)?;
        let total: usize = loaded.values().map(Vec::len).sum();
        info!(pending = total, orphans_removed = swept, skipped = ?unreadable, "Pending calls loaded");
        Ok(loaded)
    }

    /// Delete payload files with no index entry. Returns how many were removed.
    pub fn sweep_orphans(&self) -> Result<usize, StoreError> {
        self.sweep_orphans_except(&[])
    }

    fn sweep_orphans_except(&self, skip: &[Destination]) -> Result<usize, StoreError> {
        let queues = self.lock();
        let mut removed = 0;

        for destination in Destination::ALL {
            if skip.contains(&destination) {
                continue;
            }
            let dir = self.layout.payload_dir(destination);
            let read_dir = match fs::read_dir(&dir) {
                Ok(read_dir) => read_dir,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(dir, e)),
            };

            let queue = queues.get(&destination);
            for dir_entry in read_dir {
                let path = dir_entry.map_err(|e| StoreError::io(&dir, e))?.path();
                let indexed = StoreLayout::payload_ref_of(&path).is_some_and(|payload_ref| {
                    queue.is_some_and(|queue| {
                        queue.iter().any(|entry| entry.call.payload_ref == payload_ref)
                    })
                });
                if !indexed {
                    debug!(path = %path.display(), "Removing orphaned payload");
                    remove_if_exists(&path)?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    /// Calls listed in the index of `destination`, or None if it could not be read
    fn read_index(&self, destination: Destination) -> Option<Vec<PendingCall>> {
        let path = self.layout.index_path(destination);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Some(Vec::new()),
            Err(e) => {
                self.report_load_error(&StoreError::io(&path, e));
                return None;
            }
        };

        match serde_json::from_slice::<IndexFile>(&content) {
            Ok(index) => Some(index.calls),
            Err(e) => {
                let error = StoreError::CorruptIndex {
                    path: path.clone(),
                    message: e.to_string(),
                };
                self.report_load_error(&error);
                let _ = fs::rename(&path, path.with_extension("json.corrupt"));
                Some(Vec::new())
            }
        }
    }

    fn report_load_error(&self, error: &StoreError) {
        warn!(error = %error, "Failed to read pending-call index");
        self.error_sink
            .track_internal_error(InternalErrorKind::StoreLoad, error);
    }

    fn persist_index(
        &self,
        destination: Destination,
        queue: &VecDeque<Entry>,
    ) -> Result<(), StoreError> {
        let index = IndexFile {
            calls: queue.iter().map(|entry| entry.call.clone()).collect(),
        };
        let bytes = serde_json::to_vec_pretty(&index)?;
        write_atomic(&self.layout.index_path(destination), &bytes)?;
        observability::record_queue_depth(destination, queue.len());
        Ok(())
    }

    /// Drop the oldest entry, preferring one that is not in flight
    fn evict_oldest(queue: &mut VecDeque<Entry>) -> Option<PendingCall> {
        let position = queue.iter().position(|entry| !entry.leased).unwrap_or(0);
        queue.remove(position).map(|entry| entry.call)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
