use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::watch;

use crate::{format::AudioFormat, key::CacheKey};

/// How a completed synthesis attempt can be consumed by waiters.
#[derive(Debug, Clone)]
pub enum FlightOutcome {
    /// The entry is in the store under the flight's key.
    Published,
    /// Transcoding failed; the canonical audio is shared in memory and was
    /// not cached under the requested key.
    Fallback { format: AudioFormat, audio: Bytes },
    /// The engine overran its timeout and its worker is still running.
    EngineTimedOut(Duration),
}

type Slot = watch::Receiver<Option<FlightOutcome>>;

/// Registry of cache keys that currently have a synthesis in progress.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    slots: Arc<DashMap<CacheKey, Slot>>,
}

pub enum Admission {
    /// The caller owns the attempt for this key.
    Leader(FlightGuard),
    /// Another attempt is running; wait on it with [`FlightWaiter::wait`].
    Follower(FlightWaiter),
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, key: &CacheKey) -> Admission {
        match self.slots.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                vacant.insert(rx);
                Admission::Leader(FlightGuard {
                    key: key.clone(),
                    slots: Arc::clone(&self.slots),
                    tx,
                })
            }
            Entry::Occupied(occupied) => Admission::Follower(FlightWaiter {
                rx: occupied.get().clone(),
            }),
        }
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Marker for a running attempt. Dropping it (normally, on error, on panic or
/// when the owning task is cancelled) clears the key and wakes all waiters.
#[must_use = "dropping the guard immediately ends the flight"]
pub struct FlightGuard {
    key: CacheKey,
    slots: Arc<DashMap<CacheKey, Slot>>,
    tx: watch::Sender<Option<FlightOutcome>>,
}

impl FlightGuard {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Hand the result to current waiters. The key stays registered until
    /// the guard is dropped.
    pub fn complete(&self, outcome: FlightOutcome) {
        self.tx.send_replace(Some(outcome));
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // Runs before `tx` is dropped, so a woken waiter that retries never
        // finds the stale slot.
        self.slots.remove(&self.key);
    }
}

pub struct FlightWaiter {
    rx: Slot,
}

impl FlightWaiter {
    /// Wait for the leader to finish. `None` means the attempt ended without
    /// an outcome (it failed or was aborted) and the caller should retry.
    pub async fn wait(mut self) -> Option<FlightOutcome> {
        self.rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| outcome.clone())
    }
}
