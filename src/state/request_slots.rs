//! At-most-one in-flight request per logical conversation slot.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct ActiveRequest {
    generation: u64,
    token: CancellationToken,
}

/// Registry of in-flight requests keyed by slot, owned by the dispatch
/// loop and shared by reference.
#[derive(Default)]
pub struct RequestSlots {
    active: Mutex<FxHashMap<String, ActiveRequest>>,
    generation: AtomicU64,
}

impl RequestSlots {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request for `slot`, cancelling whatever request was
    /// still running there.
    pub fn begin(&self, slot: &str) -> SlotLease<'_> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let previous = self.active.lock().insert(
            slot.to_string(),
            ActiveRequest {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(slot, generation = previous.generation, "cancelling superseded request");
            previous.token.cancel();
        }
        SlotLease {
            slots: self,
            slot: slot.to_string(),
            generation,
            token,
        }
    }

    /// Cancel the in-flight request for `slot`, if any.
    pub fn cancel(&self, slot: &str) -> bool {
        match self.active.lock().remove(slot) {
            Some(active) => {
                active.token.cancel();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_active(&self, slot: &str) -> bool {
        self.active.lock().contains_key(slot)
    }

    fn release(&self, slot: &str, generation: u64) {
        let mut active = self.active.lock();
        if active
            .get(slot)
            .is_some_and(|current| current.generation == generation)
        {
            active.remove(slot);
        }
    }
}

/// Handle for one registered request. Dropping it unregisters the request,
/// unless a newer request already took the slot.
pub struct SlotLease<'a> {
    slots: &'a RequestSlots,
    slot: String,
    generation: u64,
    token: CancellationToken,
}

impl SlotLease<'_> {
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[must_use]
    pub fn slot(&self) -> &str {
        &self.slot
    }
}

impl Drop for SlotLease<'_> {
    fn drop(&mut self) {
        self.slots.release(&self.slot, self.generation);
    }
}
