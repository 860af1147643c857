use std::sync::{Arc, PoisonError, RwLock};

use spot_broadcast::{ParkingSnapshot, SpotStatus};

use crate::error::{Error, Result};

/// One consistent reading of the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    /// Number of completed ticks published so far.
    pub generation: u64,
    pub slots: Vec<Option<SpotStatus>>,
}

/// Latest status of every spot, one slot per spot in spot order.
///
/// Shared between the sampler, the broadcast path and the preview thread.
/// Writers replace the whole slot vector under one lock, so readers observe
/// either the previous tick or the new one, never a mix.
#[derive(Debug, Clone)]
pub struct StatusCache {
    inner: Arc<RwLock<StatusView>>,
}

impl StatusCache {
    pub fn new(spot_count: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StatusView {
                generation: 0,
                slots: vec![None; spot_count],
            })),
        }
    }

    pub fn len(&self) -> usize {
        self.view().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn view(&self) -> StatusView {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn slots(&self) -> Vec<Option<SpotStatus>> {
        self.view().slots
    }

    pub fn snapshot(&self) -> ParkingSnapshot {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        ParkingSnapshot::from_slots(&guard.slots)
    }

    /// Replace every slot at once and return the new generation.
    pub fn publish(&self, slots: Vec<Option<SpotStatus>>) -> Result<u64> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if slots.len() != guard.slots.len() {
            return Err(Error::SlotCount {
                expected: guard.slots.len(),
                actual: slots.len(),
            });
        }
        guard.slots = slots;
        guard.generation += 1;
        Ok(guard.generation)
    }
}
