//! Tracks which nodes currently have a reconciliation step running.
//!
//! A node id is claimed before its step is spawned and released when the
//! returned [`Flight`] guard drops, whether the step finished, failed or
//! panicked. An optional cap bounds how many nodes may be in flight at once.
//!
//! Every release is stamped on a logical clock. A caller that read a node
//! before taking a [`FlightMark`] can ask [`FlightTracker::try_start_after`]
//! to refuse nodes whose last flight ended after the mark: its copy of the
//! node predates whatever that flight wrote.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refused {
    /// A step for this node is still running.
    InFlight,
    /// The global cap is reached.
    AtCapacity,
    /// A step for this node finished after the caller's mark.
    Stale,
}

/// A point on the release clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FlightMark(u64);

#[derive(Clone, Default)]
pub struct FlightTracker {
    in_flight: Arc<DashSet<Uuid>>,
    released: Arc<DashMap<Uuid, u64>>,
    clock: Arc<AtomicU64>,
    slots: Option<Arc<Semaphore>>,
    limit: Option<usize>,
}

/// Point-in-time view for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct FlightSnapshot {
    pub in_flight: Vec<Uuid>,
    pub limit: Option<usize>,
}

impl FlightTracker {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            in_flight: Arc::new(DashSet::new()),
            released: Arc::new(DashMap::new()),
            clock: Arc::new(AtomicU64::new(0)),
            slots: limit.map(|n| Arc::new(Semaphore::new(n))),
            limit,
        }
    }

    pub fn mark(&self) -> FlightMark {
        FlightMark(self.clock.load(Ordering::SeqCst))
    }

    /// Drop release stamps that no check against `mark` or later can trip on.
    pub fn forget_released_before(&self, mark: FlightMark) {
        self.released.retain(|_, stamp| *stamp > mark.0);
    }

    pub fn try_start(&self, id: Uuid) -> Result<Flight, Refused> {
        self.claim(id, None)
    }

    /// Like [`try_start`](Self::try_start), but also refuses a node whose
    /// previous flight was released after `mark`.
    pub fn try_start_after(&self, id: Uuid, mark: FlightMark) -> Result<Flight, Refused> {
        self.claim(id, Some(mark))
    }

    fn claim(&self, id: Uuid, since: Option<FlightMark>) -> Result<Flight, Refused> {
        if !self.in_flight.insert(id) {
            return Err(Refused::InFlight);
        }
        // Releases stamp before leaving `in_flight`, so the stamp of the
        // flight we just replaced is visible here.
        if let Some(mark) = since {
            let stale = self
                .released
                .get(&id)
                .is_some_and(|stamp| *stamp > mark.0);
            if stale {
                self.in_flight.remove(&id);
                return Err(Refused::Stale);
            }
        }
        let permit = match &self.slots {
            Some(slots) => match Arc::clone(slots).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.in_flight.remove(&id);
                    return Err(Refused::AtCapacity);
                }
            },
            None => None,
        };
        Ok(Flight {
            id,
            in_flight: Arc::clone(&self.in_flight),
            released: Arc::clone(&self.released),
            clock: Arc::clone(&self.clock),
            _permit: permit,
        })
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.in_flight.contains(id)
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn snapshot(&self) -> FlightSnapshot {
        let mut in_flight: Vec<Uuid> = self.in_flight.iter().map(|id| *id).collect();
        in_flight.sort();
        FlightSnapshot {
            in_flight,
            limit: self.limit,
        }
    }
}

/// Claim on a node id; released on drop.
pub struct Flight {
    id: Uuid,
    in_flight: Arc<DashSet<Uuid>>,
    released: Arc<DashMap<Uuid, u64>>,
    clock: Arc<AtomicU64>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Drop for Flight {
    fn drop(&mut self) {
        let stamp = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.released.insert(self.id, stamp);
        self.in_flight.remove(&self.id);
    }
}
