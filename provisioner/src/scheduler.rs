//! The poll loop.
//!
//! Every tick fetches the pending nodes and the ready-but-unattached nodes
//! from the record store and spawns one task per node that is not already in
//! flight. A failed fetch ends the loop; a failed step only ends its task.
//!
//! A node whose previous step finished while its list was being fetched is
//! left for the next tick: the fetched copy predates what that step wrote.

use std::{future::Future, sync::Arc, time::Duration};

use shared_types::StorageNode;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cluster::Cluster;
use crate::flight::{Flight, FlightMark, FlightTracker, Refused};
use crate::reconcile::{Progress, ReconcileError, Reconciler};
use crate::record_store::{RecordStore, RecordStoreError};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("could not fetch {what} from the record store: {source}")]
    Fetch {
        what: &'static str,
        #[source]
        source: RecordStoreError,
    },
}

/// What one tick dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub steps: usize,
    pub attachments: usize,
    pub skipped: usize,
}

pub struct Scheduler<C> {
    reconciler: Arc<Reconciler<C>>,
    store: Arc<dyn RecordStore>,
    flights: FlightTracker,
    interval: Duration,
}

impl<C: Cluster> Scheduler<C> {
    pub fn new(
        reconciler: Arc<Reconciler<C>>,
        store: Arc<dyn RecordStore>,
        flights: FlightTracker,
        interval: Duration,
    ) -> Self {
        Self {
            reconciler,
            store,
            flights,
            interval,
        }
    }

    pub fn flights(&self) -> &FlightTracker {
        &self.flights
    }

    /// Tick forever. Returns only when a fetch fails.
    pub async fn run(&self) -> Result<(), SchedulerError> {
        info!(interval_ms = self.interval.as_millis() as u64, "scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!("scheduler stopping: {e}");
                return Err(e);
            }
        }
    }

    pub async fn tick(&self) -> Result<TickSummary, SchedulerError> {
        let mut summary = TickSummary::default();

        let mark = self.flights.mark();
        self.flights.forget_released_before(mark);
        let pending = self
            .store
            .pending_nodes()
            .await
            .map_err(|source| SchedulerError::Fetch {
                what: "pending nodes",
                source,
            })?;
        for node in pending {
            if self.dispatch_step(node, mark).is_some() {
                summary.steps += 1;
            } else {
                summary.skipped += 1;
            }
        }

        let mark = self.flights.mark();
        let unattached = self
            .store
            .ready_unattached_nodes()
            .await
            .map_err(|source| SchedulerError::Fetch {
                what: "ready unattached nodes",
                source,
            })?;
        for node in unattached {
            if self.dispatch_attach(node, mark).is_some() {
                summary.attachments += 1;
            } else {
                summary.skipped += 1;
            }
        }

        if summary != TickSummary::default() {
            debug!(
                steps = summary.steps,
                attachments = summary.attachments,
                skipped = summary.skipped,
                in_flight = self.flights.len(),
                "tick"
            );
        }
        Ok(summary)
    }

    fn dispatch_step(&self, node: StorageNode, mark: FlightMark) -> Option<JoinHandle<()>> {
        let flight = self.start(node.id, &node.shortcode, Some(mark))?;
        let reconciler = Arc::clone(&self.reconciler);
        Some(spawn_in_flight(flight, async move {
            let outcome = reconciler.step(&node).await;
            report(&node, "step", outcome);
        }))
    }

    fn dispatch_attach(&self, node: StorageNode, mark: FlightMark) -> Option<JoinHandle<()>> {
        let flight = self.start(node.id, &node.shortcode, Some(mark))?;
        let reconciler = Arc::clone(&self.reconciler);
        Some(spawn_in_flight(flight, async move {
            let outcome = reconciler.attach_gateways(&node).await;
            report(&node, "gateways", outcome);
        }))
    }

    /// Spawn `work` while holding the node's flight, or return `None` if the
    /// node is already in flight or the cap is reached.
    pub fn dispatch<F>(&self, id: Uuid, shortcode: &str, work: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let flight = self.start(id, shortcode, None)?;
        Some(spawn_in_flight(flight, work))
    }

    fn start(&self, id: Uuid, shortcode: &str, since: Option<FlightMark>) -> Option<Flight> {
        let claimed = match since {
            Some(mark) => self.flights.try_start_after(id, mark),
            None => self.flights.try_start(id),
        };
        match claimed {
            Ok(flight) => Some(flight),
            Err(Refused::InFlight) => {
                debug!(shortcode, "previous step still running, skipping");
                None
            }
            Err(Refused::AtCapacity) => {
                debug!(shortcode, "in-flight limit reached, deferring");
                None
            }
            Err(Refused::Stale) => {
                debug!(shortcode, "step finished during the fetch, waiting for a fresh copy");
                None
            }
        }
    }
}

fn spawn_in_flight<F>(flight: Flight, work: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let _flight = flight;
        work.await;
    })
}

fn report(node: &StorageNode, pass: &'static str, outcome: Result<Progress, ReconcileError>) {
    let shortcode = node.shortcode.as_str();
    match outcome {
        Ok(Progress::Waiting(reason)) => debug!(shortcode, pass, %reason, "waiting"),
        Ok(Progress::Advanced(status)) => debug!(shortcode, pass, %status, "advanced"),
        Ok(Progress::Gateways { activated }) => debug!(shortcode, pass, activated, "gateways updated"),
        Ok(Progress::Idle) => {}
        Err(e) if e.is_transient() => warn!(shortcode, pass, "will retry: {e}"),
        Err(e) => error!(node_id = %node.id, shortcode, pass, "needs attention: {e}"),
    }
}
