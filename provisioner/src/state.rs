use std::time::Instant;

use crate::flight::FlightTracker;

/// Shared state for the admin API.
pub struct AppState {
    pub flights: FlightTracker,
    pub started_at: Instant,
}
