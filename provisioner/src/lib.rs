//! Storage node provisioner.
//!
//! Polls the record store for nodes that need work and reconciles each one
//! against the cluster, its own node API and the prime funding node.

pub mod api;
pub mod cluster;
pub mod config;
pub mod connector;
pub mod flight;
pub mod funding;
pub mod naming;
pub mod node_api;
pub mod reconcile;
pub mod record_store;
pub mod scheduler;
pub mod state;

pub use state::AppState;
