//! Affiliate attribution: rebuilds visits and visit → connect → payment
//! conversion chains from the append-only campaign event log.

#![warn(clippy::unwrap_used)]

pub mod chains;
pub mod job;
pub mod memory;
pub mod postgres;
pub mod reducer;
pub mod store;
pub mod visits;

pub use chains::{ChainBuilder, ChainPass};
pub use job::load_chains_and_visits;
pub use memory::InMemoryEventStore;
pub use postgres::PgEventStore;
pub use store::{ChainCandidate, EventStore, ResolvedClick};
pub use visits::VisitAggregator;
