//! Reporting over attribution runs: per-channel visit and conversion
//! summaries with CSV/JSON export.

pub mod channels;

pub use channels::{ChannelReport, ChannelRow};
