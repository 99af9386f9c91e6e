pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{AffiliateError, AffiliateResult};
pub use types::{CampaignEvent, Chain, EventType, JobOutput, Visit};
