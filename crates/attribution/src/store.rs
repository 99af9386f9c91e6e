//! Read-only query seam over the campaign event log.
//!
//! Both attribution stages talk to the log exclusively through
//! [`EventStore`], so the Postgres store and the in-memory index used by
//! tests and file replays are interchangeable.

use affiliate_core::{AffiliateResult, CampaignEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An attributable click paired with the identity resolved for its track.
///
/// `resolved_user_id` is only set on the latest click of a track; the
/// reducer carries it onto the merged visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedClick {
    pub click: CampaignEvent,
    pub resolved_user_id: Option<String>,
}

/// A (user, service) pair that paid after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCandidate {
    pub user_id: String,
    pub service_id: String,
    pub first_payment_date: DateTime<Utc>,
    /// Latest connect strictly before the first payment.
    pub connect_date: DateTime<Utc>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Attributable clicks with their track identity resolved.
    async fn attributable_clicks(&self) -> AffiliateResult<Vec<ResolvedClick>>;

    /// Pairs with a payment preceded by a connect, ordered by user then service.
    async fn chain_candidates(&self) -> AffiliateResult<Vec<ChainCandidate>>;

    /// Most recent click in `[from, to]` on a track identified as `user_id`.
    async fn latest_identified_click(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AffiliateResult<Option<CampaignEvent>>;

    /// Every payment of `user_id` on `service_id`, oldest first.
    async fn payments_for(
        &self,
        user_id: &str,
        service_id: &str,
    ) -> AffiliateResult<Vec<CampaignEvent>>;

    /// Release the underlying connection. Called once, at the end of the job.
    async fn close(&self);
}
