//! Visit aggregation: one identity-resolved visit per tracking lineage.

use affiliate_core::{AffiliateResult, Visit};
use tracing::{debug, info};

use crate::reducer::reduce_by_track;
use crate::store::EventStore;

/// Builds the per-track visit list. Store failures are fatal for this stage.
pub struct VisitAggregator<'a, S: EventStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: EventStore + ?Sized> VisitAggregator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn aggregate(&self) -> AffiliateResult<Vec<Visit>> {
        let rows = self.store.attributable_clicks().await?;
        let clicks = rows.len();
        debug!(clicks, "Loaded attributable clicks");

        let visits = reduce_by_track(rows);
        let identified = visits.iter().filter(|v| v.user_id.is_some()).count();

        metrics::counter!("attribution.visits").increment(visits.len() as u64);
        info!(
            clicks,
            visits = visits.len(),
            identified,
            "Visits aggregated"
        );
        Ok(visits)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::InMemoryEventStore;
    use affiliate_core::{CampaignEvent, EventType};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap() + Duration::days(offset)
    }

    #[tokio::test]
    async fn test_clicks_without_affiliate_are_excluded() {
        let store = InMemoryEventStore::new(vec![
            CampaignEvent::new(1, EventType::Click, day(0))
                .with_track("t1")
                .with_campaign("c1", ""),
            CampaignEvent::new(2, EventType::Click, day(0)).with_track("t2"),
            CampaignEvent::new(3, EventType::Click, day(0))
                .with_track("t3")
                .with_campaign("c1", "a1"),
        ]);

        let visits = VisitAggregator::new(&store).aggregate().await.unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].track_id.as_deref(), Some("t3"));
    }

    #[tokio::test]
    async fn test_anonymous_and_identified_visits() {
        let store = InMemoryEventStore::new(vec![
            CampaignEvent::new(1, EventType::Click, day(0))
                .with_track("t1")
                .with_campaign("c1", "a1")
                .with_sub_track("banner"),
            CampaignEvent::new(2, EventType::Identify, day(1))
                .with_track("t1")
                .with_user("u1"),
            CampaignEvent::new(3, EventType::Click, day(2))
                .with_track("t2")
                .with_campaign("c2", "a1"),
            CampaignEvent::new(4, EventType::Identify, day(2))
                .with_track("t2")
                .with_user(""),
            CampaignEvent::new(5, EventType::Payment, day(3))
                .with_user("u1")
                .with_service("s1"),
        ]);

        let visits = VisitAggregator::new(&store).aggregate().await.unwrap();
        assert_eq!(visits.len(), 2);
        assert_eq!(visits[0].user_id.as_deref(), Some("u1"));
        assert_eq!(visits[0].sub_track_id.as_deref(), Some("banner"));
        assert_eq!(visits[1].user_id, None);
    }

    #[tokio::test]
    async fn test_empty_log_yields_no_visits() {
        let store = InMemoryEventStore::default();
        let visits = VisitAggregator::new(&store).aggregate().await.unwrap();
        assert!(visits.is_empty());
    }
}
