//! In-memory event index implementing [`EventStore`].
//!
//! Answers the same four queries as the Postgres store with plain scans over
//! a shared event vector. Used by the test suites and for replaying an
//! exported event file without a database.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use affiliate_core::{AffiliateResult, CampaignEvent, EventType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::store::{ChainCandidate, EventStore, ResolvedClick};

/// Cloning shares the same events and close counter.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<Vec<CampaignEvent>>,
    closes: Arc<AtomicUsize>,
}

impl InMemoryEventStore {
    pub fn new(events: Vec<CampaignEvent>) -> Self {
        Self {
            events: Arc::new(events),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Load a JSON array of events, e.g. an export of `marketing.campaign_events`.
    pub fn from_json_reader(reader: impl std::io::Read) -> AffiliateResult<Self> {
        let events: Vec<CampaignEvent> = serde_json::from_reader(reader)?;
        debug!(count = events.len(), "Loaded events into memory store");
        Ok(Self::new(events))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> AffiliateResult<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_json_reader(std::io::BufReader::new(file))
    }

    pub fn events(&self) -> &[CampaignEvent] {
        &self.events
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn of_type(&self, event_type: EventType) -> impl Iterator<Item = &CampaignEvent> {
        self.events.iter().filter(move |e| e.event_type == event_type)
    }

    /// Highest identified user per track.
    fn track_identities(&self) -> HashMap<&str, &str> {
        let mut identities: HashMap<&str, &str> = HashMap::new();
        for identify in self.of_type(EventType::Identify) {
            let (Some(track), Some(user)) = (identify.track(), identify.user()) else {
                continue;
            };
            let entry = identities.entry(track).or_insert(user);
            if user > *entry {
                *entry = user;
            }
        }
        identities
    }

    /// Highest click event id per track, attributable or not.
    fn latest_clicks(&self) -> HashMap<&str, i64> {
        let mut latest: HashMap<&str, i64> = HashMap::new();
        for click in self.of_type(EventType::Click) {
            if let Some(track) = click.track() {
                let entry = latest.entry(track).or_insert(click.event_id);
                *entry = (*entry).max(click.event_id);
            }
        }
        latest
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn attributable_clicks(&self) -> AffiliateResult<Vec<ResolvedClick>> {
        let identities = self.track_identities();
        let latest = self.latest_clicks();

        let mut rows: Vec<ResolvedClick> = self
            .events
            .iter()
            .filter(|e| e.is_attributable_click())
            .map(|click| {
                let resolved_user_id = click
                    .track()
                    .filter(|track| latest.get(track) == Some(&click.event_id))
                    .and_then(|track| identities.get(track))
                    .map(|user| user.to_string());
                ResolvedClick {
                    click: click.clone(),
                    resolved_user_id,
                }
            })
            .collect();
        rows.sort_by_key(|r| r.click.event_id);
        Ok(rows)
    }

    async fn chain_candidates(&self) -> AffiliateResult<Vec<ChainCandidate>> {
        let mut first_payments: BTreeMap<(&str, &str), DateTime<Utc>> = BTreeMap::new();
        for payment in self.of_type(EventType::Payment) {
            let (Some(user), Some(service)) = (payment.user(), payment.service()) else {
                continue;
            };
            first_payments
                .entry((user, service))
                .and_modify(|date| *date = (*date).min(payment.event_date))
                .or_insert(payment.event_date);
        }

        let candidates = first_payments
            .into_iter()
            .filter_map(|((user, service), first_payment_date)| {
                let connect_date = self
                    .of_type(EventType::Connect)
                    .filter(|c| c.user() == Some(user) && c.service() == Some(service))
                    .filter(|c| c.event_date < first_payment_date)
                    .map(|c| c.event_date)
                    .max()?;
                Some(ChainCandidate {
                    user_id: user.to_string(),
                    service_id: service.to_string(),
                    first_payment_date,
                    connect_date,
                })
            })
            .collect();
        Ok(candidates)
    }

    async fn latest_identified_click(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AffiliateResult<Option<CampaignEvent>> {
        let tracks: HashSet<&str> = self
            .of_type(EventType::Identify)
            .filter(|e| e.user() == Some(user_id))
            .filter_map(|e| e.track())
            .collect();

        let visit = self
            .of_type(EventType::Click)
            .filter(|c| c.event_date >= from && c.event_date <= to)
            .filter(|c| c.track().is_some_and(|t| tracks.contains(t)))
            .max_by_key(|c| (c.event_date, c.event_id))
            .cloned();
        Ok(visit)
    }

    async fn payments_for(
        &self,
        user_id: &str,
        service_id: &str,
    ) -> AffiliateResult<Vec<CampaignEvent>> {
        let mut payments: Vec<CampaignEvent> = self
            .of_type(EventType::Payment)
            .filter(|p| p.user() == Some(user_id) && p.service() == Some(service_id))
            .cloned()
            .collect();
        payments.sort_by_key(|p| (p.event_date, p.event_id));
        Ok(payments)
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(offset)
    }

    #[tokio::test]
    async fn test_identity_lands_on_latest_click_only() {
        let store = InMemoryEventStore::new(vec![
            CampaignEvent::new(1, EventType::Click, day(0))
                .with_track("t1")
                .with_campaign("c1", "a1"),
            CampaignEvent::new(2, EventType::Click, day(1))
                .with_track("t1")
                .with_campaign("c1", "a2"),
            CampaignEvent::new(3, EventType::Identify, day(2))
                .with_track("t1")
                .with_user("alice"),
            CampaignEvent::new(4, EventType::Identify, day(3))
                .with_track("t1")
                .with_user("bob"),
        ]);

        let rows = store.attributable_clicks().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].resolved_user_id, None);
        assert_eq!(rows[1].resolved_user_id.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_unattributable_latest_click_hides_identity() {
        let store = InMemoryEventStore::new(vec![
            CampaignEvent::new(1, EventType::Click, day(0))
                .with_track("t1")
                .with_campaign("c1", "a1"),
            CampaignEvent::new(2, EventType::Click, day(1)).with_track("t1"),
            CampaignEvent::new(3, EventType::Identify, day(2))
                .with_track("t1")
                .with_user("alice"),
        ]);

        let rows = store.attributable_clicks().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].click.event_id, 1);
        assert_eq!(rows[0].resolved_user_id, None);
    }

    #[tokio::test]
    async fn test_candidates_need_prior_connect_and_dedupe() {
        let store = InMemoryEventStore::new(vec![
            CampaignEvent::new(1, EventType::Connect, day(0))
                .with_user("u1")
                .with_service("s1"),
            CampaignEvent::new(2, EventType::Connect, day(2))
                .with_user("u1")
                .with_service("s1"),
            CampaignEvent::new(3, EventType::Payment, day(5))
                .with_user("u1")
                .with_service("s1"),
            CampaignEvent::new(4, EventType::Payment, day(5))
                .with_user("u2")
                .with_service("s1"),
            CampaignEvent::new(5, EventType::Connect, day(6))
                .with_user("u2")
                .with_service("s1"),
            CampaignEvent::new(6, EventType::Payment, day(5)).with_service("s1"),
        ]);

        let candidates = store.chain_candidates().await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].user_id, "u1");
        assert_eq!(candidates[0].first_payment_date, day(5));
        assert_eq!(candidates[0].connect_date, day(2));
    }

    #[tokio::test]
    async fn test_latest_click_breaks_date_ties_by_event_id() {
        let store = InMemoryEventStore::new(vec![
            CampaignEvent::new(1, EventType::Identify, day(0))
                .with_track("t1")
                .with_user("u1"),
            CampaignEvent::new(2, EventType::Click, day(3)).with_track("t1"),
            CampaignEvent::new(9, EventType::Click, day(3)).with_track("t1"),
            CampaignEvent::new(4, EventType::Click, day(1)).with_track("t1"),
            CampaignEvent::new(5, EventType::Click, day(4)).with_track("t2"),
        ]);

        let visit = store
            .latest_identified_click("u1", day(0), day(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(visit.event_id, 9);

        let none = store
            .latest_identified_click("u1", day(4), day(10))
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_close_is_shared_across_clones() {
        let store = InMemoryEventStore::default();
        let handle = store.clone();
        handle.close().await;
        assert!(store.is_closed());
        assert_eq!(store.close_count(), 1);
    }

    #[test]
    fn test_from_json_reader() {
        let json = r#"[
            {"event_id": 1, "event_type": "click", "event_date": "2024-01-01T00:00:00Z",
             "track_id": "t1", "campaign_id": "c1", "affiliate_id": "a1"},
            {"event_id": 2, "event_type": "refund", "event_date": "2024-01-02T00:00:00Z"}
        ]"#;
        let store = InMemoryEventStore::from_json_reader(json.as_bytes()).unwrap();
        assert_eq!(store.events().len(), 2);
        assert_eq!(store.events()[1].event_type, EventType::Unknown);
    }
}
