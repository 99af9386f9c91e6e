//! Runs the attribution job against a real Postgres.
//! Requires AFFILIATE_TEST_DATABASE_URL pointing at a scratch database
//! (the events table is truncated). Run with `--ignored`.

use affiliate_attribution::{load_chains_and_visits, EventStore, InMemoryEventStore, PgEventStore};
use affiliate_core::config::{AttributionConfig, PostgresConfig};
use affiliate_core::{CampaignEvent, EventType};
use chrono::{DateTime, Duration, TimeZone, Utc};

const SCHEMA: &str = include_str!("../migrations/001_campaign_events.sql");

type Row = (
    i64,
    &'static str,
    i64,
    Option<&'static str>,
    Option<&'static str>,
    Option<&'static str>,
    Option<&'static str>,
    Option<&'static str>,
);

// "a" sorts after "U" byte-wise but before it under most locale collations.
const ROWS: [Row; 8] = [
    (1, "connect", 0, None, Some("U"), None, None, Some("S")),
    (2, "click", -5, Some("T1"), None, Some("C1"), Some("A1"), None),
    (3, "identify", -4, Some("T1"), Some("U"), None, None, None),
    (4, "payment", 10, None, Some("U"), None, None, Some("S")),
    (5, "payment", 40, None, Some("U"), None, None, Some("S")),
    (6, "click", -2, Some("T2"), None, Some("C2"), Some(""), None),
    (7, "connect", 1, None, Some("a"), None, None, Some("S")),
    (8, "payment", 3, None, Some("a"), None, None, Some("S")),
];

fn in_memory_copy() -> InMemoryEventStore {
    InMemoryEventStore::new(
        ROWS.iter()
            .map(|&(id, event_type, offset, track, user, campaign, affiliate, service)| {
                CampaignEvent {
                    event_id: id,
                    event_type: EventType::from(event_type),
                    event_date: day(offset),
                    track_id: track.map(str::to_string),
                    user_id: user.map(str::to_string),
                    campaign_id: campaign.map(str::to_string),
                    affiliate_id: affiliate.map(str::to_string),
                    sub_track_id: None,
                    service_id: service.map(str::to_string),
                }
            })
            .collect(),
    )
}

fn day(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 8, 30, 0).unwrap() + Duration::days(offset)
}

async fn seeded_store() -> Option<PgEventStore> {
    let url = std::env::var("AFFILIATE_TEST_DATABASE_URL").ok()?;
    let config = PostgresConfig {
        url,
        ..PostgresConfig::default()
    };
    let store = PgEventStore::connect(&config).await.unwrap();
    sqlx::raw_sql(SCHEMA).execute(store.pool()).await.unwrap();
    sqlx::query("TRUNCATE marketing.campaign_events")
        .execute(store.pool())
        .await
        .unwrap();

    for (id, event_type, offset, track, user, campaign, affiliate, service) in ROWS {
        sqlx::query(
            r#"
            INSERT INTO marketing.campaign_events
                (event_id, event_type, event_date, track_id, user_id, campaign_id, affiliate_id, service_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(event_type)
        .bind(day(offset))
        .bind(track)
        .bind(user)
        .bind(campaign)
        .bind(affiliate)
        .bind(service)
        .execute(store.pool())
        .await
        .unwrap();
    }
    Some(store)
}

#[tokio::test]
#[ignore = "requires AFFILIATE_TEST_DATABASE_URL"]
async fn test_postgres_job_matches_in_memory_semantics() {
    let Some(store) = seeded_store().await else {
        return;
    };

    let candidates = store.chain_candidates().await.unwrap();
    let order: Vec<_> = candidates.iter().map(|c| c.user_id.as_str()).collect();
    assert_eq!(order, vec!["U", "a"]);
    assert_eq!(candidates[0].first_payment_date, day(10));

    let expected = in_memory_copy().chain_candidates().await.unwrap();
    assert_eq!(candidates, expected);

    let output = load_chains_and_visits(store, &AttributionConfig::default())
        .await
        .unwrap();

    assert_eq!(output.visits.len(), 1);
    assert_eq!(output.visits[0].user_id.as_deref(), Some("U"));
    assert_eq!(output.chains.len(), 1);
    assert_eq!(output.chains[0].visit.event_id, 2);
    let payments: Vec<_> = output.chains[0].payments.iter().map(|p| p.event_id).collect();
    assert_eq!(payments, vec![4, 5]);
}
