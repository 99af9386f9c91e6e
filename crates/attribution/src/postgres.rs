//! Postgres-backed [`EventStore`] over `marketing.campaign_events`.
//!
//! Expected columns: `event_id BIGINT`, `event_type TEXT`,
//! `event_date TIMESTAMPTZ`, and nullable TEXT columns `track_id`, `user_id`,
//! `campaign_id`, `affiliate_id`, `sub_track_id`, `service_id`
//! (see `migrations/001_campaign_events.sql`).

use std::time::Duration;

use affiliate_core::config::PostgresConfig;
use affiliate_core::{AffiliateError, AffiliateResult, CampaignEvent, EventType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use crate::store::{ChainCandidate, EventStore, ResolvedClick};

const ATTRIBUTABLE_CLICKS: &str = r#"
    WITH identities AS (
        SELECT track_id, MAX(user_id) AS user_id
        FROM marketing.campaign_events
        WHERE event_type = 'identify' AND user_id <> '' AND track_id <> ''
        GROUP BY track_id
    ),
    latest_clicks AS (
        SELECT track_id, MAX(event_id) AS event_id
        FROM marketing.campaign_events
        WHERE event_type = 'click' AND track_id <> ''
        GROUP BY track_id
    )
    SELECT visit.event_id, visit.event_type, visit.event_date, visit.track_id,
           visit.user_id, visit.campaign_id, visit.affiliate_id, visit.sub_track_id,
           visit.service_id, identities.user_id AS resolved_user_id
    FROM marketing.campaign_events visit
    LEFT JOIN latest_clicks ON latest_clicks.event_id = visit.event_id
    LEFT JOIN identities ON identities.track_id = latest_clicks.track_id
    WHERE visit.event_type = 'click'
      AND visit.campaign_id <> ''
      AND visit.affiliate_id <> ''
    ORDER BY visit.event_id
"#;

const CHAIN_CANDIDATES: &str = r#"
    SELECT first_payment.user_id, first_payment.service_id,
           first_payment.first_payment_date, MAX(connect.event_date) AS connect_date
    FROM (
        SELECT user_id, service_id, MIN(event_date) AS first_payment_date
        FROM marketing.campaign_events
        WHERE event_type = 'payment' AND user_id <> '' AND service_id <> ''
        GROUP BY user_id, service_id
    ) first_payment
    INNER JOIN marketing.campaign_events connect
        ON connect.user_id = first_payment.user_id
        AND connect.service_id = first_payment.service_id
        AND connect.event_type = 'connect'
        AND connect.event_date < first_payment.first_payment_date
    GROUP BY first_payment.user_id, first_payment.service_id, first_payment.first_payment_date
    ORDER BY first_payment.user_id COLLATE "C", first_payment.service_id COLLATE "C"
"#;

const LATEST_IDENTIFIED_CLICK: &str = r#"
    SELECT event_id, event_type, event_date, track_id, user_id, campaign_id,
           affiliate_id, sub_track_id, service_id
    FROM marketing.campaign_events
    WHERE event_type = 'click'
      AND event_date BETWEEN $1 AND $2
      AND track_id IN (
          SELECT track_id
          FROM marketing.campaign_events
          WHERE event_type = 'identify' AND track_id <> '' AND user_id = $3
      )
    ORDER BY event_date DESC, event_id DESC
    LIMIT 1
"#;

const PAYMENTS_FOR: &str = r#"
    SELECT event_id, event_type, event_date, track_id, user_id, campaign_id,
           affiliate_id, sub_track_id, service_id
    FROM marketing.campaign_events
    WHERE event_type = 'payment' AND user_id = $1 AND service_id = $2
    ORDER BY event_date ASC, event_id ASC
"#;

#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: i64,
    event_type: String,
    event_date: DateTime<Utc>,
    track_id: Option<String>,
    user_id: Option<String>,
    campaign_id: Option<String>,
    affiliate_id: Option<String>,
    sub_track_id: Option<String>,
    service_id: Option<String>,
}

impl From<EventRow> for CampaignEvent {
    fn from(row: EventRow) -> Self {
        CampaignEvent {
            event_id: row.event_id,
            event_type: EventType::from(row.event_type.as_str()),
            event_date: row.event_date,
            track_id: row.track_id,
            user_id: row.user_id,
            campaign_id: row.campaign_id,
            affiliate_id: row.affiliate_id,
            sub_track_id: row.sub_track_id,
            service_id: row.service_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ResolvedClickRow {
    #[sqlx(flatten)]
    event: EventRow,
    resolved_user_id: Option<String>,
}

/// Event store backed by a `PgPool`, sized for the chain lookup fan-out.
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Open the pool. Failure here is fatal for the job.
    pub async fn connect(config: &PostgresConfig) -> AffiliateResult<Self> {
        info!(
            max_connections = config.max_connections,
            "Connecting to Postgres event store"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
            .connect(&config.url)
            .await
            .map_err(|e| AffiliateError::Connection(e.to_string()))?;

        info!("Postgres event store connected");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn attributable_clicks(&self) -> AffiliateResult<Vec<ResolvedClick>> {
        let rows: Vec<ResolvedClickRow> = sqlx::query_as(ATTRIBUTABLE_CLICKS)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AffiliateError::query("attributable_clicks", e))?;

        debug!(rows = rows.len(), "Fetched attributable clicks");
        Ok(rows
            .into_iter()
            .map(|row| ResolvedClick {
                click: row.event.into(),
                resolved_user_id: row.resolved_user_id,
            })
            .collect())
    }

    async fn chain_candidates(&self) -> AffiliateResult<Vec<ChainCandidate>> {
        let rows: Vec<(String, String, DateTime<Utc>, DateTime<Utc>)> =
            sqlx::query_as(CHAIN_CANDIDATES)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| AffiliateError::query("chain_candidates", e))?;

        Ok(rows
            .into_iter()
            .map(
                |(user_id, service_id, first_payment_date, connect_date)| ChainCandidate {
                    user_id,
                    service_id,
                    first_payment_date,
                    connect_date,
                },
            )
            .collect())
    }

    async fn latest_identified_click(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AffiliateResult<Option<CampaignEvent>> {
        let row: Option<EventRow> = sqlx::query_as(LATEST_IDENTIFIED_CLICK)
            .bind(from)
            .bind(to)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AffiliateError::query("latest_identified_click", e))?;
        Ok(row.map(CampaignEvent::from))
    }

    async fn payments_for(
        &self,
        user_id: &str,
        service_id: &str,
    ) -> AffiliateResult<Vec<CampaignEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(PAYMENTS_FOR)
            .bind(user_id)
            .bind(service_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AffiliateError::query("payments_for", e))?;
        Ok(rows.into_iter().map(CampaignEvent::from).collect())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Postgres event store closed");
    }
}
