use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a row in the campaign event log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Click,
    Identify,
    Connect,
    Payment,
    /// Anything else found in the log. Stored, never aggregated.
    #[serde(other)]
    Unknown,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Click => "click",
            EventType::Identify => "identify",
            EventType::Connect => "connect",
            EventType::Payment => "payment",
            EventType::Unknown => "unknown",
        }
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value {
            "click" => EventType::Click,
            "identify" => EventType::Identify,
            "connect" => EventType::Connect,
            "payment" => EventType::Payment,
            _ => EventType::Unknown,
        }
    }
}

/// One immutable row of `marketing.campaign_events`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CampaignEvent {
    pub event_id: i64,
    pub event_type: EventType,
    pub event_date: DateTime<Utc>,
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub affiliate_id: Option<String>,
    #[serde(default)]
    pub sub_track_id: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
}

impl CampaignEvent {
    pub fn new(event_id: i64, event_type: EventType, event_date: DateTime<Utc>) -> Self {
        Self {
            event_id,
            event_type,
            event_date,
            track_id: None,
            user_id: None,
            campaign_id: None,
            affiliate_id: None,
            sub_track_id: None,
            service_id: None,
        }
    }

    pub fn with_track(mut self, track_id: impl Into<String>) -> Self {
        self.track_id = Some(track_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_campaign(
        mut self,
        campaign_id: impl Into<String>,
        affiliate_id: impl Into<String>,
    ) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self.affiliate_id = Some(affiliate_id.into());
        self
    }

    pub fn with_sub_track(mut self, sub_track_id: impl Into<String>) -> Self {
        self.sub_track_id = Some(sub_track_id.into());
        self
    }

    pub fn with_service(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn track(&self) -> Option<&str> {
        non_empty(self.track_id.as_deref())
    }

    pub fn user(&self) -> Option<&str> {
        non_empty(self.user_id.as_deref())
    }

    pub fn service(&self) -> Option<&str> {
        non_empty(self.service_id.as_deref())
    }

    /// A click can be credited only when it names both a campaign and an affiliate.
    pub fn is_attributable_click(&self) -> bool {
        self.event_type == EventType::Click
            && non_empty(self.campaign_id.as_deref()).is_some()
            && non_empty(self.affiliate_id.as_deref()).is_some()
    }
}

/// Empty strings in the log mean "not set".
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Deduplicated, identity-resolved summary of the clicks of one track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Visit {
    pub track_id: Option<String>,
    pub event_id: i64,
    pub event_date: DateTime<Utc>,
    pub sub_track_id: Option<String>,
    pub campaign_id: Option<String>,
    pub affiliate_id: Option<String>,
    pub user_id: Option<String>,
    pub click_count: u64,
}

/// One visit credited with every payment of a user on a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chain {
    pub user_id: String,
    pub service_id: String,
    pub visit: CampaignEvent,
    pub payments: Vec<CampaignEvent>,
}

impl Chain {
    pub fn first_payment_date(&self) -> Option<DateTime<Utc>> {
        self.payments.first().map(|p| p.event_date)
    }
}

/// Everything one attribution run hands to the reporting layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub visits: Vec<Visit>,
    pub chains: Vec<Chain>,
    /// False when the chain pass stopped early on a store failure.
    pub chains_complete: bool,
}
