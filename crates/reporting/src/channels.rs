//! Channel summary: visits and conversions per campaign × affiliate.

use std::collections::BTreeMap;

use affiliate_core::types::non_empty;
use affiliate_core::JobOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

type ChannelKey = (Option<String>, Option<String>);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelRow {
    /// `None` on the row collecting chains credited to clicks without metadata.
    pub campaign_id: Option<String>,
    pub affiliate_id: Option<String>,
    pub visits: u64,
    pub identified_visits: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub payments: u64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelReport {
    pub run_id: Uuid,
    pub rows: Vec<ChannelRow>,
    pub chains_complete: bool,
    pub generated_at: DateTime<Utc>,
}

fn channel_key(campaign_id: Option<&str>, affiliate_id: Option<&str>) -> ChannelKey {
    (
        non_empty(campaign_id).map(str::to_string),
        non_empty(affiliate_id).map(str::to_string),
    )
}

impl ChannelReport {
    pub fn from_output(output: &JobOutput) -> Self {
        let mut rows: BTreeMap<ChannelKey, ChannelRow> = BTreeMap::new();

        for visit in &output.visits {
            let key = channel_key(visit.campaign_id.as_deref(), visit.affiliate_id.as_deref());
            let row = rows.entry(key).or_default();
            row.visits += 1;
            row.clicks += visit.click_count;
            if visit.user_id.is_some() {
                row.identified_visits += 1;
            }
        }

        for chain in &output.chains {
            let key = channel_key(
                chain.visit.campaign_id.as_deref(),
                chain.visit.affiliate_id.as_deref(),
            );
            let row = rows.entry(key).or_default();
            row.conversions += 1;
            row.payments += chain.payments.len() as u64;
        }

        let rows: Vec<ChannelRow> = rows
            .into_iter()
            .map(|((campaign_id, affiliate_id), mut row)| {
                row.campaign_id = campaign_id;
                row.affiliate_id = affiliate_id;
                row.conversion_rate = if row.visits > 0 {
                    row.conversions as f64 / row.visits as f64
                } else {
                    0.0
                };
                row
            })
            .collect();

        debug!(channels = rows.len(), "Channel report computed");
        Self {
            run_id: output.run_id,
            rows,
            chains_complete: output.chains_complete,
            generated_at: Utc::now(),
        }
    }

    pub fn total_conversions(&self) -> u64 {
        self.rows.iter().map(|r| r.conversions).sum()
    }

    pub fn export_csv(&self) -> String {
        let mut csv = String::from(
            "campaign_id,affiliate_id,visits,identified_visits,clicks,conversions,payments,conversion_rate\n",
        );
        for row in &self.rows {
            let cells = [
                quote(row.campaign_id.as_deref()),
                quote(row.affiliate_id.as_deref()),
                row.visits.to_string(),
                row.identified_visits.to_string(),
                row.clicks.to_string(),
                row.conversions.to_string(),
                row.payments.to_string(),
                format!("{:.4}", row.conversion_rate),
            ];
            csv.push_str(&cells.join(","));
            csv.push('\n');
        }
        csv
    }

    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn quote(value: Option<&str>) -> String {
    match value {
        Some(v) => format!("\"{}\"", v.replace('"', "\"\"")),
        None => String::new(),
    }
}
