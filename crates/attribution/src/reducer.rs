//! Max-merge reduction of click rows into one visit per track.
//!
//! Every field of the merged visit is the maximum observed across the group,
//! taken independently per field, so a visit may combine the campaign of one
//! click with the sub-track of another. Absent values never beat present
//! ones (`None < Some`), mirroring SQL `MAX` over nullable columns. The
//! collapse is intentional: a track is reported once, with its "largest"
//! metadata.

use std::collections::BTreeMap;

use affiliate_core::Visit;

use crate::store::ResolvedClick;

pub trait MaxMerge {
    fn max_merge(self, other: Self) -> Self;
}

impl MaxMerge for Visit {
    fn max_merge(self, other: Self) -> Self {
        Visit {
            track_id: self.track_id.max(other.track_id),
            event_id: self.event_id.max(other.event_id),
            event_date: self.event_date.max(other.event_date),
            sub_track_id: self.sub_track_id.max(other.sub_track_id),
            campaign_id: self.campaign_id.max(other.campaign_id),
            affiliate_id: self.affiliate_id.max(other.affiliate_id),
            user_id: self.user_id.max(other.user_id),
            click_count: self.click_count + other.click_count,
        }
    }
}

impl From<ResolvedClick> for Visit {
    fn from(row: ResolvedClick) -> Self {
        let track_id = row.click.track().map(str::to_string);
        let click = row.click;
        Visit {
            track_id,
            event_id: click.event_id,
            event_date: click.event_date,
            sub_track_id: click.sub_track_id,
            campaign_id: click.campaign_id,
            affiliate_id: click.affiliate_id,
            user_id: row.resolved_user_id.filter(|u| !u.is_empty()),
            click_count: 1,
        }
    }
}

/// Group rows by track and max-merge each group. Clicks without a track
/// share one untracked group. Output is ordered by track id.
pub fn reduce_by_track(rows: impl IntoIterator<Item = ResolvedClick>) -> Vec<Visit> {
    let mut groups: BTreeMap<Option<String>, Visit> = BTreeMap::new();
    for row in rows {
        let visit = Visit::from(row);
        let key = visit.track_id.clone();
        let merged = match groups.remove(&key) {
            Some(existing) => existing.max_merge(visit),
            None => visit,
        };
        groups.insert(key, merged);
    }
    groups.into_values().collect()
}
