//! The combined attribution job: visits first, then chains.

use std::sync::Arc;

use affiliate_core::config::AttributionConfig;
use affiliate_core::{AffiliateResult, JobOutput};
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chains::ChainBuilder;
use crate::store::EventStore;
use crate::visits::VisitAggregator;

/// Run both stages against an acquired store and release it afterwards.
///
/// The store is closed on every path, including a failed visit stage. Only
/// visit-stage failures surface as errors; the chain stage degrades to a
/// partial result with `chains_complete = false`.
pub async fn load_chains_and_visits<S>(
    store: S,
    config: &AttributionConfig,
) -> AffiliateResult<JobOutput>
where
    S: EventStore + 'static,
{
    let store = Arc::new(store);
    let run_id = Uuid::new_v4();
    info!(
        %run_id,
        window_days = config.window_days,
        fan_out = config.fan_out(),
        "Attribution job starting"
    );

    let outcome = run_stages(store.clone(), config, run_id).await;
    store.close().await;

    match &outcome {
        Ok(output) => info!(
            %run_id,
            visits = output.visits.len(),
            chains = output.chains.len(),
            complete = output.chains_complete,
            "Attribution job finished"
        ),
        Err(e) => warn!(%run_id, error = %e, "Attribution job failed"),
    }
    outcome
}

async fn run_stages<S: EventStore + 'static>(
    store: Arc<S>,
    config: &AttributionConfig,
    run_id: Uuid,
) -> AffiliateResult<JobOutput> {
    let visits = VisitAggregator::new(store.as_ref()).aggregate().await?;
    let pass = ChainBuilder::new(store, config).build().await;

    Ok(JobOutput {
        run_id,
        generated_at: Utc::now(),
        visits,
        chains_complete: pass.is_complete(),
        chains: pass.chains,
    })
}
