//! Conversion chain reconstruction.
//!
//! For every (user, service) pair that paid after connecting, the builder
//! looks up the latest click on one of the user's identified tracks inside
//! the attribution window ending at the first payment, and credits that
//! click with every payment of the pair.
//!
//! Lookups run on a bounded pool of tokio workers pulling candidates from a
//! shared queue. Outcomes come back over one channel; the first store error
//! or worker failure cancels the pool and the pass returns the chains
//! resolved so far.

use std::sync::{Arc, Mutex};

use affiliate_core::config::AttributionConfig;
use affiliate_core::{AffiliateError, AffiliateResult, Chain};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::store::{ChainCandidate, EventStore};

type CandidateQueue = Arc<Mutex<std::vec::IntoIter<(usize, ChainCandidate)>>>;

/// Result of one chain pass.
#[derive(Debug, Clone, Default)]
pub struct ChainPass {
    /// Chains in candidate order (user id, then service id).
    pub chains: Vec<Chain>,
    /// Set when a lookup failed and the pass stopped early.
    pub aborted: Option<String>,
}

impl ChainPass {
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
    }
}

pub struct ChainBuilder<S: EventStore + ?Sized + 'static> {
    store: Arc<S>,
    window: Duration,
    fan_out: usize,
}

impl<S: EventStore + ?Sized + 'static> ChainBuilder<S> {
    pub fn new(store: Arc<S>, config: &AttributionConfig) -> Self {
        Self {
            store,
            window: config.window(),
            fan_out: config.fan_out(),
        }
    }

    /// Run the pass. Never fails: store errors end the pass early instead.
    pub async fn build(&self) -> ChainPass {
        let candidates = match self.store.chain_candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Failed to load chain candidates");
                metrics::counter!("attribution.chain_pass_aborted").increment(1);
                return ChainPass {
                    chains: Vec::new(),
                    aborted: Some(e.to_string()),
                };
            }
        };

        let total = candidates.len();
        let workers = self.fan_out.min(total);
        debug!(candidates = total, workers, "Resolving chain candidates");

        let queue: CandidateQueue = Arc::new(Mutex::new(
            candidates.into_iter().enumerate().collect::<Vec<_>>().into_iter(),
        ));
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(self.fan_out);

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            pool.spawn(run_worker(
                self.store.clone(),
                queue.clone(),
                cancel.clone(),
                tx.clone(),
                self.window,
            ));
        }
        drop(tx);

        let mut resolved: Vec<(usize, Chain)> = Vec::new();
        let mut dropped = 0u64;
        let mut aborted: Option<String> = None;
        let mut worker_failure: Option<String> = None;

        loop {
            tokio::select! {
                Some((index, outcome)) = rx.recv() => {
                    if aborted.is_some() {
                        continue;
                    }
                    match outcome {
                        Ok(Some(chain)) => resolved.push((index, chain)),
                        Ok(None) => dropped += 1,
                        Err(e) => {
                            error!(error = %e, candidate = index, "Chain lookup failed, aborting pass");
                            cancel.cancel();
                            aborted = Some(e.to_string());
                        }
                    }
                }
                Some(joined) = pool.join_next() => {
                    let failure = match joined {
                        Ok(Ok(())) => continue,
                        Ok(Err(e)) => e.to_string(),
                        Err(e) => format!("chain worker failed: {e}"),
                    };
                    error!(error = %failure, "Chain worker stopped, aborting pass");
                    cancel.cancel();
                    worker_failure.get_or_insert(failure);
                }
                else => break,
            }
        }
        let aborted = aborted.or(worker_failure);

        resolved.sort_by_key(|(index, _)| *index);
        let chains: Vec<Chain> = resolved.into_iter().map(|(_, chain)| chain).collect();

        metrics::counter!("attribution.chains").increment(chains.len() as u64);
        metrics::counter!("attribution.candidates_dropped").increment(dropped);
        if aborted.is_some() {
            metrics::counter!("attribution.chain_pass_aborted").increment(1);
        }

        info!(
            candidates = total,
            chains = chains.len(),
            dropped,
            complete = aborted.is_none(),
            "Chains built"
        );

        ChainPass { chains, aborted }
    }
}

async fn run_worker<S: EventStore + ?Sized>(
    store: Arc<S>,
    queue: CandidateQueue,
    cancel: CancellationToken,
    results: mpsc::Sender<(usize, AffiliateResult<Option<Chain>>)>,
    window: Duration,
) -> AffiliateResult<()> {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let next = match queue.lock() {
            Ok(mut queue) => queue.next(),
            Err(_) => {
                return Err(AffiliateError::Internal(anyhow::anyhow!(
                    "chain candidate queue poisoned"
                )))
            }
        };
        let Some((index, candidate)) = next else {
            break;
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = resolve_chain(store.as_ref(), &candidate, window) => outcome,
        };
        let failed = outcome.is_err();
        if results.send((index, outcome)).await.is_err() || failed {
            break;
        }
    }
    Ok(())
}

/// Attribute one candidate. `Ok(None)` means no click qualified.
pub async fn resolve_chain<S: EventStore + ?Sized>(
    store: &S,
    candidate: &ChainCandidate,
    window: Duration,
) -> AffiliateResult<Option<Chain>> {
    // Windows reaching past the representable range start at the earliest date.
    let window_start = candidate
        .first_payment_date
        .checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let visit = store
        .latest_identified_click(
            &candidate.user_id,
            window_start,
            candidate.first_payment_date,
        )
        .await?;

    let Some(visit) = visit else {
        debug!(
            user_id = %candidate.user_id,
            service_id = %candidate.service_id,
            connect_date = %candidate.connect_date,
            "No attributable visit in window"
        );
        return Ok(None);
    };
    debug!(
        user_id = %candidate.user_id,
        service_id = %candidate.service_id,
        connect_date = %candidate.connect_date,
        visit_id = visit.event_id,
        "Attributed visit found"
    );

    let payments = store
        .payments_for(&candidate.user_id, &candidate.service_id)
        .await?;

    Ok(Some(Chain {
        user_id: candidate.user_id.clone(),
        service_id: candidate.service_id.clone(),
        visit,
        payments,
    }))
}
