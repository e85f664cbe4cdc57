//! Fan-out of one bundle to every endpoint, taking the first acceptance.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::{stream::FuturesUnordered, StreamExt};
use tokio::time::{self, Instant};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::{
    bundle::EncodedBundle,
    config::{EndpointConfig, EndpointId},
    endpoint::{EndpointClient, EndpointOutcome, EndpointReport},
    errors::SubmitError,
    signal::StopSignal,
    throttle::ThrottleStore,
};

/// Result of racing a bundle across endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaceOutcome {
    /// An endpoint accepted the bundle within the ceiling.
    Accepted {
        bundle_id: String,
        endpoint: EndpointId,
        /// Id reported by the accepting endpoint.
        upstream_id: String,
        elapsed: Duration,
    },
    /// No acceptance was seen before the ceiling; the id is returned on the
    /// assumption that the bundle is still in flight.
    Assumed { bundle_id: String },
}

impl RaceOutcome {
    pub fn bundle_id(&self) -> &str {
        match self {
            Self::Accepted { bundle_id, .. } | Self::Assumed { bundle_id, .. } => bundle_id,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

#[derive(Debug, Default)]
struct EndpointStats {
    wins: u64,
    total_win_latency_ms: f64,
    accepted: u64,
    rate_limited: u64,
    failed: u64,
    stopped: u64,
    abandoned: u64,
}

/// Snapshot of endpoint statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointStatsSnapshot {
    /// Number of races this endpoint won.
    pub wins: u64,
    /// Average time to the winning acceptance in milliseconds.
    pub avg_win_latency_ms: f64,
    /// Calls that ended accepted, including ones finishing after the race.
    pub accepted: u64,
    /// Calls that saw at least one rate-limit response.
    pub rate_limited: u64,
    /// Calls that ended in a failure.
    pub failed: u64,
    /// Calls stopped through the stop signal.
    pub stopped: u64,
    /// Calls dropped for outliving the background lifetime.
    pub abandoned: u64,
}

type StatsMap = Arc<Mutex<HashMap<EndpointId, EndpointStats>>>;

/// Races a bundle across all configured endpoints.
///
/// Endpoint calls run as tracked tasks. The caller is released on the first
/// acceptance or when the ceiling elapses, even if every endpoint has already
/// failed. The remaining tasks keep running until they finish or hit the
/// background lifetime; they only feed statistics and, for the first
/// acceptance of a race, the throttle store.
pub struct RaceCoordinator {
    endpoints: Arc<Vec<EndpointConfig>>,
    client: EndpointClient,
    throttle: Arc<ThrottleStore>,
    ceiling: Duration,
    background_ttl: Duration,
    tracker: TaskTracker,
    stats: StatsMap,
}

impl RaceCoordinator {
    pub fn new(
        endpoints: Vec<EndpointConfig>,
        client: EndpointClient,
        throttle: Arc<ThrottleStore>,
        ceiling: Duration,
        background_ttl: Duration,
    ) -> Self {
        let stats_map = endpoints
            .iter()
            .map(|e| (e.id, EndpointStats::default()))
            .collect();

        Self {
            endpoints: Arc::new(endpoints),
            client,
            throttle,
            ceiling,
            background_ttl,
            tracker: TaskTracker::new(),
            stats: Arc::new(Mutex::new(stats_map)),
        }
    }

    pub fn endpoints(&self) -> &[EndpointConfig] {
        &self.endpoints
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Runs the race for `bundle`.
    pub async fn race(
        &self,
        bundle: EncodedBundle,
        stop: &StopSignal,
    ) -> Result<RaceOutcome, SubmitError> {
        if self.endpoints.is_empty() {
            return Err(SubmitError::NoEndpoints);
        }

        let start = Instant::now();
        let bundle = Arc::new(bundle);
        let bundle_id = bundle.bundle_id().to_owned();
        let stamped = Arc::new(AtomicBool::new(false));

        let mut pending: FuturesUnordered<_> = self
            .endpoints
            .iter()
            .cloned()
            .map(|endpoint| {
                self.spawn_endpoint(endpoint, bundle.clone(), stop.clone(), stamped.clone())
            })
            .collect();

        info!(
            bundle_id = %bundle_id,
            endpoints = self.endpoints.len(),
            txs = bundle.len(),
            "racing bundle"
        );

        let ceiling = time::sleep(self.ceiling);
        tokio::pin!(ceiling);

        loop {
            tokio::select! {
                Some(joined) = pending.next(), if !pending.is_empty() => {
                    match joined {
                        Ok(EndpointReport { endpoint, outcome: EndpointOutcome::Accepted(upstream_id), .. }) => {
                            let elapsed = start.elapsed();
                            self.record_win(endpoint, elapsed);
                            info!(
                                bundle_id = %bundle_id,
                                endpoint = %endpoint,
                                elapsed_ms = elapsed.as_millis() as u64,
                                "bundle accepted"
                            );
                            return Ok(RaceOutcome::Accepted {
                                bundle_id,
                                endpoint,
                                upstream_id,
                                elapsed,
                            });
                        }
                        Ok(_) => {}
                        Err(e) => warn!(bundle_id = %bundle_id, error = %e, "endpoint task failed to join"),
                    }
                }
                _ = &mut ceiling => {
                    warn!(
                        bundle_id = %bundle_id,
                        still_running = pending.len(),
                        "no acceptance before ceiling, assuming bundle in flight"
                    );
                    return Ok(RaceOutcome::Assumed { bundle_id });
                }
            }
        }
    }

    fn spawn_endpoint(
        &self,
        endpoint: EndpointConfig,
        bundle: Arc<EncodedBundle>,
        stop: StopSignal,
        stamped: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<EndpointReport> {
        let client = self.client.clone();
        let throttle = self.throttle.clone();
        let stats = self.stats.clone();
        let ttl = self.background_ttl;

        self.tracker.spawn(async move {
            let report = match time::timeout(ttl, client.send(&endpoint, &bundle, &stop)).await {
                Ok(report) => report,
                Err(_) => EndpointReport {
                    endpoint: endpoint.id,
                    attempts: 0,
                    delays: Vec::new(),
                    outcome: EndpointOutcome::Abandoned,
                    elapsed: ttl,
                },
            };

            // Only the first acceptance of a race starts the cooldown, whether
            // or not the caller is still waiting for it.
            let accepted = matches!(report.outcome, EndpointOutcome::Accepted(_));
            if accepted && !stamped.swap(true, Ordering::AcqRel) {
                throttle.record().await;
            }

            record_report(&stats, &report);
            debug!(
                bundle_id = %bundle.bundle_id(),
                endpoint = %report.endpoint,
                attempts = report.attempts,
                elapsed_ms = report.elapsed.as_millis() as u64,
                outcome = ?report.outcome,
                "endpoint call finished"
            );
            report
        })
    }

    fn record_win(&self, endpoint: EndpointId, elapsed: Duration) {
        if let Ok(mut stats) = self.stats.lock() {
            if let Some(entry) = stats.get_mut(&endpoint) {
                entry.wins += 1;
                entry.total_win_latency_ms += elapsed.as_secs_f64() * 1000.0;
            }
        }
    }

    /// Returns a snapshot of accumulated per-endpoint statistics.
    pub fn stats(&self) -> HashMap<EndpointId, EndpointStatsSnapshot> {
        let Ok(stats) = self.stats.lock() else {
            return HashMap::new();
        };

        stats
            .iter()
            .map(|(id, s)| {
                let avg = if s.wins > 0 {
                    s.total_win_latency_ms / (s.wins as f64)
                } else {
                    0.0
                };

                (
                    *id,
                    EndpointStatsSnapshot {
                        wins: s.wins,
                        avg_win_latency_ms: avg,
                        accepted: s.accepted,
                        rate_limited: s.rate_limited,
                        failed: s.failed,
                        stopped: s.stopped,
                        abandoned: s.abandoned,
                    },
                )
            })
            .collect()
    }
}

fn record_report(stats: &StatsMap, report: &EndpointReport) {
    let Ok(mut stats) = stats.lock() else {
        return;
    };
    let Some(entry) = stats.get_mut(&report.endpoint) else {
        return;
    };

    // A rate-limited call either retried or gave up on a 429.
    let gave_up_throttled = matches!(
        &report.outcome,
        EndpointOutcome::Failed(e) if e.is_rate_limit()
    );
    if !report.delays.is_empty() || gave_up_throttled {
        entry.rate_limited += 1;
    }

    match report.outcome {
        EndpointOutcome::Accepted(_) => entry.accepted += 1,
        EndpointOutcome::Failed(_) => entry.failed += 1,
        EndpointOutcome::Stopped => entry.stopped += 1,
        EndpointOutcome::Abandoned => entry.abandoned += 1,
    }
}
