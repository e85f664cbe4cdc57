use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::time;
use tracing::{info, warn};

use crate::{
    bundle::{EncodedBundle, SignedTransaction},
    config::{EndpointConfig, EndpointId, SubmitConfig},
    endpoint::EndpointClient,
    errors::{SubmitError, TransportError},
    race::{EndpointStatsSnapshot, RaceCoordinator, RaceOutcome},
    signal::StopSignal,
    throttle::ThrottleStore,
    transport::{BundleTransport, JsonRpcBundleTransport},
};

/// A bundle handed to the endpoints, plus the means to stop its retries.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Result of the race.
    pub outcome: RaceOutcome,
    /// Stop signal shared by this submission's endpoint tasks.
    pub stop: StopSignal,
}

impl Submission {
    pub fn bundle_id(&self) -> &str {
        self.outcome.bundle_id()
    }

    pub fn is_confirmed(&self) -> bool {
        self.outcome.is_confirmed()
    }

    /// Stops further retries, e.g. once the bundle is seen on chain.
    pub fn stop(&self) {
        self.stop.stop();
    }
}

/// Submits bundles to several endpoints at once and returns on the first acceptance.
///
/// The submitter enforces a persisted cooldown between submissions that were
/// accepted or rate limited, and keeps losing endpoint calls running in the
/// background after the caller has its answer. One submission per process at
/// a time is the intended use; concurrent submissions share the cooldown.
#[derive(Clone)]
pub struct BundleSubmitter {
    coordinator: Arc<RaceCoordinator>,
    throttle: Arc<ThrottleStore>,
    cfg: SubmitConfig,
    shutdown: StopSignal,
}

impl BundleSubmitter {
    /// Creates a submitter that talks JSON-RPC over HTTP.
    ///
    /// # Example
    /// ```no_run
    /// use hedged_bundle_client::{BundleSubmitter, EndpointConfig, SubmitConfig};
    ///
    /// let endpoints = EndpointConfig::from_urls([
    ///     "https://mainnet.block-engine.jito.wtf/api/v1/bundles",
    ///     "https://ny.mainnet.block-engine.jito.wtf/api/v1/bundles",
    /// ]);
    ///
    /// let submitter = BundleSubmitter::new(endpoints, SubmitConfig::default())?;
    /// # Ok::<(), hedged_bundle_client::TransportError>(())
    /// ```
    pub fn new(endpoints: Vec<EndpointConfig>, cfg: SubmitConfig) -> Result<Self, TransportError> {
        let transport = JsonRpcBundleTransport::new(cfg.request_timeout)?;
        Ok(Self::with_transport(endpoints, cfg, Arc::new(transport)))
    }

    /// Creates a submitter on top of any [`BundleTransport`].
    pub fn with_transport(
        endpoints: Vec<EndpointConfig>,
        cfg: SubmitConfig,
        transport: Arc<dyn BundleTransport>,
    ) -> Self {
        let throttle = Arc::new(ThrottleStore::new(cfg.throttle_path.clone(), cfg.cooldown));
        let client = EndpointClient::new(transport, throttle.clone(), cfg.retry.clone());
        let coordinator = RaceCoordinator::new(
            endpoints,
            client,
            throttle.clone(),
            cfg.race_ceiling,
            cfg.background_ttl,
        );

        Self {
            coordinator: Arc::new(coordinator),
            throttle,
            cfg,
            shutdown: StopSignal::new(),
        }
    }

    pub fn config(&self) -> &SubmitConfig {
        &self.cfg
    }

    pub fn endpoints(&self) -> &[EndpointConfig] {
        self.coordinator.endpoints()
    }

    pub fn throttle(&self) -> &ThrottleStore {
        &self.throttle
    }

    /// Returns a snapshot of accumulated per-endpoint statistics.
    pub fn endpoint_stats(&self) -> HashMap<EndpointId, EndpointStatsSnapshot> {
        self.coordinator.stats()
    }

    /// Number of endpoint tasks still running, including detached ones.
    pub fn pending_tasks(&self) -> usize {
        self.coordinator.tracker().len()
    }

    /// Submits `txs` and returns the bundle id, or `None` if the bundle was
    /// rejected before any network call or the submission failed outright.
    ///
    /// Failures are logged; no error reaches the caller.
    pub async fn submit<T: SignedTransaction>(&self, txs: &[T]) -> Option<Submission> {
        match self.try_submit(txs).await {
            Ok(submission) => Some(submission),
            Err(e) => {
                warn!(error = %e, "bundle submission aborted");
                None
            }
        }
    }

    /// Like [`submit`](Self::submit) but reports why a submission was aborted.
    ///
    /// Returns [`SubmitError::Stopped`] once the submitter has been shut down,
    /// including when that happens during the cooldown wait.
    pub async fn try_submit<T: SignedTransaction>(
        &self,
        txs: &[T],
    ) -> Result<Submission, SubmitError> {
        let stop = self.shutdown.child();

        let bundle = EncodedBundle::encode(txs, self.cfg.encoding)?;
        if self.coordinator.endpoints().is_empty() {
            return Err(SubmitError::NoEndpoints);
        }

        let remaining = self.throttle.remaining().await;
        if !remaining.is_zero() {
            info!(
                bundle_id = %bundle.bundle_id(),
                wait_ms = remaining.as_millis() as u64,
                "cooling down before submission"
            );
            tokio::select! {
                _ = time::sleep(remaining) => {}
                _ = stop.stopped() => {}
            }
        }

        // Shutdown may have landed while cooling down.
        if stop.is_stopped() {
            info!(bundle_id = %bundle.bundle_id(), "submission stopped before sending");
            return Err(SubmitError::Stopped);
        }

        let outcome = self.coordinator.race(bundle, &stop).await?;
        Ok(Submission { outcome, stop })
    }

    /// Stops every submission's retries and waits up to `grace` for endpoint
    /// tasks to wind down.
    ///
    /// Returns `true` if every task finished within `grace`.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shutdown.stop();
        let tracker = self.coordinator.tracker();
        tracker.close();
        time::timeout(grace, tracker.wait()).await.is_ok()
    }
}
