//! Per-endpoint submission with rate-limit backoff.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::{
    bundle::EncodedBundle,
    config::{EndpointConfig, EndpointId, RetryPolicy},
    errors::TransportError,
    signal::StopSignal,
    throttle::ThrottleStore,
    transport::BundleTransport,
};

/// Final outcome of one endpoint call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointOutcome {
    /// The endpoint accepted the bundle and reported this id.
    Accepted(String),
    /// The endpoint failed, or kept rate limiting past the retry budget.
    Failed(TransportError),
    /// Retrying was stopped through the submission's stop signal.
    Stopped,
    /// The task outlived its background lifetime and was dropped.
    Abandoned,
}

/// What happened during one endpoint call.
#[derive(Debug, Clone)]
pub struct EndpointReport {
    pub endpoint: EndpointId,
    /// HTTP attempts made.
    pub attempts: u32,
    /// Backoff slept before each retry, jitter included.
    pub delays: Vec<Duration>,
    pub outcome: EndpointOutcome,
    pub elapsed: Duration,
}

/// Sends a bundle to one endpoint, retrying only on HTTP 429.
#[derive(Clone)]
pub struct EndpointClient {
    transport: Arc<dyn BundleTransport>,
    throttle: Arc<ThrottleStore>,
    policy: RetryPolicy,
}

impl EndpointClient {
    pub fn new(
        transport: Arc<dyn BundleTransport>,
        throttle: Arc<ThrottleStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            throttle,
            policy,
        }
    }

    /// Runs the attempt loop against `endpoint` until acceptance, a terminal
    /// error, an exhausted retry budget or a stop request.
    ///
    /// The first rate-limit response of the call stamps the throttle store.
    /// Attempts are strictly sequential.
    pub async fn send(
        &self,
        endpoint: &EndpointConfig,
        bundle: &EncodedBundle,
        stop: &StopSignal,
    ) -> EndpointReport {
        let start = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0u32;
        let mut delays = Vec::new();
        let mut throttled = false;

        let outcome = loop {
            attempts += 1;

            let err = match self.transport.send_bundle(&endpoint.url, bundle).await {
                Ok(id) => break EndpointOutcome::Accepted(id),
                Err(err) if err.is_rate_limit() => err,
                Err(err) => break EndpointOutcome::Failed(err),
            };

            if !throttled {
                throttled = true;
                self.throttle.record().await;
            }

            if attempts >= max_attempts {
                warn!(
                    endpoint = %endpoint.id,
                    attempts,
                    "rate limited on every attempt, giving up"
                );
                break EndpointOutcome::Failed(err);
            }

            if stop.is_stopped() {
                break EndpointOutcome::Stopped;
            }

            let delay = self.policy.backoff(attempts - 1) + self.jitter();
            debug!(
                endpoint = %endpoint.id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "rate limited, backing off"
            );

            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = stop.stopped() => {}
            }

            if stop.is_stopped() {
                break EndpointOutcome::Stopped;
            }
            delays.push(delay);
        };

        EndpointReport {
            endpoint: endpoint.id,
            attempts,
            delays,
            outcome,
            elapsed: start.elapsed(),
        }
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.policy.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::{HashMap, VecDeque},
        sync::Mutex,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{bundle::RawTransaction, config::BundleEncoding};

    /// Scripted response for one call of [`ScriptedTransport`].
    #[derive(Debug, Clone)]
    pub(crate) struct Step {
        pub(crate) after: Duration,
        pub(crate) result: Result<String, TransportError>,
    }

    impl Step {
        pub(crate) fn ok(id: &str, after_ms: u64) -> Self {
            Self {
                after: Duration::from_millis(after_ms),
                result: Ok(id.to_owned()),
            }
        }

        pub(crate) fn err(err: TransportError, after_ms: u64) -> Self {
            Self {
                after: Duration::from_millis(after_ms),
                result: Err(err),
            }
        }

        pub(crate) fn hang() -> Self {
            Self {
                after: Duration::from_secs(3_600),
                result: Err(TransportError::Network("hung".to_owned())),
            }
        }
    }

    /// Transport replaying per-URL scripts; the last step repeats forever.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        scripts: Mutex<HashMap<String, VecDeque<Step>>>,
        calls: Mutex<HashMap<String, u32>>,
    }

    impl ScriptedTransport {
        pub(crate) fn script(self, url: &str, steps: Vec<Step>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(url.to_owned(), steps.into());
            self
        }

        pub(crate) fn calls(&self, url: &str) -> u32 {
            self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl BundleTransport for ScriptedTransport {
        async fn send_bundle(
            &self,
            url: &str,
            _bundle: &EncodedBundle,
        ) -> Result<String, TransportError> {
            *self.calls.lock().unwrap().entry(url.to_owned()).or_default() += 1;
            let step = {
                let mut scripts = self.scripts.lock().unwrap();
                let script = scripts.get_mut(url).expect("unscripted url");
                if script.len() > 1 {
                    script.pop_front().unwrap()
                } else {
                    script.front().cloned().unwrap()
                }
            };
            time::sleep(step.after).await;
            step.result
        }
    }

    pub(crate) fn test_bundle() -> EncodedBundle {
        let txs = [RawTransaction {
            signature: vec![5; 64],
            wire: b"payload".to_vec(),
        }];
        EncodedBundle::encode(&txs, BundleEncoding::Base64).unwrap()
    }

    fn no_jitter(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(2_000),
            max_delay: Duration::from_millis(20_000),
            max_jitter: Duration::ZERO,
        }
    }

    fn endpoint() -> EndpointConfig {
        EndpointConfig {
            id: EndpointId(0),
            url: "http://one".to_owned(),
        }
    }

    fn setup(
        transport: ScriptedTransport,
        policy: RetryPolicy,
    ) -> (EndpointClient, Arc<ScriptedTransport>, Arc<ThrottleStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let throttle = Arc::new(ThrottleStore::new(
            dir.path().join("throttle.json"),
            Duration::from_secs(120),
        ));
        let transport = Arc::new(transport);
        let client = EndpointClient::new(transport.clone(), throttle.clone(), policy);
        (client, transport, throttle, dir)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limits_with_growing_delays() {
        let script = vec![
            Step::err(TransportError::RateLimited, 10),
            Step::err(TransportError::RateLimited, 10),
            Step::err(TransportError::RateLimited, 10),
            Step::ok("accepted", 10),
        ];
        let (client, transport, throttle, _dir) = setup(
            ScriptedTransport::default().script("http://one", script),
            no_jitter(8),
        );

        let report = client.send(&endpoint(), &test_bundle(), &StopSignal::new()).await;

        assert_eq!(report.outcome, EndpointOutcome::Accepted("accepted".to_owned()));
        assert_eq!(report.attempts, 4);
        assert_eq!(transport.calls("http://one"), 4);
        assert_eq!(
            report.delays,
            vec![
                Duration::from_millis(2_000),
                Duration::from_millis(4_000),
                Duration::from_millis(8_000)
            ]
        );
        assert!(report.delays.windows(2).all(|w| w[0] < w[1]));
        assert!(throttle.remaining().await > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (client, transport, _throttle, _dir) = setup(
            ScriptedTransport::default()
                .script("http://one", vec![Step::err(TransportError::RateLimited, 5)]),
            no_jitter(3),
        );

        let report = client.send(&endpoint(), &test_bundle(), &StopSignal::new()).await;

        assert_eq!(report.outcome, EndpointOutcome::Failed(TransportError::RateLimited));
        assert_eq!(report.attempts, 3);
        assert_eq!(report.delays.len(), 2);
        assert_eq!(transport.calls("http://one"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_fail_fast_without_throttling() {
        let err = TransportError::Http {
            status: 500,
            body: "oops".to_owned(),
        };
        let (client, transport, throttle, _dir) = setup(
            ScriptedTransport::default().script("http://one", vec![Step::err(err.clone(), 5)]),
            no_jitter(8),
        );

        let report = client.send(&endpoint(), &test_bundle(), &StopSignal::new()).await;

        assert_eq!(report.outcome, EndpointOutcome::Failed(err));
        assert_eq!(transport.calls("http://one"), 1);
        assert_eq!(throttle.remaining().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_backoff_prevents_further_attempts() {
        let (client, transport, _throttle, _dir) = setup(
            ScriptedTransport::default()
                .script("http://one", vec![Step::err(TransportError::RateLimited, 5)]),
            no_jitter(8),
        );
        let stop = StopSignal::new();

        let stopper = {
            let stop = stop.clone();
            tokio::spawn(async move {
                time::sleep(Duration::from_millis(500)).await;
                stop.stop();
            })
        };

        let started = time::Instant::now();
        let report = client.send(&endpoint(), &test_bundle(), &stop).await;
        stopper.await.unwrap();

        assert_eq!(report.outcome, EndpointOutcome::Stopped);
        assert_eq!(report.attempts, 1);
        assert_eq!(transport.calls("http://one"), 1);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn already_stopped_signal_skips_the_sleep() {
        let (client, transport, _throttle, _dir) = setup(
            ScriptedTransport::default()
                .script("http://one", vec![Step::err(TransportError::RateLimited, 5)]),
            no_jitter(8),
        );
        let stop = StopSignal::new();
        stop.stop();

        let report = client.send(&endpoint(), &test_bundle(), &stop).await;

        assert_eq!(report.outcome, EndpointOutcome::Stopped);
        assert!(report.delays.is_empty());
        assert_eq!(transport.calls("http://one"), 1);
    }

    #[test]
    fn jitter_stays_below_bound() {
        let dir = tempfile::tempdir().unwrap();
        let client = EndpointClient::new(
            Arc::new(ScriptedTransport::default()),
            Arc::new(ThrottleStore::new(dir.path().join("t.json"), Duration::ZERO)),
            RetryPolicy::default(),
        );
        for _ in 0..200 {
            assert!(client.jitter() < Duration::from_millis(1_000));
        }
    }
}
