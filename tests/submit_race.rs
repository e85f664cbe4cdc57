//! End-to-end races against an in-memory transport.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use hedged_bundle_client::{
    BundleSubmitter, BundleTransport, EncodedBundle, EndpointConfig, EndpointId, RaceOutcome,
    RawTransaction, RetryPolicy, SubmitConfig, SubmitError, TransportError,
};
use tokio::time::{self, Instant};

#[derive(Clone, Copy)]
enum Behaviour {
    AcceptAfter(u64),
    RateLimit,
    Hang,
}

struct FakeBlockEngine {
    behaviour: HashMap<String, Behaviour>,
    calls: Mutex<HashMap<String, u32>>,
}

impl FakeBlockEngine {
    fn new(behaviour: &[(&str, Behaviour)]) -> Self {
        Self {
            behaviour: behaviour
                .iter()
                .map(|(url, b)| (url.to_string(), *b))
                .collect(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl BundleTransport for FakeBlockEngine {
    async fn send_bundle(&self, url: &str, _bundle: &EncodedBundle) -> Result<String, TransportError> {
        *self.calls.lock().unwrap().entry(url.to_owned()).or_default() += 1;
        match self.behaviour[url] {
            Behaviour::AcceptAfter(ms) => {
                time::sleep(Duration::from_millis(ms)).await;
                Ok("Sig123".to_owned())
            }
            Behaviour::RateLimit => {
                time::sleep(Duration::from_millis(20)).await;
                Err(TransportError::RateLimited)
            }
            Behaviour::Hang => {
                time::sleep(Duration::from_secs(3_600)).await;
                Err(TransportError::Network("timed out".to_owned()))
            }
        }
    }
}

const URLS: [&str; 5] = [
    "http://engine-0",
    "http://engine-1",
    "http://engine-2",
    "http://engine-3",
    "http://engine-4",
];

fn bundle() -> Vec<RawTransaction> {
    vec![
        RawTransaction {
            signature: vec![42; 64],
            wire: b"first".to_vec(),
        },
        RawTransaction {
            signature: vec![43; 64],
            wire: b"tip".to_vec(),
        },
    ]
}

fn expected_id() -> String {
    bs58::encode([42u8; 64]).into_string()
}

fn submitter(engine: Arc<FakeBlockEngine>, dir: &tempfile::TempDir) -> BundleSubmitter {
    let cfg = SubmitConfig {
        throttle_path: dir.path().join("state").join("throttle.json"),
        ..SubmitConfig::default()
    };
    BundleSubmitter::with_transport(EndpointConfig::from_urls(URLS), cfg, engine)
}

#[tokio::test(start_paused = true)]
async fn fastest_endpoint_releases_caller_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeBlockEngine::new(&[
        (URLS[0], Behaviour::Hang),
        (URLS[1], Behaviour::Hang),
        (URLS[2], Behaviour::AcceptAfter(50)),
        (URLS[3], Behaviour::Hang),
        (URLS[4], Behaviour::Hang),
    ]));
    let submitter = submitter(engine.clone(), &dir);

    let started = Instant::now();
    let submission = submitter.submit(&bundle()).await.expect("submitted");
    let waited = started.elapsed();

    assert!(waited >= Duration::from_millis(50));
    assert!(waited < Duration::from_millis(200), "{waited:?}");
    match &submission.outcome {
        RaceOutcome::Accepted {
            bundle_id,
            endpoint,
            upstream_id,
            ..
        } => {
            assert_eq!(bundle_id, &expected_id());
            assert_eq!(*endpoint, EndpointId(2));
            assert_eq!(upstream_id, "Sig123");
        }
        other => panic!("expected acceptance, got {other:?}"),
    }
    assert_eq!(engine.total_calls(), 5);
    assert_eq!(submitter.pending_tasks(), 4);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_everywhere_still_returns_the_id() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeBlockEngine::new(
        &URLS.map(|url| (url, Behaviour::RateLimit)),
    ));
    let submitter = submitter(engine.clone(), &dir);

    let started = Instant::now();
    let submission = submitter.submit(&bundle()).await.expect("submitted");

    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(
        submission.outcome,
        RaceOutcome::Assumed {
            bundle_id: expected_id(),
        }
    );

    let remaining = submitter.throttle().remaining().await;
    assert!(remaining > Duration::from_secs(115), "{remaining:?}");
    assert!(remaining <= submitter.config().cooldown);

    let calls_at_release = engine.total_calls();
    time::sleep(Duration::from_secs(200)).await;
    assert!(engine.total_calls() > calls_at_release);

    let max = RetryPolicy::default().max_attempts;
    assert_eq!(engine.total_calls(), max * URLS.len() as u32);
    let stats = submitter.endpoint_stats();
    for id in 0..URLS.len() {
        assert_eq!(stats[&EndpointId(id)].failed, 1);
        assert_eq!(stats[&EndpointId(id)].rate_limited, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn throttled_submission_delays_the_next_one() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeBlockEngine::new(
        &URLS.map(|url| (url, Behaviour::AcceptAfter(5))),
    ));
    let submitter = submitter(engine, &dir);

    assert!(submitter.submit(&bundle()).await.unwrap().is_confirmed());
    let remaining = submitter.throttle().remaining().await;
    assert!(remaining > Duration::ZERO);

    let started = Instant::now();
    assert!(submitter.submit(&bundle()).await.unwrap().is_confirmed());
    assert!(started.elapsed() + Duration::from_secs(1) >= remaining);
}

#[tokio::test(start_paused = true)]
async fn confirmation_elsewhere_stops_background_retries() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeBlockEngine::new(
        &URLS.map(|url| (url, Behaviour::RateLimit)),
    ));
    let submitter = submitter(engine.clone(), &dir);

    let submission = submitter.submit(&bundle()).await.unwrap();
    assert!(!submission.is_confirmed());

    submission.stop();
    let calls = engine.total_calls();
    time::sleep(Duration::from_secs(200)).await;

    assert_eq!(engine.total_calls(), calls);
    assert_eq!(submitter.pending_tasks(), 0);
    let stopped: u64 = submitter.endpoint_stats().values().map(|s| s.stopped).sum();
    assert_eq!(stopped, URLS.len() as u64);
}

#[tokio::test(start_paused = true)]
async fn rejected_bundles_never_reach_an_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeBlockEngine::new(
        &URLS.map(|url| (url, Behaviour::AcceptAfter(1))),
    ));
    let submitter = submitter(engine.clone(), &dir);

    let unsigned = vec![RawTransaction {
        signature: Vec::new(),
        wire: b"no sig".to_vec(),
    }];
    assert!(submitter.submit(&unsigned).await.is_none());
    assert!(submitter.submit::<RawTransaction>(&[]).await.is_none());
    assert_eq!(engine.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_cooldown_sends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeBlockEngine::new(
        &URLS.map(|url| (url, Behaviour::AcceptAfter(5))),
    ));
    let submitter = submitter(engine.clone(), &dir);
    submitter.throttle().record().await;

    let closer = {
        let submitter = submitter.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(30)).await;
            submitter.shutdown(Duration::from_secs(1)).await
        })
    };

    let started = Instant::now();
    let result = submitter.try_submit(&bundle()).await;
    assert!(matches!(result, Err(SubmitError::Stopped)), "{result:?}");
    assert!(started.elapsed() < Duration::from_secs(31));
    assert!(closer.await.unwrap());
    assert_eq!(engine.total_calls(), 0);

    assert!(submitter.submit(&bundle()).await.is_none());
    assert_eq!(engine.total_calls(), 0);
}
