use std::{path::PathBuf, time::Duration};

/// Identifier of a bundle endpoint: its position in the configured endpoint list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub usize);

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Configuration for a single bundle endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Position of this endpoint in the configured list.
    pub id: EndpointId,
    /// Bundle submission URL (JSON-RPC `sendBundle`).
    pub url: String,
}

impl EndpointConfig {
    /// Builds endpoint configs from an ordered list of URLs, numbering them by position.
    pub fn from_urls<I, S>(urls: I) -> Vec<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        urls.into_iter()
            .enumerate()
            .map(|(idx, url)| Self {
                id: EndpointId(idx),
                url: url.into(),
            })
            .collect()
    }
}

/// How transactions are encoded inside the `sendBundle` params.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BundleEncoding {
    /// Base58 strings, the historical default of bundle endpoints.
    Base58,
    /// Base64 strings, announced with an `{"encoding":"base64"}` param.
    #[default]
    Base64,
}

/// Retry policy applied by each endpoint client to rate-limited responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of rate-limited responses tolerated before giving up.
    pub max_attempts: u32,

    /// Delay before the first retry; doubled on every following retry.
    pub base_delay: Duration,

    /// Upper bound on the exponential part of the delay.
    pub max_delay: Duration,

    /// Uniform random jitter in `[0, max_jitter)` added to each delay.
    ///
    /// Keeps endpoints that got throttled together from retrying in lockstep.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(2_000),
            max_delay: Duration::from_millis(20_000),
            max_jitter: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Submission configuration.
///
/// Controls how long the caller may be held, how endpoints retry under rate
/// limiting and how long detached endpoint work may outlive the caller.
#[derive(Debug, Clone)]
pub struct SubmitConfig {
    /// Maximum time the caller waits for a first acceptance.
    ///
    /// When it elapses the bundle id is returned optimistically and the
    /// endpoint calls keep running in the background.
    pub race_ceiling: Duration,

    /// Timeout applied to every single HTTP call.
    pub request_timeout: Duration,

    /// Minimum interval between submissions that were accepted or rate limited.
    pub cooldown: Duration,

    /// Hard bound on the life of an endpoint task, counted from its spawn.
    pub background_ttl: Duration,

    /// Retry policy for rate-limited responses.
    pub retry: RetryPolicy,

    /// Transaction encoding sent to endpoints.
    pub encoding: BundleEncoding,

    /// Location of the persisted throttle record.
    pub throttle_path: PathBuf,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            race_ceiling: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            cooldown: Duration::from_secs(120),
            background_ttl: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            encoding: BundleEncoding::default(),
            throttle_path: std::env::temp_dir().join("hedged-bundle-throttle.json"),
        }
    }
}

impl SubmitConfig {
    /// Creates a configuration that holds the caller longer and retries more.
    ///
    /// - 20 second race ceiling
    /// - 12 rate-limit retries, 30 second backoff cap
    /// - 5 minute background lifetime
    pub fn patient(throttle_path: impl Into<PathBuf>) -> Self {
        Self {
            race_ceiling: Duration::from_secs(20),
            background_ttl: Duration::from_secs(300),
            retry: RetryPolicy {
                max_attempts: 12,
                max_delay: Duration::from_secs(30),
                ..RetryPolicy::default()
            },
            throttle_path: throttle_path.into(),
            ..Self::default()
        }
    }

    /// Creates a configuration that releases the caller quickly.
    ///
    /// - 3 second race ceiling
    /// - 4 rate-limit retries starting at 500ms, 5 second cap
    /// - 30 second background lifetime
    pub fn latency_first(throttle_path: impl Into<PathBuf>) -> Self {
        Self {
            race_ceiling: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
            background_ttl: Duration::from_secs(30),
            retry: RetryPolicy {
                max_attempts: 4,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(5),
                max_jitter: Duration::from_millis(250),
            },
            throttle_path: throttle_path.into(),
            ..Self::default()
        }
    }
}
