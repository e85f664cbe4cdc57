//! Races a Solana bundle across several block-engine endpoints at once.
//!
//! The submitter sends the same `sendBundle` request to every configured
//! endpoint and hands control back as soon as one of them accepts, so
//! time-sensitive follow-up work is never held hostage by the slowest endpoint.
//!
//! # Quick Start
//!
//! ```no_run
//! use hedged_bundle_client::{BundleSubmitter, EndpointConfig, SubmitConfig};
//! use solana_sdk::transaction::VersionedTransaction;
//!
//! # async fn example(txs: Vec<VersionedTransaction>) -> Result<(), Box<dyn std::error::Error>> {
//! let endpoints = EndpointConfig::from_urls([
//!     "https://amsterdam.mainnet.block-engine.jito.wtf/api/v1/bundles",
//!     "https://frankfurt.mainnet.block-engine.jito.wtf/api/v1/bundles",
//!     "https://ny.mainnet.block-engine.jito.wtf/api/v1/bundles",
//! ]);
//!
//! let submitter = BundleSubmitter::new(endpoints, SubmitConfig::default())?;
//!
//! if let Some(submission) = submitter.submit(&txs).await {
//!     println!(
//!         "bundle {} (confirmed by an endpoint: {})",
//!         submission.bundle_id(),
//!         submission.is_confirmed()
//!     );
//!     // Once the bundle lands on chain, stop any endpoint still retrying.
//!     submission.stop();
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Submission Strategy
//!
//! 1. The bundle is validated and encoded once; the bundle id is the base58
//!    form of the first transaction's first signature
//! 2. A persisted cooldown is waited out if a recent submission was accepted
//!    or rate limited
//! 3. Every endpoint is called concurrently; HTTP 429 responses are retried
//!    with capped exponential backoff and jitter, anything else fails fast
//! 4. The first acceptance is returned as [`RaceOutcome::Accepted`]; if none
//!    arrives before `race_ceiling` the id is still returned as
//!    [`RaceOutcome::Assumed`]
//! 5. Endpoint calls that have not finished keep running in the background,
//!    bounded by `background_ttl`, and only feed statistics and logs
//!
//! # Preset Configurations
//!
//! Use `SubmitConfig::default()`, `::patient()` or `::latency_first()`, or
//! build a custom configuration.

pub mod bundle;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod race;
pub mod signal;
pub mod throttle;
pub mod transport;

pub use bundle::{EncodedBundle, RawTransaction, SignedTransaction};
pub use client::{BundleSubmitter, Submission};
pub use config::{BundleEncoding, EndpointConfig, EndpointId, RetryPolicy, SubmitConfig};
pub use endpoint::{EndpointClient, EndpointOutcome, EndpointReport};
pub use errors::{SubmitError, TransportError};
pub use race::{EndpointStatsSnapshot, RaceCoordinator, RaceOutcome};
pub use signal::StopSignal;
pub use throttle::{ThrottleRecord, ThrottleStore};
pub use transport::{BundleTransport, JsonRpcBundleTransport};
