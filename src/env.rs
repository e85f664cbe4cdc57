//! Environment configuration for the submitter binary.

use std::{env, str::FromStr, time::Duration};

use color_eyre::{eyre::WrapErr, Result};
use hedged_bundle_client::{BundleSubmitter, EndpointConfig, SubmitConfig};

/// Settings read from the environment that are not part of [`SubmitConfig`].
pub struct BinarySettings {
    /// RPC URL used to watch for the bundle landing, if set.
    pub confirm_rpc_url: Option<String>,
    /// How long to watch for confirmation.
    pub confirm_timeout: Duration,
}

fn parse_var<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .wrap_err_with(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(None),
    }
}

/// Parses a comma-separated endpoint list, skipping blanks.
pub fn endpoints_from_list(list: &str) -> Vec<EndpointConfig> {
    EndpointConfig::from_urls(
        list.split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty()),
    )
}

/// Builds a bundle submitter from environment variables.
///
/// Looks for the following environment variables:
/// - `BUNDLE_ENDPOINTS` (required, comma-separated URLs)
/// - `BUNDLE_THROTTLE_PATH`
/// - `BUNDLE_COOLDOWN_SECS`
/// - `BUNDLE_RACE_CEILING_MS`
/// - `BUNDLE_MAX_ATTEMPTS`
/// - `CONFIRM_RPC_URL`, `CONFIRM_TIMEOUT_SECS`
///
/// Returns an error if no endpoints are configured.
pub fn build_submitter_from_env() -> Result<(BundleSubmitter, BinarySettings)> {
    let endpoints = env::var("BUNDLE_ENDPOINTS")
        .map(|list| endpoints_from_list(&list))
        .unwrap_or_default();

    if endpoints.is_empty() {
        color_eyre::eyre::bail!(
            "No endpoints configured.\n\
             Set BUNDLE_ENDPOINTS to a comma-separated list of sendBundle URLs"
        );
    }

    let mut cfg = SubmitConfig::default();
    if let Ok(path) = env::var("BUNDLE_THROTTLE_PATH") {
        cfg.throttle_path = path.into();
    }
    if let Some(secs) = parse_var::<u64>("BUNDLE_COOLDOWN_SECS")? {
        cfg.cooldown = Duration::from_secs(secs);
    }
    if let Some(ms) = parse_var::<u64>("BUNDLE_RACE_CEILING_MS")? {
        cfg.race_ceiling = Duration::from_millis(ms);
    }
    if let Some(attempts) = parse_var::<u32>("BUNDLE_MAX_ATTEMPTS")? {
        cfg.retry.max_attempts = attempts;
    }

    let settings = BinarySettings {
        confirm_rpc_url: env::var("CONFIRM_RPC_URL").ok(),
        confirm_timeout: Duration::from_secs(
            parse_var::<u64>("CONFIRM_TIMEOUT_SECS")?.unwrap_or(60),
        ),
    };

    let submitter = BundleSubmitter::new(endpoints, cfg)?;
    Ok((submitter, settings))
}
