//! Command-line bundle submitter.
//!
//! Reads a bundle file (one base64-encoded, bincode-serialized
//! `VersionedTransaction` per line), races it across the endpoints named in
//! `BUNDLE_ENDPOINTS`, optionally watches for it to land, and prints
//! per-endpoint statistics.

mod env;
mod rpc;

use std::{fs, path::Path, time::Duration};

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use color_eyre::{
    eyre::{bail, eyre, WrapErr},
    Result,
};
use env::build_submitter_from_env;
use rpc::watch_confirmation;
use solana_sdk::transaction::VersionedTransaction;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| eyre!("usage: hedged-bundle-client <bundle-file>"))?;
    let txs = load_bundle(Path::new(&path))?;

    let (submitter, settings) = build_submitter_from_env()?;

    let Some(submission) = submitter.submit(&txs).await else {
        bail!("bundle was not submitted, see logs for the reason");
    };

    println!(
        "bundle {} ({})",
        submission.bundle_id(),
        if submission.is_confirmed() {
            "accepted"
        } else {
            "assumed in flight"
        }
    );

    if let Some(url) = settings.confirm_rpc_url {
        watch_confirmation(url, &submission, settings.confirm_timeout).await?;
    }

    if !submitter.shutdown(SHUTDOWN_GRACE).await {
        warn!(
            pending = submitter.pending_tasks(),
            "endpoint tasks still running at exit"
        );
    }

    let mut stats: Vec<_> = submitter.endpoint_stats().into_iter().collect();
    stats.sort_by_key(|(id, _)| *id);
    println!("\n=== endpoints ===");
    for (id, s) in stats {
        let url = submitter
            .endpoints()
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.url.as_str())
            .unwrap_or("?");
        println!(
            "{id:>4} wins={} accepted={} rate_limited={} failed={} stopped={} abandoned={}  {url}",
            s.wins, s.accepted, s.rate_limited, s.failed, s.stopped, s.abandoned,
        );
    }

    Ok(())
}

fn load_bundle(path: &Path) -> Result<Vec<VersionedTransaction>> {
    let raw = fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read bundle file {}", path.display()))?;

    let txs = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(idx, line)| {
            let bytes = BASE64_STANDARD
                .decode(line)
                .wrap_err_with(|| format!("transaction {idx} is not valid base64"))?;
            bincode::deserialize::<VersionedTransaction>(&bytes)
                .wrap_err_with(|| format!("transaction {idx} is not a versioned transaction"))
        })
        .collect::<Result<Vec<_>>>()?;

    info!(path = %path.display(), txs = txs.len(), "bundle loaded");
    Ok(txs)
}
