//! Confirmation watching for a submitted bundle.

use std::time::Duration;

use color_eyre::{eyre::WrapErr, Result};
use hedged_bundle_client::Submission;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::signature::Signature;
use tokio::time;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Polls `rpc_url` until the bundle's first transaction is confirmed, then
/// stops the submission's remaining endpoint retries.
///
/// Returns whether the transaction landed within `timeout`.
pub async fn watch_confirmation(
    rpc_url: String,
    submission: &Submission,
    timeout: Duration,
) -> Result<bool> {
    let signature: Signature = submission
        .bundle_id()
        .parse()
        .wrap_err("bundle id is not a transaction signature")?;
    let client = RpcClient::new(rpc_url);

    let watch = async {
        loop {
            match client
                .get_signature_status_with_commitment(&signature, CommitmentConfig::confirmed())
                .await
            {
                Ok(Some(Ok(()))) => return true,
                Ok(Some(Err(e))) => {
                    warn!(%signature, error = %e, "transaction landed with an error");
                    return true;
                }
                Ok(None) => {}
                Err(e) => debug!(%signature, error = %e, "signature status lookup failed"),
            }
            time::sleep(POLL_INTERVAL).await;
        }
    };

    let landed = time::timeout(timeout, watch).await.unwrap_or(false);
    if landed {
        info!(%signature, "bundle landed, stopping endpoint retries");
        submission.stop();
    } else {
        warn!(%signature, timeout_secs = timeout.as_secs(), "bundle not seen on chain");
    }
    Ok(landed)
}
