//! JSON-RPC `sendBundle` transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{bundle::EncodedBundle, config::BundleEncoding, errors::TransportError};

const MAX_ERROR_BODY: usize = 512;

/// One `sendBundle` call against one endpoint.
///
/// Implementations perform a single request and never retry; retries belong to
/// the endpoint client.
#[async_trait]
pub trait BundleTransport: Send + Sync {
    /// Sends `bundle` to `url` and returns the id reported by the endpoint.
    async fn send_bundle(&self, url: &str, bundle: &EncodedBundle) -> Result<String, TransportError>;
}

/// HTTP transport speaking JSON-RPC 2.0.
#[derive(Debug, Clone)]
pub struct JsonRpcBundleTransport {
    client: reqwest::Client,
}

impl JsonRpcBundleTransport {
    /// Creates a transport whose every call is bounded by `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;
        Ok(Self { client })
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Builds the `sendBundle` request body for `bundle`.
pub fn send_bundle_payload(bundle: &EncodedBundle) -> Value {
    let params = match bundle.encoding() {
        BundleEncoding::Base58 => json!([bundle.transactions()]),
        BundleEncoding::Base64 => json!([bundle.transactions(), { "encoding": "base64" }]),
    };

    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "sendBundle",
        "params": params,
    })
}

/// Maps an HTTP status and body to the bundle id or a transport error.
pub fn parse_send_bundle_response(status: StatusCode, body: &str) -> Result<String, TransportError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(TransportError::RateLimited);
    }
    if !status.is_success() {
        let mut body = body.to_owned();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        return Err(TransportError::Http {
            status: status.as_u16(),
            body,
        });
    }

    let parsed: JsonRpcResponse =
        serde_json::from_str(body).map_err(|e| TransportError::Network(e.to_string()))?;

    if let Some(error) = parsed.error {
        return Err(TransportError::Rpc {
            code: error.code,
            message: error.message,
        });
    }

    match parsed.result {
        Some(Value::String(id)) if !id.is_empty() => Ok(id),
        _ => Err(TransportError::EmptyResult),
    }
}

#[async_trait]
impl BundleTransport for JsonRpcBundleTransport {
    async fn send_bundle(&self, url: &str, bundle: &EncodedBundle) -> Result<String, TransportError> {
        let response = self
            .client
            .post(url)
            .json(&send_bundle_payload(bundle))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        parse_send_bundle_response(status, &body)
    }
}
