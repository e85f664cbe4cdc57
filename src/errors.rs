/// Errors reported by a single `sendBundle` call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint answered HTTP 429.
    #[error("rate limited by endpoint")]
    RateLimited,

    /// The endpoint answered with a non-429 error status.
    #[error("http status {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The request never produced a response (connect, timeout, decode).
    #[error("network failure: {0}")]
    Network(String),

    /// The endpoint returned a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Human-readable message.
        message: String,
    },

    /// A 2xx response without a usable `result`.
    #[error("rpc returned no bundle id")]
    EmptyResult,

    /// The transport could not be constructed.
    #[error("transport configuration invalid: {0}")]
    Config(String),
}

impl TransportError {
    /// Whether this error is the upstream asking us to slow down.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Errors that stop a submission before or while racing endpoints.
#[derive(thiserror::Error, Debug)]
pub enum SubmitError {
    /// The bundle contained no transactions.
    #[error("bundle is empty")]
    EmptyBundle,

    /// The first transaction carries no signature to derive the bundle id from.
    #[error("first transaction has no signature")]
    MissingSignature,

    /// A transaction could not be serialized.
    #[error("transaction {index} failed to serialize: {message}")]
    Serialize {
        /// Position of the offending transaction in the bundle.
        index: usize,
        /// Serializer message.
        message: String,
    },

    /// No endpoints were configured.
    #[error("no endpoints configured")]
    NoEndpoints,

    /// The submission was stopped before any endpoint was called.
    #[error("submission stopped before any endpoint was called")]
    Stopped,
}
