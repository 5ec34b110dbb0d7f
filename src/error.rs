//! Error taxonomy for the client, transports, and backends.
//!
//! Every failure surfaced by the dispatcher is one of these kinds.
//! Backend-internal errors are translated once, at the transport boundary,
//! and never re-wrapped by the dispatcher.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a transport or at the transport boundary.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The transport layer refused or dropped the connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// The connection attempt timed out.
    #[error("connection attempt timed out: {0}")]
    ConnectionTimeout(String),

    /// The remote end refused the connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// `send`/`receive` was called before `connect`.
    #[error("transport not connected")]
    NotConnected,

    /// A request payload could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A response payload could not be deserialized.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// HTTP-backend specific error.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// SDK-backend specific error.
    #[error(transparent)]
    Sdk(#[from] SdkError),
}

impl TransportError {
    /// True for connection-layer failures (refused, dropped, timed out,
    /// or operations on a disconnected transport).
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            TransportError::Connection(_)
                | TransportError::ConnectionTimeout(_)
                | TransportError::ConnectionRefused(_)
                | TransportError::NotConnected
        )
    }

    /// True for payload problems (serialization or deserialization).
    pub fn is_message_error(&self) -> bool {
        matches!(
            self,
            TransportError::Serialization(_) | TransportError::Deserialization(_)
        )
    }
}

/// Errors specific to the HTTP backend.
///
/// Produced by [`HttpError::from_status`] when the server returns a
/// non-success status that is not retried, or directly for transport-level
/// failures that are not connection problems.
#[derive(Error, Debug, Clone)]
pub enum HttpError {
    /// HTTP transport failure that is not a status-code error
    /// (e.g. a streaming request rejected at stream start).
    #[error("HTTP transport error: {0}")]
    Transport(String),

    /// 401 Unauthorized.
    #[error("HTTP 401 Unauthorized: {0}")]
    Unauthorized(String),

    /// 403 Forbidden.
    #[error("HTTP 403 Forbidden: {0}")]
    Forbidden(String),

    /// 404 Not Found.
    #[error("HTTP 404 Not Found: {0}")]
    NotFound(String),

    /// 408 Request Timeout.
    #[error("HTTP 408 Request Timeout: {0}")]
    RequestTimeout(String),

    /// 429 Too Many Requests, with the parsed `Retry-After` hint if present.
    #[error("HTTP 429 Too Many Requests: {reason}")]
    TooManyRequests {
        /// Response reason or body text.
        reason: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// Any other 4xx status.
    #[error("HTTP client error {status}: {reason}")]
    Client {
        /// The 4xx status code.
        status: u16,
        /// Response reason or body text.
        reason: String,
    },

    /// Any 5xx status.
    #[error("HTTP server error {status}: {reason}")]
    Server {
        /// The 5xx status code.
        status: u16,
        /// Response reason or body text.
        reason: String,
    },

    /// The backend's circuit breaker is open. The taxonomy reserves this
    /// kind; no breaker engine ships with the transport.
    #[error("circuit open: {0}")]
    CircuitOpen(String),
}

impl HttpError {
    /// Classify a non-success HTTP status into the taxonomy.
    ///
    /// 4xx maps to [`HttpError::Client`] or a specific variant for
    /// 401/403/404/408/429; 5xx maps to [`HttpError::Server`].
    pub fn from_status(status: u16, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        match status {
            401 => HttpError::Unauthorized(reason),
            403 => HttpError::Forbidden(reason),
            404 => HttpError::NotFound(reason),
            408 => HttpError::RequestTimeout(reason),
            429 => HttpError::TooManyRequests {
                reason,
                retry_after: None,
            },
            400..=499 => HttpError::Client { status, reason },
            _ => HttpError::Server { status, reason },
        }
    }

    /// The originating status code, if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Transport(_) | HttpError::CircuitOpen(_) => None,
            HttpError::Unauthorized(_) => Some(401),
            HttpError::Forbidden(_) => Some(403),
            HttpError::NotFound(_) => Some(404),
            HttpError::RequestTimeout(_) => Some(408),
            HttpError::TooManyRequests { .. } => Some(429),
            HttpError::Client { status, .. } | HttpError::Server { status, .. } => Some(*status),
        }
    }

    /// True for 4xx statuses.
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|s| (400..500).contains(&s))
    }

    /// True for 5xx statuses.
    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|s| s >= 500)
    }
}

/// Errors specific to the SDK backend, translated from vendor conditions.
#[derive(Error, Debug, Clone)]
pub enum SdkError {
    /// Vendor failure that fits no more specific category.
    #[error("SDK transport error: {0}")]
    Transport(String),

    /// The vendor rejected the credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The vendor rate limit was hit.
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    /// The request was malformed or rejected by validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The requested model or resource does not exist.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The credentials lack permission for the operation.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The request payload exceeded the vendor's size limit.
    #[error("request too large: {0}")]
    RequestTooLarge(String),
}

/// Umbrella error for everything the client surfaces.
#[derive(Error, Debug, Clone)]
pub enum PynectorError {
    /// A transport-layer failure, already classified at the backend.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request or batch deadline fired.
    #[error("request timed out after {0} seconds")]
    Timeout(f64),

    /// A required option is missing or invalid.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// No factory is registered under the requested backend name.
    #[error("unknown transport backend '{name}'; available: {available}")]
    UnknownBackend {
        /// The name that was looked up.
        name: String,
        /// Comma-separated registered names, for the error message.
        available: String,
    },

    /// The operation was cancelled via a cancel scope or task group.
    #[error("operation cancelled")]
    Cancelled,

    /// Catch-all for errors outside the taxonomy.
    #[error("{0}")]
    Other(String),
}

impl PynectorError {
    /// True for transport failures, the only kind retry logic retries.
    pub fn is_transport_error(&self) -> bool {
        matches!(self, PynectorError::Transport(_))
    }

    /// True for configuration failures, including unknown backends.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            PynectorError::Configuration(_) | PynectorError::UnknownBackend { .. }
        )
    }
}

impl From<HttpError> for PynectorError {
    fn from(err: HttpError) -> Self {
        PynectorError::Transport(TransportError::Http(err))
    }
}

impl From<SdkError> for PynectorError {
    fn from(err: SdkError) -> Self {
        PynectorError::Transport(TransportError::Sdk(err))
    }
}

impl From<anyhow::Error> for PynectorError {
    fn from(err: anyhow::Error) -> Self {
        PynectorError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PynectorError>;
