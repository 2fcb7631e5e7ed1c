//! REST error taxonomy
//!
//! One discriminated union covers everything a caller can observe from a
//! completed operation. Only [`RestError::Network`] is ever produced by the
//! retry loop; every other variant surfaces on first occurrence.

use std::fmt;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::TransportError;

/// Error codes the API is known to return in error bodies.
pub mod error_code {
    pub const INVALID_ACCOUNT: &str = "INVALID_ACCOUNT";
    pub const INVALID_ACCESS_TOKEN: &str = "INVALID_ACCESS_TOKEN";
    pub const DEVICE_NOT_FOUND: &str = "DEVICE_NOT_FOUND";
    pub const PUBKEY_IN_USE: &str = "PUBKEY_IN_USE";
    pub const MAX_DEVICES_REACHED: &str = "MAX_DEVICES_REACHED";

    pub(crate) const KNOWN_CODES: &[&str] = &[
        INVALID_ACCOUNT,
        INVALID_ACCESS_TOKEN,
        DEVICE_NOT_FOUND,
        PUBKEY_IN_USE,
        MAX_DEVICES_REACHED,
    ];

    pub fn is_known(code: &str) -> bool {
        KNOWN_CODES.contains(&code)
    }
}

/// Well-formed error body returned by the API on non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerErrorResponse {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ServerErrorResponse {
    pub fn is_code(&self, code: &str) -> bool {
        self.code == code
    }
}

impl fmt::Display for ServerErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self.code),
            None => f.write_str(&self.code),
        }
    }
}

/// Errors surfaced to callers of REST operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestError {
    /// Transport-layer failure after retry exhaustion. Carries the underlying
    /// code so callers can distinguish cancellation from connectivity loss.
    #[error("transport failed: {0}")]
    Network(TransportError),

    /// Request body or header encoding failed. Fatal; never retried.
    #[error("failed to encode the request: {0}")]
    EncodePayload(String),

    /// A 2xx body could not be decoded.
    #[error("failed to decode the success response: {0}")]
    DecodeSuccessResponse(String),

    /// A declared non-2xx body could not be decoded.
    #[error("failed to decode the error response: {0}")]
    DecodeErrorResponse(String),

    /// Non-2xx response with a recognized, well-formed error body.
    #[error("server error: {0}")]
    Server(ServerErrorResponse),

    /// Status did not match any declared branch. The body decode is best
    /// effort; a decode failure is logged at the call site and yields `None`.
    #[error("unhandled response status: {0}")]
    UnhandledResponse(StatusCode, Option<ServerErrorResponse>),
}

impl RestError {
    /// The server error body, if this error carries one.
    pub fn server_error(&self) -> Option<&ServerErrorResponse> {
        match self {
            Self::Server(error) | Self::UnhandledResponse(_, Some(error)) => Some(error),
            _ => None,
        }
    }

    /// True when the operation failed because the transport gave up.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
