//! Error types for the Compute Engine gateway.

use thiserror::Error;

/// Errors raised by [`super::ComputeGateway`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ComputeError {
    /// A required setting is empty.
    #[error("invalid compute settings: missing {0}")]
    Config(String),
    /// The request never produced an HTTP response.
    #[error("{operation}: request failed: {message}")]
    Transport {
        /// Gateway operation.
        operation: &'static str,
        /// Client error text.
        message: String,
    },
    /// The API answered with a non-success status.
    #[error("{operation}: API returned {status}: {message}")]
    Api {
        /// Gateway operation.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error body.
        message: String,
    },
    /// A success response could not be decoded.
    #[error("{operation}: unexpected response body: {message}")]
    Decode {
        /// Gateway operation.
        operation: &'static str,
        /// Decoder error text.
        message: String,
    },
    /// The instance reported an address that does not parse.
    #[error("instance {instance} reported invalid address {value}")]
    InvalidAddress {
        /// Instance name.
        instance: String,
        /// Raw address value.
        value: String,
    },
}
