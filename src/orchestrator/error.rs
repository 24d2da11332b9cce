//! Errors raised by lifecycle operations.

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::gateway::InstanceStatus;
use crate::poll::PollError;
use crate::status::Status;

/// Errors surfaced while driving a lab through a lifecycle operation.
#[derive(Debug, Error)]
pub enum LabError<GatewayError>
where
    GatewayError: std::error::Error + 'static,
{
    /// A provider call failed.
    #[error("{operation} failed for {resource}: {source}")]
    Gateway {
        /// Gateway operation that failed.
        operation: &'static str,
        /// Resource the call targeted.
        resource: String,
        /// Provider-specific error.
        #[source]
        source: GatewayError,
    },
    /// Guest bootstrap failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// The instance is in a state the operation cannot start from.
    #[error("instance {instance} is {status}; nothing to stop")]
    Precondition {
        /// Instance name.
        instance: String,
        /// Observed state.
        status: InstanceStatus,
    },
    /// The custom image build ended in a failed state.
    #[error("custom image {image} failed to build")]
    ImageFailed {
        /// Image name.
        image: String,
    },
    /// The run was cancelled.
    #[error("cancelled while waiting for {what}")]
    Cancelled {
        /// Condition being waited on.
        what: String,
    },
    /// A capped wait ran out of attempts.
    #[error("gave up waiting for {what} after {attempts} attempts: {last_error}")]
    Poll {
        /// Condition being waited on.
        what: String,
        /// Attempts made.
        attempts: u32,
        /// Rendering of the last failure.
        last_error: String,
    },
}

impl<E> LabError<E>
where
    E: std::error::Error + 'static,
{
    pub(super) fn gateway(operation: &'static str, resource: &str, source: E) -> Self {
        Self::Gateway {
            operation,
            resource: resource.to_owned(),
            source,
        }
    }

    /// Attributes a probe failure to the gateway call that made it.
    pub(super) fn from_poll(err: PollError<E>, operation: &'static str, resource: &str) -> Self {
        match err {
            PollError::Cancelled { what } => Self::Cancelled { what },
            PollError::Exhausted {
                what,
                attempts,
                last_error,
            } => Self::Poll {
                what,
                attempts,
                last_error,
            },
            PollError::Probe { source, .. } => Self::gateway(operation, resource, source),
        }
    }
}

/// A failed run together with the stages it completed. Displays as the
/// underlying [`LabError`] and reports no separate source.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct LabFailure<GatewayError>
where
    GatewayError: std::error::Error + 'static,
{
    /// Outcome of the stages that finished before the failure.
    pub status: Status,
    /// The failure that stopped the run.
    pub error: LabError<GatewayError>,
}
