//! Error types for context RPC endpoints.

use std::time::Duration;

use thiserror::Error;

use crate::channel::ChannelError;
use crate::codec::NamedError;

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by method handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for RPC operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Endpoint was configured without a usable context.
    #[error("Invalid `context` argument: must be a non-empty string")]
    InvalidContext,

    /// Endpoint was configured with an empty instance token.
    #[error("Invalid `instance_token` argument: must be absent or a non-empty string")]
    InvalidInstanceToken,

    /// Caller supplied an invalid call shape.
    #[error("Invalid call: {0}")]
    InvalidCall(String),

    /// The peer never produced a reply.
    #[error("{}", no_response_message(.method, .source.is_some()))]
    NoResponse {
        /// Name of the remote method.
        method: String,
        /// Transport error reported by the channel, if any.
        #[source]
        source: Option<ChannelError>,
    },

    /// The call did not settle before its deadline.
    #[error("Remote call \"{method}\" timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// Name of the remote method.
        method: String,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// No handler is registered under the requested name.
    #[error("Method \"{0}\" has not been registered")]
    MethodNotFound(String),

    /// The remote handler failed.
    #[error(transparent)]
    Remote(#[from] NamedError),

    /// The channel failed for a reason other than a missing listener.
    #[error("Channel error: {0}")]
    Channel(#[source] ChannelError),

    /// A reply arrived but it is not a response envelope.
    #[error("Invalid response: {0}")]
    InvalidResponse(#[source] serde_json::Error),

    /// Outbound data could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The detached call task did not run to completion.
    #[error("Call task failed: {0}")]
    TaskFailed(String),
}

fn no_response_message(method: &str, no_listener: bool) -> String {
    if no_listener {
        format!("Remote call \"{method}\" did not receive a response (there are no listeners)")
    } else {
        format!("Remote call \"{method}\" did not receive a response")
    }
}

impl Error {
    /// Name under which this error is transmitted and matched.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::InvalidContext | Self::InvalidInstanceToken | Self::InvalidCall(_) => {
                "InvalidArgumentError"
            }
            Self::NoResponse { .. } => "RPCNoResponse",
            Self::Timeout { .. } => "RPCTimeoutError",
            Self::MethodNotFound(_) => "RPCMethodNotFound",
            Self::Remote(err) => err.name(),
            Self::Channel(_) => "RPCChannelError",
            Self::InvalidResponse(_) => "RPCInvalidResponse",
            Self::Serialization(_) => "RPCSerializationError",
            Self::TaskFailed(_) => "RPCTaskFailed",
        }
    }

    /// Whether the error was raised by a handler on the other side.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Whether the call ran out of time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
