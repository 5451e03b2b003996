//! Endpoint and per-call configuration.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::channel::{PeerId, SenderOrigin};
use crate::error::{Error, Result};

/// Default per-call timeout in milliseconds.
///
/// Offset from the round 15000 so that timeouts raised by an endpoint are
/// distinguishable from timeouts raised elsewhere.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 15_004;

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS);

const fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}

/// Options for constructing an endpoint.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointOptions {
    /// Routing namespace shared with the peer.
    pub context: String,

    /// Token identifying this particular instance.
    #[serde(default, alias = "contentToken")]
    pub instance_token: Option<String>,

    /// Identity every inbound message must carry.
    #[serde(default)]
    pub trusted_peer: PeerId,

    /// Tier inbound messages must originate from.
    #[serde(default)]
    pub expected_origin: SenderOrigin,

    /// Timeout applied to calls that do not set their own.
    #[serde(default = "default_call_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl EndpointOptions {
    /// Creates options for `context` with every other field defaulted.
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            instance_token: None,
            trusted_peer: PeerId::default(),
            expected_origin: SenderOrigin::default(),
            default_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }

    /// Checks the identity invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContext`] for an empty context,
    /// [`Error::InvalidInstanceToken`] for an empty token and
    /// [`Error::InvalidCall`] for a zero default timeout.
    pub fn validate(&self) -> Result<()> {
        if self.context.is_empty() {
            return Err(Error::InvalidContext);
        }

        if matches!(self.instance_token.as_deref(), Some("")) {
            return Err(Error::InvalidInstanceToken);
        }

        if self.default_timeout_ms == 0 {
            return Err(Error::InvalidCall(
                "default timeout must be a positive number of milliseconds".to_string(),
            ));
        }

        Ok(())
    }

    /// The default timeout as a [`Duration`].
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Options for a single outbound call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallOptions {
    /// Name of the remote method.
    pub name: String,

    /// Deadline for this call; the endpoint default applies when unset.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Creates options for calling `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
        }
    }

    /// Overrides the deadline of this call.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidCall(
                "a method name is required".to_string(),
            ));
        }

        if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(Error::InvalidCall(format!(
                "timeout of \"{}\" must be a positive number of milliseconds",
                self.name
            )));
        }

        Ok(())
    }
}

impl From<&str> for CallOptions {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CallOptions {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<&String> for CallOptions {
    fn from(name: &String) -> Self {
        Self::new(name.as_str())
    }
}

/// Generates a fresh instance token.
///
/// Used by participants that may be started more than once, so that a peer
/// can address exactly the instance that announced the token.
#[must_use]
pub fn generate_instance_token() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();

    format!("{millis}x{}", uuid::Uuid::new_v4().simple())
}
