//! Conversion of native errors to and from their wire representation.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Maximum number of causes encoded below the top-level error.
pub const MAX_CAUSE_DEPTH: usize = 32;

/// Name used for errors that carry no name of their own.
pub const GENERIC_ERROR_NAME: &str = "Error";

/// Name used for handler panics.
pub const PANIC_ERROR_NAME: &str = "PanicError";

/// Record fields that extra fields may not shadow.
pub const RESERVED_FIELDS: [&str; 4] = ["name", "message", "stack", "cause"];

/// Serializable projection of an error.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ErrorRecord {
    /// Kind of failure, used by callers to branch.
    pub name: String,

    /// Human-readable description.
    pub message: String,

    /// Stack or backtrace captured where the error was raised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    /// The error that caused this one.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_cause"
    )]
    pub cause: Option<Box<ErrorRecord>>,

    /// Additional fields attached to the error.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ErrorRecord {
    /// Creates a record with only a name and a message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            cause: None,
            extra: Map::new(),
        }
    }

    /// Encodes an error and its chain of causes.
    #[must_use]
    pub fn encode(err: &(dyn StdError + 'static)) -> Self {
        Self::encode_at_depth(err, 0)
    }

    fn encode_at_depth(err: &(dyn StdError + 'static), depth: usize) -> Self {
        let mut record = if let Some(named) = err.downcast_ref::<NamedError>() {
            Self::from_named(named)
        } else if let Some(Error::Remote(named)) = err.downcast_ref::<Error>() {
            Self::from_named(named)
        } else if let Some(rpc) = err.downcast_ref::<Error>() {
            Self::new(rpc.name(), rpc.to_string())
        } else {
            Self::new(GENERIC_ERROR_NAME, err.to_string())
        };

        record.cause = match err.source() {
            Some(cause) if depth < MAX_CAUSE_DEPTH => {
                Some(Box::new(Self::encode_at_depth(cause, depth + 1)))
            }
            _ => None,
        };

        record
    }

    fn from_named(named: &NamedError) -> Self {
        Self {
            name: named.name.clone(),
            message: named.message.clone(),
            stack: named.stack.clone(),
            cause: None,
            extra: named.extra.clone(),
        }
    }

    /// Encodes the payload of a caught panic.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked".to_string());

        Self::new(PANIC_ERROR_NAME, message)
    }

    /// Reconstructs a native error from this record.
    #[must_use]
    pub fn decode(self) -> NamedError {
        NamedError {
            name: self.name,
            message: self.message,
            stack: self.stack,
            cause: self.cause.map(|cause| Box::new(cause.decode())),
            extra: self.extra,
            remote: true,
        }
    }

    /// Number of causes below this record.
    #[must_use]
    pub fn cause_depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.cause.as_deref();
        while let Some(cause) = current {
            depth += 1;
            current = cause.cause.as_deref();
        }
        depth
    }
}

/// Accepts any cause value. Causes that are not error records are wrapped
/// in a generic record carrying their text.
fn deserialize_cause<'de, D>(deserializer: D) -> Result<Option<Box<ErrorRecord>>, D::Error>
where
    D: Deserializer<'de>,
{
    let cause = Option::<Value>::deserialize(deserializer)?;
    Ok(cause.and_then(cause_from_value).map(Box::new))
}

fn cause_from_value(value: Value) -> Option<ErrorRecord> {
    match value {
        Value::Null => None,
        Value::String(message) => Some(ErrorRecord::new(GENERIC_ERROR_NAME, message)),
        Value::Object(_) => Some(
            ErrorRecord::deserialize(&value)
                .unwrap_or_else(|_| ErrorRecord::new(GENERIC_ERROR_NAME, value.to_string())),
        ),
        other => Some(ErrorRecord::new(GENERIC_ERROR_NAME, other.to_string())),
    }
}

/// A named error, either raised locally by a handler or decoded from the peer.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedError {
    name: String,
    message: String,
    stack: Option<String>,
    cause: Option<Box<NamedError>>,
    extra: Map<String, Value>,
    remote: bool,
}

impl NamedError {
    /// Creates a local error with the given name and message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            cause: None,
            extra: Map::new(),
            remote: false,
        }
    }

    /// Attaches a cause.
    #[must_use]
    pub fn with_cause(mut self, cause: Self) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attaches a stack description.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Attaches an extra field.
    ///
    /// Keys listed in [`RESERVED_FIELDS`] are ignored.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if !RESERVED_FIELDS.contains(&key.as_str()) {
            self.extra.insert(key, value);
        }
        self
    }

    /// Kind of failure.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Stack captured where the error was raised.
    #[must_use]
    pub fn stack(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    /// The error that caused this one.
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        self.cause.as_deref()
    }

    /// Additional fields.
    #[must_use]
    pub const fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Whether the error was decoded from a peer's response.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        self.remote
    }
}

impl fmt::Display for NamedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl StdError for NamedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn StdError + 'static))
    }
}
