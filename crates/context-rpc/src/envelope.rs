//! Wire envelopes exchanged over the channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::ErrorRecord;

/// A request to invoke a named method on the peer.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnvelope {
    /// Routing namespace of the conversation.
    pub context: String,

    /// Token of the specific instance being addressed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_token: Option<String>,

    /// Name of the method to invoke.
    pub method: String,

    /// Positional parameters.
    #[serde(default)]
    pub params: Vec<Value>,
}

/// The single reply to a [`CallEnvelope`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseEnvelope {
    /// The handler succeeded.
    Result(Value),

    /// The handler failed.
    Error(ErrorRecord),
}

impl ResponseEnvelope {
    /// Serializes the response into a channel message.
    #[must_use]
    pub fn into_value(self) -> Value {
        serde_json::to_value(&self).unwrap_or_else(|err| {
            let record = ErrorRecord::new("RPCSerializationError", err.to_string());
            serde_json::json!({ "error": record })
        })
    }
}
