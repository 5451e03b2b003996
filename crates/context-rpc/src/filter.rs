//! Decides whether an inbound message is addressed to an endpoint.

use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use crate::channel::{MessageSender, PeerId, SenderOrigin};
use crate::envelope::CallEnvelope;

/// Acceptance rules for inbound calls.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageFilter {
    trusted_peer: PeerId,
    expected_origin: SenderOrigin,
    context: String,
    instance_token: Option<String>,
}

impl MessageFilter {
    /// Creates a filter for the given identity.
    #[must_use]
    pub const fn new(
        trusted_peer: PeerId,
        expected_origin: SenderOrigin,
        context: String,
        instance_token: Option<String>,
    ) -> Self {
        Self {
            trusted_peer,
            expected_origin,
            context,
            instance_token,
        }
    }

    /// Whether the sender is the trusted peer on the expected tier.
    #[must_use]
    pub fn accepts_sender(&self, sender: &MessageSender) -> bool {
        sender.peer_id == self.trusted_peer && sender.origin == self.expected_origin
    }

    /// Whether a call is addressed to this context and instance.
    #[must_use]
    pub fn accepts(&self, call: &CallEnvelope) -> bool {
        if call.context != self.context {
            return false;
        }

        match &self.instance_token {
            Some(token) => call.instance_token.as_deref() == Some(token.as_str()),
            None => true,
        }
    }

    /// Parses and filters a raw channel message.
    ///
    /// Returns the call when every rule passes, `None` otherwise.
    #[must_use]
    pub fn matches(&self, message: &Value, sender: &MessageSender) -> Option<CallEnvelope> {
        if !self.accepts_sender(sender) {
            trace!(peer = %sender.peer_id, origin = ?sender.origin, "ignoring message from untrusted sender");
            return None;
        }

        // Anything that does not look like a call belongs to some other consumer.
        let call = parse_call(message)?;

        if self.accepts(&call) {
            Some(call)
        } else {
            trace!(
                context = %call.context,
                expected = %self.context,
                "ignoring call addressed to another context or instance"
            );
            None
        }
    }
}

fn parse_call(message: &Value) -> Option<CallEnvelope> {
    if !message.is_object() {
        return None;
    }
    CallEnvelope::deserialize(message).ok()
}
