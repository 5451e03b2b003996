//! Abstraction over the message channel shared by controller and workers.
//!
//! A channel delivers every message to every subscribed listener on the
//! receiving side. A listener claims a message by returning a reply future;
//! the first claimed reply becomes the direct reply to the sender.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Peer identity used when no other value is configured.
pub const DEFAULT_PEER_ID: &str = "proven-context-rpc";

/// Opaque identity token of a channel participant.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Creates a peer identity from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new(DEFAULT_PEER_ID)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Tier of the system a message was sent from.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SenderOrigin {
    /// The privileged controller.
    #[default]
    Controller,

    /// An untrusted, possibly duplicated worker context.
    Worker,
}

/// Describes who sent an inbound message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageSender {
    /// Identity of the sending participant.
    pub peer_id: PeerId,

    /// Tier the message originated from.
    pub origin: SenderOrigin,
}

impl MessageSender {
    /// Creates a sender descriptor.
    #[must_use]
    pub const fn new(peer_id: PeerId, origin: SenderOrigin) -> Self {
        Self { peer_id, origin }
    }
}

/// Transport-level failures reported by a channel.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ChannelError {
    /// Nothing on the other side is listening.
    #[error("Could not establish connection. Receiving end does not exist.")]
    NoListener,

    /// The channel has been closed.
    #[error("Channel closed")]
    Closed,

    /// Delivery failed for another reason.
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Receives inbound channel messages.
pub trait MessageListener: Send + Sync {
    /// Inspects an inbound message.
    ///
    /// Returns `None` when the message is not meant for this listener, giving
    /// other listeners a chance. Returns the reply future otherwise.
    fn on_message(
        &self,
        message: &Value,
        sender: &MessageSender,
    ) -> Option<BoxFuture<'static, Value>>;
}

/// Bidirectional message channel between two tiers.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Sends one message to `peer` and waits for its direct reply.
    ///
    /// Resolves to `None` when a listener exists but nobody claimed the
    /// message.
    async fn send(&self, peer: &PeerId, message: Value) -> Result<Option<Value>, ChannelError>;

    /// Registers a listener for every inbound message.
    fn subscribe(&self, listener: Arc<dyn MessageListener>);

    /// Removes a listener previously passed to [`Channel::subscribe`].
    ///
    /// Unknown listeners are ignored.
    fn unsubscribe(&self, listener: &Arc<dyn MessageListener>);
}

#[async_trait]
impl<T: Channel + ?Sized> Channel for Arc<T> {
    async fn send(&self, peer: &PeerId, message: Value) -> Result<Option<Value>, ChannelError> {
        (**self).send(peer, message).await
    }

    fn subscribe(&self, listener: Arc<dyn MessageListener>) {
        (**self).subscribe(listener);
    }

    fn unsubscribe(&self, listener: &Arc<dyn MessageListener>) {
        (**self).unsubscribe(listener);
    }
}

/// Whether two listener handles point at the same listener.
#[must_use]
pub fn same_listener(a: &Arc<dyn MessageListener>, b: &Arc<dyn MessageListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
