//! In-memory channel implementation for testing
//!
//! A [`MemoryHub`] connects any number of [`MemoryChannel`] handles living in
//! the same process. A message sent through one handle is offered to the
//! listeners of every other handle, mirroring how a browser extension runtime
//! broadcasts to all of its contexts.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use futures::future::{BoxFuture, select_all};
use parking_lot::RwLock;
use proven_context_rpc::{
    Channel, ChannelError, MessageListener, MessageSender, PeerId, SenderOrigin, same_listener,
};
use serde_json::Value;
use tracing::{debug, trace};

struct Subscription {
    handle: u64,
    listener: Arc<dyn MessageListener>,
}

#[derive(Default)]
struct HubState {
    next_handle: AtomicU64,
    subscriptions: RwLock<Vec<Subscription>>,
}

/// Shared medium connecting in-memory channel handles.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<HubState>,
}

impl MemoryHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a handle whose messages carry `identity`.
    #[must_use]
    pub fn channel(&self, identity: MessageSender) -> MemoryChannel {
        let handle = self.state.next_handle.fetch_add(1, Ordering::Relaxed);

        debug!(handle, peer = %identity.peer_id, origin = ?identity.origin, "opening memory channel");

        MemoryChannel {
            state: Arc::clone(&self.state),
            handle,
            identity,
            closed: AtomicBool::new(false),
        }
    }

    /// Opens a handle for the trusted controller tier.
    #[must_use]
    pub fn controller(&self) -> MemoryChannel {
        self.channel(MessageSender::new(PeerId::default(), SenderOrigin::Controller))
    }

    /// Opens a handle for a worker context of the same peer.
    #[must_use]
    pub fn worker(&self) -> MemoryChannel {
        self.channel(MessageSender::new(PeerId::default(), SenderOrigin::Worker))
    }

    /// Number of listeners currently subscribed across all handles.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.state.subscriptions.read().len()
    }
}

impl fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHub")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// One participant's view of a [`MemoryHub`].
pub struct MemoryChannel {
    state: Arc<HubState>,
    handle: u64,
    identity: MessageSender,
    closed: AtomicBool,
}

impl MemoryChannel {
    /// Identity attached to every message sent through this handle.
    #[must_use]
    pub const fn identity(&self) -> &MessageSender {
        &self.identity
    }

    /// Closes the handle and drops its listeners.
    ///
    /// Sending through a closed handle fails with [`ChannelError::Closed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state
                .subscriptions
                .write()
                .retain(|subscription| subscription.handle != self.handle);
            debug!(handle = self.handle, "memory channel closed");
        }
    }

    /// Whether [`MemoryChannel::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn remote_listeners(&self) -> Vec<Arc<dyn MessageListener>> {
        self.state
            .subscriptions
            .read()
            .iter()
            .filter(|subscription| subscription.handle != self.handle)
            .map(|subscription| Arc::clone(&subscription.listener))
            .collect()
    }
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("handle", &self.handle)
            .field("identity", &self.identity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&self, peer: &PeerId, message: Value) -> Result<Option<Value>, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let listeners = self.remote_listeners();
        if listeners.is_empty() {
            trace!(handle = self.handle, %peer, "no remote listeners");
            return Err(ChannelError::NoListener);
        }

        // Every listener sees the message, the first reply to settle wins.
        let claimed: Vec<BoxFuture<'static, Value>> = listeners
            .iter()
            .filter_map(|listener| listener.on_message(&message, &self.identity))
            .collect();

        if claimed.is_empty() {
            trace!(handle = self.handle, %peer, "message not claimed by any listener");
            return Ok(None);
        }

        let (reply, _, remaining) = select_all(claimed).await;
        for pending in remaining {
            tokio::spawn(pending);
        }

        Ok(Some(reply))
    }

    fn subscribe(&self, listener: Arc<dyn MessageListener>) {
        if self.is_closed() {
            return;
        }

        self.state.subscriptions.write().push(Subscription {
            handle: self.handle,
            listener,
        });
    }

    fn unsubscribe(&self, listener: &Arc<dyn MessageListener>) {
        self.state.subscriptions.write().retain(|subscription| {
            subscription.handle != self.handle || !same_listener(&subscription.listener, listener)
        });
    }
}
