//! Context-scoped RPC between a controller and its workers.
//!
//! Both sides share one message channel. Every participant owns an
//! [`Endpoint`] identified by a context name and an optional instance token,
//! exposes named methods to its peer, and calls the peer's methods by name.
//!
//! # Features
//!
//! - **Routing**: Calls are delivered only to the endpoint whose context and
//!   instance token match
//! - **Timeouts**: Every call races a deadline, 15004ms unless overridden
//! - **Error Transport**: Handler failures reach the caller with their name,
//!   message, stack and cause chain intact
//! - **Fire-and-Forget**: Calls whose outcome nobody awaits are still logged
//!   when they fail
//!
//! # Example
//!
//! ```no_run
//! use proven_context_rpc::{Channel, Endpoint, Result};
//! use serde_json::json;
//!
//! async fn example<C: Channel>(channel: C) -> Result<()> {
//!     let endpoint = Endpoint::builder(channel)
//!         .context("runner-modules/tabs")
//!         .build()?;
//!
//!     endpoint.method_sync("ping", |_| Ok(json!("pong")));
//!     endpoint.attach();
//!
//!     let tab = endpoint.call("tabs.current", vec![]).await?;
//!     println!("{tab}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod registry;
pub mod timeout;

// Re-export commonly used types
pub use channel::{
    Channel, ChannelError, DEFAULT_PEER_ID, MessageListener, MessageSender, PeerId, SenderOrigin,
    same_listener,
};
pub use codec::{ErrorRecord, NamedError};
pub use config::{
    CallOptions, DEFAULT_CALL_TIMEOUT, DEFAULT_CALL_TIMEOUT_MS, EndpointOptions,
    generate_instance_token,
};
pub use endpoint::{Endpoint, EndpointBuilder};
pub use envelope::{CallEnvelope, ResponseEnvelope};
pub use error::{Error, HandlerError, Result};
pub use filter::MessageFilter;
pub use registry::{Method, MethodRegistry, MethodResult};
pub use timeout::with_timeout;

// Re-export dependencies that are part of our public API
pub use serde_json::Value;
