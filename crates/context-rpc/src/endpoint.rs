//! The RPC endpoint: outbound calls and inbound dispatch over one channel.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{Instrument, debug, error, instrument, warn};

use crate::channel::{Channel, ChannelError, MessageListener, MessageSender, PeerId, SenderOrigin};
use crate::codec::ErrorRecord;
use crate::config::{CallOptions, EndpointOptions};
use crate::envelope::{CallEnvelope, ResponseEnvelope};
use crate::error::{Error, HandlerError, Result};
use crate::filter::MessageFilter;
use crate::registry::{MethodRegistry, MethodResult};
use crate::timeout::with_timeout;

/// One participant of a context RPC conversation.
///
/// Identity fields are fixed at construction. Registered methods are the only
/// state that changes afterwards. Cloning yields another handle to the same
/// endpoint.
pub struct Endpoint<C: Channel> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: Channel> {
    channel: Arc<C>,
    context: String,
    instance_token: Option<String>,
    trusted_peer: PeerId,
    default_timeout: Duration,
    dispatcher: Arc<Dispatcher>,
    attached: Mutex<bool>,
}

impl<C: Channel> Drop for Inner<C> {
    fn drop(&mut self) {
        if *self.attached.get_mut() {
            let listener: Arc<dyn MessageListener> = self.dispatcher.clone();
            self.channel.unsubscribe(&listener);
            debug!(context = %self.context, "endpoint dropped while attached, detached it");
        }
    }
}

/// Inbound half of an endpoint, subscribed to the channel while attached.
struct Dispatcher {
    filter: MessageFilter,
    methods: MethodRegistry,
}

impl<C: Channel> Endpoint<C> {
    /// Creates an endpoint bound to `channel`.
    ///
    /// # Errors
    ///
    /// Returns an error if the options violate the identity invariants, see
    /// [`EndpointOptions::validate`].
    pub fn new(channel: C, options: EndpointOptions) -> Result<Self> {
        options.validate()?;

        let EndpointOptions {
            context,
            instance_token,
            trusted_peer,
            expected_origin,
            default_timeout_ms,
        } = options;

        let dispatcher = Arc::new(Dispatcher {
            filter: MessageFilter::new(
                trusted_peer.clone(),
                expected_origin,
                context.clone(),
                instance_token.clone(),
            ),
            methods: MethodRegistry::new(),
        });

        Ok(Self {
            inner: Arc::new(Inner {
                channel: Arc::new(channel),
                context,
                instance_token,
                trusted_peer,
                default_timeout: Duration::from_millis(default_timeout_ms),
                dispatcher,
                attached: Mutex::new(false),
            }),
        })
    }

    /// Creates a builder for an endpoint bound to `channel`.
    pub fn builder(channel: C) -> EndpointBuilder<C> {
        EndpointBuilder::new(channel)
    }

    /// Routing namespace of this endpoint.
    #[must_use]
    pub fn context(&self) -> &str {
        &self.inner.context
    }

    /// Instance token of this endpoint, if any.
    #[must_use]
    pub fn instance_token(&self) -> Option<&str> {
        self.inner.instance_token.as_deref()
    }

    /// Peer identity calls are sent to and accepted from.
    #[must_use]
    pub fn trusted_peer(&self) -> &PeerId {
        &self.inner.trusted_peer
    }

    /// Timeout of calls that do not set their own.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Methods exposed by this endpoint.
    #[must_use]
    pub fn registry(&self) -> &MethodRegistry {
        &self.inner.dispatcher.methods
    }

    /// Starts handling inbound messages. Calling it again has no effect.
    pub fn attach(&self) {
        let mut attached = self.inner.attached.lock();
        if !*attached {
            self.inner.channel.subscribe(self.listener());
            *attached = true;
            debug!(context = %self.inner.context, "endpoint attached");
        }
    }

    /// Stops handling inbound messages. Calling it while detached has no
    /// effect.
    pub fn detach(&self) {
        let mut attached = self.inner.attached.lock();
        if *attached {
            self.inner.channel.unsubscribe(&self.listener());
            *attached = false;
            debug!(context = %self.inner.context, "endpoint detached");
        }
    }

    /// Whether the endpoint currently handles inbound messages.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        *self.inner.attached.lock()
    }

    fn listener(&self) -> Arc<dyn MessageListener> {
        self.inner.dispatcher.clone()
    }

    /// Registers an asynchronous method handler.
    pub fn method<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.registry().register(name, handler);
    }

    /// Registers a method handler that returns its result directly.
    pub fn method_sync<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>) -> MethodResult + Send + Sync + 'static,
    {
        self.registry().register_sync(name, handler);
    }

    /// Registers every entry of a name to handler mapping.
    pub fn methods<I, N, F, Fut>(&self, handlers: I)
    where
        I: IntoIterator<Item = (N, F)>,
        N: Into<String>,
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.registry().register_all(handlers);
    }

    /// Handles one inbound channel message.
    ///
    /// Returns `None` when the message is not addressed to this endpoint.
    /// Otherwise returns the reply, which always resolves to a response
    /// envelope.
    #[must_use]
    pub fn handle_message(
        &self,
        message: &Value,
        sender: &MessageSender,
    ) -> Option<BoxFuture<'static, Value>> {
        self.inner.dispatcher.on_message(message, sender)
    }

    /// Calls a remote method and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidCall`] before anything is sent, for an empty name or
    ///   a zero timeout.
    /// - [`Error::NoResponse`] when nobody listens or the reply is empty.
    /// - [`Error::Timeout`] when no reply arrives in time.
    /// - [`Error::Remote`] when the remote handler failed.
    pub async fn call(&self, options: impl Into<CallOptions>, params: Vec<Value>) -> Result<Value> {
        self.call_with(options.into(), params).await
    }

    /// Calls a remote method and deserializes its result.
    ///
    /// # Errors
    ///
    /// Everything [`Endpoint::call`] returns, plus [`Error::InvalidResponse`]
    /// when the result does not deserialize into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        options: impl Into<CallOptions>,
        params: Vec<Value>,
    ) -> Result<T> {
        let value = self.call_with(options.into(), params).await?;
        serde_json::from_value(value).map_err(Error::InvalidResponse)
    }

    /// Calls a remote method without waiting for it.
    ///
    /// Failures are logged and never reach the caller, including a missing
    /// Tokio runtime.
    pub fn call_and_forget(&self, options: impl Into<CallOptions>, params: Vec<Value>) {
        let options = options.into();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(
                method = %options.name,
                "call_and_forget: no Tokio runtime available, the call was not sent"
            );
            return;
        };

        let endpoint = self.clone();
        runtime.spawn(async move {
            let method = options.name.clone();
            if let Err(err) = endpoint.call_with(options, params).await {
                error!(
                    method = %method,
                    error_name = err.name(),
                    error = %err,
                    "call_and_forget: the remote method rejected with an error"
                );
            }
        }
        .in_current_span());
    }

    #[instrument(
        name = "context_rpc_call",
        skip(self, options, params),
        fields(context = %self.inner.context, method = %options.name)
    )]
    async fn call_with(&self, options: CallOptions, params: Vec<Value>) -> Result<Value> {
        options.validate()?;

        let timeout = options.timeout.unwrap_or(self.inner.default_timeout);
        let name = options.name;

        let envelope = CallEnvelope {
            context: self.inner.context.clone(),
            instance_token: self.inner.instance_token.clone(),
            method: name.clone(),
            params,
        };
        let message = serde_json::to_value(&envelope).map_err(Error::Serialization)?;

        let channel = Arc::clone(&self.inner.channel);
        let peer = self.inner.trusted_peer.clone();
        let method = name.clone();
        let send = async move {
            channel
                .send(&peer, message)
                .await
                .map_err(|err| match err {
                    ChannelError::NoListener => Error::NoResponse {
                        method,
                        source: Some(ChannelError::NoListener),
                    },
                    other => Error::Channel(other),
                })
        };

        debug!(timeout_ms = timeout.as_millis(), "sending call");

        let reply = with_timeout(send, timeout, |timeout| Error::Timeout {
            method: name.clone(),
            timeout,
        })
        .await?;

        let reply = match reply {
            Some(reply) if !is_falsy(&reply) => reply,
            _ => {
                return Err(Error::NoResponse {
                    method: name,
                    source: None,
                });
            }
        };

        match serde_json::from_value(reply).map_err(Error::InvalidResponse)? {
            ResponseEnvelope::Result(value) => Ok(value),
            ResponseEnvelope::Error(record) => {
                debug!(error_name = %record.name, "remote method failed");
                Err(Error::Remote(record.decode()))
            }
        }
    }
}

impl<C: Channel> Clone for Endpoint<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Channel> fmt::Debug for Endpoint<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("context", &self.inner.context)
            .field("instance_token", &self.inner.instance_token)
            .field("trusted_peer", &self.inner.trusted_peer)
            .field("default_timeout", &self.inner.default_timeout)
            .field("attached", &self.is_attached())
            .finish_non_exhaustive()
    }
}

impl MessageListener for Dispatcher {
    fn on_message(
        &self,
        message: &Value,
        sender: &MessageSender,
    ) -> Option<BoxFuture<'static, Value>> {
        let CallEnvelope { method, params, .. } = self.filter.matches(message, sender)?;

        debug!(method = %method, "dispatching inbound call");

        // Lookup and invocation happen now; only awaiting the handler is deferred.
        let invoked = panic::catch_unwind(AssertUnwindSafe(|| self.methods.call(&method, params)));

        Some(
            async move {
                let outcome = match invoked {
                    Ok(pending) => AssertUnwindSafe(pending).catch_unwind().await,
                    Err(payload) => Err(payload),
                };

                let response = match outcome {
                    Ok(Ok(result)) => ResponseEnvelope::Result(result),
                    Ok(Err(err)) => {
                        debug!(method = %method, error = %err, "method failed");
                        ResponseEnvelope::Error(encode_handler_error(&err))
                    }
                    Err(payload) => {
                        warn!(method = %method, "method panicked");
                        ResponseEnvelope::Error(ErrorRecord::from_panic(&*payload))
                    }
                };

                response.into_value()
            }
            .boxed(),
        )
    }
}

/// Whether a reply counts as empty: `null`, `false`, zero or `""`.
#[allow(clippy::float_cmp)]
fn is_falsy(reply: &Value) -> bool {
    match reply {
        Value::Null => true,
        Value::Bool(value) => !value,
        Value::Number(number) => number.as_f64().is_some_and(|value| value == 0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn encode_handler_error(err: &HandlerError) -> ErrorRecord {
    ErrorRecord::encode(&**err)
}

/// Builder for [`Endpoint`].
pub struct EndpointBuilder<C: Channel> {
    channel: C,
    options: EndpointOptions,
}

impl<C: Channel> EndpointBuilder<C> {
    /// Creates a builder with default options and no context.
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            options: EndpointOptions::new(String::new()),
        }
    }

    /// Sets the routing namespace.
    #[must_use]
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.options.context = context.into();
        self
    }

    /// Sets the instance token.
    #[must_use]
    pub fn instance_token(mut self, token: impl Into<String>) -> Self {
        self.options.instance_token = Some(token.into());
        self
    }

    /// Sets the trusted peer identity.
    #[must_use]
    pub fn trusted_peer(mut self, peer: impl Into<PeerId>) -> Self {
        self.options.trusted_peer = peer.into();
        self
    }

    /// Sets the tier inbound messages must come from.
    #[must_use]
    pub const fn expected_origin(mut self, origin: SenderOrigin) -> Self {
        self.options.expected_origin = origin;
        self
    }

    /// Sets the default call timeout.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.options.default_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Builds the endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured identity is invalid.
    pub fn build(self) -> Result<Endpoint<C>> {
        Endpoint::new(self.channel, self.options)
    }
}
