//! Name to handler mapping for methods exposed by an endpoint.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, HandlerError};

/// Result produced by a method handler.
pub type MethodResult = Result<Value, HandlerError>;

/// A callable RPC method.
pub trait Method: Send + Sync + 'static {
    /// Invokes the method with positional parameters.
    fn call(&self, params: Vec<Value>) -> BoxFuture<'static, MethodResult>;
}

impl<F, Fut> Method for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MethodResult> + Send + 'static,
{
    fn call(&self, params: Vec<Value>) -> BoxFuture<'static, MethodResult> {
        self(params).boxed()
    }
}

/// Adapter for handlers that complete without suspending.
struct SyncMethod<F>(F);

impl<F> Method for SyncMethod<F>
where
    F: Fn(Vec<Value>) -> MethodResult + Send + Sync + 'static,
{
    fn call(&self, params: Vec<Value>) -> BoxFuture<'static, MethodResult> {
        futures::future::ready((self.0)(params)).boxed()
    }
}

/// Registered methods of one endpoint.
///
/// Cloning yields another handle to the same set of methods.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: Arc<DashMap<String, Arc<dyn Method>>>,
}

impl MethodRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an asynchronous handler, replacing any previous handler with
    /// that name.
    pub fn register<F, Fut>(&self, name: impl Into<String>, method: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.insert(name.into(), Arc::new(method));
    }

    /// Registers a handler that returns its result directly.
    pub fn register_sync<F>(&self, name: impl Into<String>, method: F)
    where
        F: Fn(Vec<Value>) -> MethodResult + Send + Sync + 'static,
    {
        self.insert(name.into(), Arc::new(SyncMethod(method)));
    }

    /// Registers every entry of a name to handler mapping.
    pub fn register_all<I, N, F, Fut>(&self, methods: I)
    where
        I: IntoIterator<Item = (N, F)>,
        N: Into<String>,
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        for (name, method) in methods {
            self.register(name, method);
        }
    }

    fn insert(&self, name: String, method: Arc<dyn Method>) {
        if self.methods.insert(name.clone(), method).is_some() {
            debug!(method = %name, "replaced registered method");
        }
    }

    /// Whether a handler is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no methods are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Invokes the handler registered under `name`.
    ///
    /// The handler is looked up when this function is called, not when the
    /// returned future is first polled. An unknown name resolves to
    /// [`Error::MethodNotFound`].
    pub fn call(&self, name: &str, params: Vec<Value>) -> BoxFuture<'static, MethodResult> {
        let method = self.methods.get(name).map(|entry| Arc::clone(entry.value()));

        match method {
            Some(method) => method.call(params),
            None => {
                let err: HandlerError = Box::new(Error::MethodNotFound(name.to_string()));
                futures::future::ready(Err(err)).boxed()
            }
        }
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.methods.iter().map(|e| e.key().clone()).collect();
        names.sort();
        f.debug_struct("MethodRegistry")
            .field("methods", &names)
            .finish()
    }
}
