//! End-to-end tests of endpoints talking over an in-memory hub

#[cfg(test)]
mod endpoint_tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use proven_context_rpc::{
        CallOptions, ChannelError, Endpoint, Error, HandlerError, NamedError, SenderOrigin,
    };
    use proven_context_rpc_memory::{MemoryChannel, MemoryHub};
    use serde_json::{Value, json};
    use tracing_test::traced_test;

    /// Endpoint in the controller tier, accepting calls from workers.
    fn controller(hub: &MemoryHub, context: &str) -> Endpoint<MemoryChannel> {
        let endpoint = Endpoint::builder(hub.controller())
            .context(context)
            .expected_origin(SenderOrigin::Worker)
            .build()
            .unwrap();
        endpoint.attach();
        endpoint
    }

    /// Endpoint in a worker context, accepting calls from the controller.
    fn worker(hub: &MemoryHub, context: &str) -> Endpoint<MemoryChannel> {
        let endpoint = Endpoint::builder(hub.worker())
            .context(context)
            .build()
            .unwrap();
        endpoint.attach();
        endpoint
    }

    fn failure(name: &str, message: &str) -> HandlerError {
        Box::new(NamedError::new(name, message))
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let hub = MemoryHub::new();
        let a = controller(&hub, "x");
        let b = worker(&hub, "x");

        a.method("ping", |_| async { Ok(json!("pong")) });

        let result = b.call("ping", vec![]).await.unwrap();
        assert_eq!(result, json!("pong"));
    }

    #[tokio::test]
    async fn test_both_directions() {
        let hub = MemoryHub::new();
        let a = controller(&hub, "x");
        let b = worker(&hub, "x");

        a.method_sync("add", |params| {
            let sum: i64 = params.iter().filter_map(Value::as_i64).sum();
            Ok(json!(sum))
        });
        b.method_sync("upper", |params| {
            let text = params.first().and_then(Value::as_str).unwrap_or_default();
            Ok(json!(text.to_uppercase()))
        });

        let sum: i64 = b.call_as("add", vec![json!(2), json!(3)]).await.unwrap();
        assert_eq!(sum, 5);

        let text: String = a.call_as("upper", vec![json!("abc")]).await.unwrap();
        assert_eq!(text, "ABC");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out() {
        let hub = MemoryHub::new();
        let a = controller(&hub, "x");
        let b = worker(&hub, "x");

        let finished = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&finished);
        a.method("slow", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("late"))
            }
        });

        let err = b
            .call(CallOptions::new("slow").timeout(Duration::from_millis(10)), vec![])
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.name(), "RPCTimeoutError");
        assert_eq!(err.to_string(), "Remote call \"slow\" timed out after 10ms");

        // The handler is not cancelled and still finishes on its own.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_error_reaches_caller() {
        let hub = MemoryHub::new();
        let a = controller(&hub, "x");
        let b = worker(&hub, "x");

        a.method_sync("explode", |_| {
            Err(Box::new(std::io::Error::other("boom")) as HandlerError)
        });

        let err = b.call("explode", vec![]).await.unwrap_err();

        assert!(err.is_remote());
        let Error::Remote(remote) = err else {
            unreachable!();
        };
        assert_eq!(remote.name(), "Error");
        assert_eq!(remote.message(), "boom");
    }

    #[tokio::test]
    async fn test_cause_chain_preserved() {
        let hub = MemoryHub::new();
        let a = controller(&hub, "x");
        let b = worker(&hub, "x");

        a.method("validate", |_| async {
            let root = NamedError::new("TypeError", "expected a number")
                .with_extra("field", json!("age"));
            Err(Box::new(
                NamedError::new("ValidationError", "bad input")
                    .with_stack("at validate (form.js:1:1)")
                    .with_cause(root),
            ) as HandlerError)
        });

        let err = b.call("validate", vec![]).await.unwrap_err();

        assert_eq!(err.name(), "ValidationError");
        let Error::Remote(remote) = err else {
            unreachable!();
        };
        assert_eq!(remote.message(), "bad input");
        assert_eq!(remote.stack(), Some("at validate (form.js:1:1)"));

        let cause = remote.cause().unwrap();
        assert!(cause.is_remote());
        assert_eq!(cause.name(), "TypeError");
        assert_eq!(cause.message(), "expected a number");
        assert_eq!(cause.extra().get("field"), Some(&json!("age")));
        assert!(cause.cause().is_none());
    }

    #[tokio::test]
    async fn test_other_context_is_ignored() {
        let hub = MemoryHub::new();
        let a = controller(&hub, "y");
        let b = worker(&hub, "x");

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        a.method_sync("ping", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!("pong"))
        });

        let err = b.call("ping", vec![]).await.unwrap_err();

        assert!(matches!(err, Error::NoResponse { source: None, .. }));
        assert_eq!(err.name(), "RPCNoResponse");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let hub = MemoryHub::new();
        let _a = controller(&hub, "x");
        let b = worker(&hub, "x");

        let err = b.call("nope", vec![]).await.unwrap_err();

        assert!(err.is_remote());
        assert_eq!(err.name(), "RPCMethodNotFound");
    }

    #[tokio::test]
    async fn test_reregistration_overwrites() {
        let hub = MemoryHub::new();
        let a = controller(&hub, "x");
        let b = worker(&hub, "x");

        a.method_sync("version", |_| Ok(json!(1)));
        a.method_sync("version", |_| Ok(json!(2)));

        assert_eq!(b.call("version", vec![]).await.unwrap(), json!(2));
        assert_eq!(a.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_registration() {
        let hub = MemoryHub::new();
        let a = controller(&hub, "x");
        let b = worker(&hub, "x");

        a.methods(["tabs.first", "tabs.second"].into_iter().map(|name| {
            (name, move |_params: Vec<Value>| async move {
                Ok::<_, HandlerError>(json!(name))
            })
        }));

        assert_eq!(b.call("tabs.first", vec![]).await.unwrap(), json!("tabs.first"));
        assert_eq!(b.call("tabs.second", vec![]).await.unwrap(), json!("tabs.second"));
    }

    #[tokio::test]
    async fn test_instance_token_routing() {
        let hub = MemoryHub::new();

        let first = Endpoint::builder(hub.worker())
            .context("x")
            .instance_token("t1")
            .build()
            .unwrap();
        let second = Endpoint::builder(hub.worker())
            .context("x")
            .instance_token("t2")
            .build()
            .unwrap();
        first.method_sync("whoami", |_| Ok(json!("t1")));
        second.method_sync("whoami", |_| Ok(json!("t2")));
        first.attach();
        second.attach();

        let caller = Endpoint::builder(hub.controller())
            .context("x")
            .instance_token("t2")
            .expected_origin(SenderOrigin::Worker)
            .build()
            .unwrap();

        assert_eq!(caller.call("whoami", vec![]).await.unwrap(), json!("t2"));
    }

    #[tokio::test]
    async fn test_detached_peer_has_no_listeners() {
        let hub = MemoryHub::new();
        let a = controller(&hub, "x");
        let b = worker(&hub, "x");

        a.method_sync("ping", |_| Ok(json!("pong")));
        assert_eq!(b.call("ping", vec![]).await.unwrap(), json!("pong"));

        a.detach();
        b.detach();

        let err = b.call("ping", vec![]).await.unwrap_err();

        assert!(matches!(
            err,
            Error::NoResponse {
                source: Some(ChannelError::NoListener),
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "Remote call \"ping\" did not receive a response (there are no listeners)"
        );

        a.attach();
        assert_eq!(b.call("ping", vec![]).await.unwrap(), json!("pong"));
    }

    #[tokio::test]
    async fn test_handler_calls_back_into_peer() {
        let hub = MemoryHub::new();
        let a = controller(&hub, "x");
        let b = worker(&hub, "x");

        b.method_sync("tabs.id", |_| Ok(json!(7)));

        let peer = a.clone();
        a.method("tabs.describe", move |_| {
            let peer = peer.clone();
            async move {
                let id = peer.call("tabs.id", vec![]).await?;
                Ok::<_, HandlerError>(json!(format!("tab {id}")))
            }
        });

        assert_eq!(b.call("tabs.describe", vec![]).await.unwrap(), json!("tab 7"));
    }

    #[tokio::test]
    async fn test_concurrent_calls_keep_their_replies() {
        let hub = MemoryHub::new();
        let a = controller(&hub, "x");
        let b = worker(&hub, "x");

        a.method("echo", |params| async move {
            let delay = params.first().and_then(Value::as_u64).unwrap_or_default();
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(params.first().cloned().unwrap_or_default())
        });

        let calls = (0..8_u64).map(|i| {
            let b = b.clone();
            async move { b.call("echo", vec![json!(20 - i * 2)]).await }
        });
        let results = futures::future::join_all(calls).await;

        for (i, result) in (0..8_u64).zip(results) {
            assert_eq!(result.unwrap(), json!(20 - i * 2));
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_call_and_forget_logs_rejection() {
        let hub = MemoryHub::new();
        let a = controller(&hub, "x");
        let b = worker(&hub, "x");

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        a.method_sync("core.submitCodeCoverage", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(failure("Error", "coverage rejected"))
        });

        b.call_and_forget("core.submitCodeCoverage", vec![json!({"files": []})]);

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(logs_contain("call_and_forget"));
        assert!(logs_contain("core.submitCodeCoverage"));
        assert!(logs_contain("coverage rejected"));
    }
}
