//! # Loopback Flows
//!
//! Two processors joined by the in-memory transport.
//!
//! ## Flows Tested:
//!
//! 1. **Typed calls**: arguments encoded, result decoded, pending table drained
//! 2. **Nested callbacks**: a handler calls back into its caller mid-request
//! 3. **Timeouts**: slow handlers, late responses, concurrent abandoned calls
//! 4. **Teardown**: outstanding calls fail, the peer is disconnected
//! 5. **Backpressure**: inbound handlers never exceed the configured limit,
//!    nested callbacks still complete, a full backlog rejects requests

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use duplex_rpc::adapters::memory;
    use duplex_rpc::{AggregateError, RpcConfig, RpcError, RpcProcessor, SessionEvent};
    use serde::{Deserialize, Serialize};
    use tokio::time::Instant;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    #[derive(Debug, Serialize, Deserialize)]
    struct TestClass {
        #[serde(rename = "Member")]
        member: String,
    }

    /// The demo's server-side methods
    fn register_demo(server: &RpcProcessor) {
        server
            .on("Hello1", |name: String| async move {
                Ok::<_, anyhow::Error>(format!("hello {name}"))
            })
            .unwrap();

        let conn = server.clone();
        server
            .on("Hello2", move || {
                let conn = conn.clone();
                async move {
                    let name: String = conn.call("GetName", ()).await?;
                    Ok::<_, anyhow::Error>(format!("hello {name}"))
                }
            })
            .unwrap();

        server
            .on("Add", |a: i32, b: i32| async move { Ok::<_, anyhow::Error>(a + b) })
            .unwrap();

        server
            .on("Test", |o: TestClass| async move {
                Ok::<_, anyhow::Error>(o.member.to_lowercase())
            })
            .unwrap();
    }

    fn register_slow(server: &RpcProcessor, delay: Duration) {
        server
            .on("Slow", move || async move {
                tokio::time::sleep(delay).await;
                Ok::<_, anyhow::Error>("done")
            })
            .unwrap();
    }

    // =============================================================================
    // TYPED CALLS
    // =============================================================================

    #[tokio::test]
    async fn test_demo_methods() {
        let (client, server) = memory::pair(RpcConfig::default());
        register_demo(&server);
        client
            .on("GetName", || async { Ok::<_, anyhow::Error>("Rohan") })
            .unwrap();

        let hello1: String = client.call("Hello1", ("Brian",)).await.unwrap();
        let hello2: String = client.call("Hello2", ()).await.unwrap();
        let sum: i32 = client.call("Add", (10, 301)).await.unwrap();
        let test: String = client
            .call("Test", (TestClass { member: "HELP".into() },))
            .await
            .unwrap();

        assert_eq!(hello1, "hello Brian");
        assert_eq!(hello2, "hello Rohan");
        assert_eq!(sum, 311);
        assert_eq!(test, "help");

        assert_eq!(client.pending_count(), 0);
        assert_eq!(server.pending_count(), 0);
        assert_eq!(server.pending_stats().completed, 1);
    }

    #[tokio::test]
    async fn test_unknown_method_is_remote_error() {
        let (client, _server) = memory::pair(RpcConfig::default());

        let err = client.call::<_, ()>("Missing", ()).await.unwrap_err();
        assert!(matches!(err, RpcError::RemoteError(ref m) if m == "Unknown method 'Missing'"));
        assert!(err.is_per_call());
    }

    #[tokio::test]
    async fn test_callback_without_handler_fails_outer_call() {
        let (client, server) = memory::pair(RpcConfig::default());
        register_demo(&server);

        // Client never registered GetName
        let err = client.call::<_, String>("Hello2", ()).await.unwrap_err();
        assert!(matches!(err, RpcError::RemoteError(ref m) if m == "Unknown method 'GetName'"));
    }

    #[tokio::test]
    async fn test_single_cause_aggregate_collapses_on_the_wire() {
        let (client, server) = memory::pair(RpcConfig::default());
        server
            .on("Batch", || async {
                Err::<(), _>(anyhow::Error::new(AggregateError::new(vec![anyhow::anyhow!(
                    "row 3 rejected"
                )])))
            })
            .unwrap();
        server
            .on("Multi", || async {
                Err::<(), _>(anyhow::Error::new(AggregateError::new(vec![
                    anyhow::anyhow!("a"),
                    anyhow::anyhow!("b"),
                ])))
            })
            .unwrap();

        let single = client.call::<_, ()>("Batch", ()).await.unwrap_err();
        assert!(matches!(single, RpcError::RemoteError(ref m) if m == "row 3 rejected"));

        let multi = client.call::<_, ()>("Multi", ()).await.unwrap_err();
        assert!(matches!(multi, RpcError::RemoteError(ref m) if m == "2 errors occurred: a; b"));
    }

    #[tokio::test]
    async fn test_concurrent_calls_both_directions() {
        let (left, right) = memory::pair(RpcConfig::default());
        for side in [&left, &right] {
            side.on("Double", |n: u64| async move { Ok::<_, anyhow::Error>(n * 2) })
                .unwrap();
        }

        let calls = (0..50u64).map(|n| {
            let (caller, expected) = if n % 2 == 0 {
                (left.clone(), n * 2)
            } else {
                (right.clone(), n * 2)
            };
            async move {
                let out: u64 = caller.call("Double", (n,)).await.unwrap();
                assert_eq!(out, expected);
            }
        });
        futures::future::join_all(calls).await;

        assert_eq!(left.pending_count(), 0);
        assert_eq!(right.pending_count(), 0);
    }

    // =============================================================================
    // TIMEOUTS
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_two_slow_calls_time_out() {
        let config = RpcConfig::default().with_call_timeout(Duration::from_secs(1));
        let (client, server) = memory::pair(config);
        register_slow(&server, Duration::from_secs(10));

        let started = Instant::now();
        let (a, b) = tokio::join!(
            client.call::<_, String>("Slow", ()),
            client.call::<_, String>("Slow", ()),
        );

        assert!(matches!(a, Err(RpcError::CallTimedOut { .. })));
        assert!(matches!(b, Err(RpcError::CallTimedOut { .. })));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_is_dropped() {
        let config = RpcConfig::default().with_call_timeout(Duration::from_millis(500));
        let (client, server) = memory::pair(config);
        register_slow(&server, Duration::from_secs(2));
        let mut events = client.subscribe();

        let err = client.call::<_, String>("Slow", ()).await.unwrap_err();
        assert!(matches!(err, RpcError::CallTimedOut { ref method, .. } if method == "Slow"));

        // The handler finishes later; its response finds no pending call
        match events.recv().await {
            Some(SessionEvent::Error(e)) => {
                assert!(matches!(*e, RpcError::UnknownCorrelationId(_)))
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Session keeps working
        client.set_call_timeout(Duration::from_secs(5));
        let out: String = client.call("Slow", ()).await.unwrap();
        assert_eq!(out, "done");
        assert_eq!(client.pending_stats().timeouts, 1);
    }

    // =============================================================================
    // TEARDOWN
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_teardown_fails_outstanding_calls() {
        let (client, server) = memory::pair(RpcConfig::default());
        register_slow(&server, Duration::from_secs(60));

        let outstanding = {
            let client = client.clone();
            tokio::spawn(async move { client.call::<_, String>("Slow", ()).await })
        };

        while client.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        let mut server_events = server.subscribe();
        client.teardown();
        client.teardown();

        assert!(matches!(
            outstanding.await.unwrap(),
            Err(RpcError::SessionClosed)
        ));
        assert!(matches!(
            client.call::<_, String>("Slow", ()).await,
            Err(RpcError::SessionClosed)
        ));

        assert!(matches!(
            server_events.recv().await,
            Some(SessionEvent::Disconnected)
        ));
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn test_disconnect_observers_fire_once() {
        let (client, server) = memory::pair(RpcConfig::default());
        let disconnects = Arc::new(AtomicUsize::new(0));

        let observer = {
            let disconnects = Arc::clone(&disconnects);
            server.on_disconnected(move || {
                disconnects.fetch_add(1, Ordering::SeqCst);
            })
        };

        client.teardown();
        observer.await.unwrap();

        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    // =============================================================================
    // BACKPRESSURE
    // =============================================================================

    #[tokio::test(start_paused = true)]
    async fn test_inbound_handlers_bounded() {
        let config = RpcConfig {
            max_concurrent_requests: 1,
            ..RpcConfig::default()
        };
        let (client, server) = memory::pair(config);

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            server
                .on("Work", move || {
                    let running = Arc::clone(&running);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(())
                    }
                })
                .unwrap();
        }

        let started = Instant::now();
        let calls = (0..3).map(|_| client.call::<_, ()>("Work", ()));
        for result in futures::future::join_all(calls).await {
            result.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_callbacks_complete_under_dispatch_limit() {
        let config = RpcConfig {
            max_concurrent_requests: 1,
            ..RpcConfig::default()
        };
        let (client, server) = memory::pair(config);
        register_demo(&server);
        client
            .on("GetName", || async { Ok::<_, anyhow::Error>("Rohan") })
            .unwrap();

        // The second Hello2 waits for the permit held by the first, whose
        // GetName response must still reach the server
        let (a, b) = tokio::join!(
            client.call::<_, String>("Hello2", ()),
            client.call::<_, String>("Hello2", ()),
        );

        assert_eq!(a.unwrap(), "hello Rohan");
        assert_eq!(b.unwrap(), "hello Rohan");
        assert_eq!(server.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_backlog_rejects_excess_requests() {
        let config = RpcConfig {
            max_concurrent_requests: 1,
            max_queued_requests: 1,
            ..RpcConfig::default()
        };
        let (client, server) = memory::pair(config);
        register_slow(&server, Duration::from_secs(1));

        let calls = (0..3).map(|_| client.call::<_, String>("Slow", ()));
        let results = futures::future::join_all(calls).await;

        let done = results.iter().filter(|r| matches!(r, Ok(s) if s == "done")).count();
        let rejected: Vec<_> = results
            .iter()
            .filter_map(|r| match r {
                Err(RpcError::RemoteError(m)) => Some(m.as_str()),
                _ => None,
            })
            .collect();

        assert_eq!(done, 2);
        assert_eq!(
            rejected,
            ["Method 'Slow' rejected: 2 requests already in flight"]
        );

        // Slots free up once the admitted calls finish
        let again: String = client.call("Slow", ()).await.unwrap();
        assert_eq!(again, "done");
    }
}
