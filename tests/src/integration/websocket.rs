//! # WebSocket Flows
//!
//! Acceptor and initiator talking over real sockets on localhost.
//!
//! ## Flows Tested:
//!
//! 1. **Demo program**: Hello1, Hello2 (with callback), Add, Test, Missing
//! 2. **Session bookkeeping**: one processor per accepted connection
//! 3. **Shutdown**: acceptor close disconnects every initiator; initiator close ends its session
//! 4. **Wire compatibility**: raw `req`/`res` frames from a plain WebSocket client

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use duplex_rpc::{Acceptor, Initiator, RpcConfig, RpcError, RpcProcessor, SessionEvent};
    use futures::{SinkExt, StreamExt};
    use serde::{Deserialize, Serialize};
    use serde_json::Value;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;

    const WAIT: Duration = Duration::from_secs(5);

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    #[derive(Debug, Serialize, Deserialize)]
    struct TestClass {
        #[serde(rename = "Member")]
        member: String,
    }

    fn register_demo(session: &RpcProcessor) {
        let _ = session.on("Hello1", |name: String| async move {
            Ok::<_, anyhow::Error>(format!("hello {name}"))
        });

        let conn = session.clone();
        let _ = session.on("Hello2", move || {
            let conn = conn.clone();
            async move {
                let name: String = conn.call("GetName", ()).await?;
                Ok::<_, anyhow::Error>(format!("hello {name}"))
            }
        });

        let _ = session.on_sync("Add", |a: i32, b: i32| Ok::<_, anyhow::Error>(a + b));

        let _ = session.on_sync("Test", |o: TestClass| {
            Ok::<_, anyhow::Error>(o.member.to_lowercase())
        });
    }

    async fn demo_acceptor() -> Acceptor {
        Acceptor::bind("127.0.0.1:0", RpcConfig::default(), register_demo)
            .await
            .unwrap()
    }

    async fn connected_initiator(acceptor: &Acceptor) -> Initiator {
        let initiator = Initiator::new(RpcConfig::default());
        initiator
            .processor()
            .on_sync("GetName", || Ok::<_, anyhow::Error>("Rohan"))
            .unwrap();
        initiator.connect(&acceptor.url()).await.unwrap();
        initiator
    }

    async fn wait_for_sessions(acceptor: &Acceptor, count: usize) {
        timeout(WAIT, async {
            while acceptor.session_count() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    // =============================================================================
    // DEMO PROGRAM
    // =============================================================================

    #[tokio::test]
    async fn test_demo_over_websocket() {
        let acceptor = demo_acceptor().await;
        let client = connected_initiator(&acceptor).await;
        let rpc = client.processor();

        let hello1: String = rpc.call("Hello1", ("Brian",)).await.unwrap();
        let hello2: String = rpc.call("Hello2", ()).await.unwrap();
        let sum: i32 = rpc.call("Add", (10, 301)).await.unwrap();
        let test: String = rpc
            .call("Test", (TestClass { member: "HELP".into() },))
            .await
            .unwrap();

        assert_eq!(hello1, "hello Brian");
        assert_eq!(hello2, "hello Rohan");
        assert_eq!(sum, 311);
        assert_eq!(test, "help");

        let err = rpc.call::<_, ()>("Missing", ()).await.unwrap_err();
        assert!(matches!(err, RpcError::RemoteError(ref m) if m == "Unknown method 'Missing'"));

        client.close(None).await;
        acceptor.close().await;
    }

    #[tokio::test]
    async fn test_parameter_errors_cross_the_wire() {
        let acceptor = demo_acceptor().await;
        let client = connected_initiator(&acceptor).await;
        let rpc = client.processor();

        let arity = rpc.call::<_, i32>("Add", (1,)).await.unwrap_err();
        assert!(
            matches!(arity, RpcError::RemoteError(ref m) if m == "Method 'Add' requires 2 arguments")
        );

        let typed = rpc.call::<_, i32>("Add", ("one", 2)).await.unwrap_err();
        assert!(
            matches!(typed, RpcError::RemoteError(ref m) if m == "Argument 1 for method 'Add' must be of type 'i32'")
        );

        let ret = rpc.call::<_, i32>("Hello1", ("x",)).await.unwrap_err();
        assert!(matches!(ret, RpcError::ReturnTypeMismatch { .. }));

        acceptor.close().await;
    }

    // =============================================================================
    // SESSIONS AND SHUTDOWN
    // =============================================================================

    #[tokio::test]
    async fn test_one_processor_per_connection() {
        let acceptor = demo_acceptor().await;
        let a = connected_initiator(&acceptor).await;
        let b = connected_initiator(&acceptor).await;

        wait_for_sessions(&acceptor, 2).await;
        let sessions = acceptor.sessions();
        assert_ne!(sessions[0].session_id(), sessions[1].session_id());

        let (x, y) = tokio::join!(
            a.processor().call::<_, i32>("Add", (1, 2)),
            b.processor().call::<_, i32>("Add", (3, 4)),
        );
        assert_eq!(x.unwrap(), 3);
        assert_eq!(y.unwrap(), 7);

        a.close(Some("bye")).await;
        wait_for_sessions(&acceptor, 1).await;

        acceptor.close().await;
    }

    #[tokio::test]
    async fn test_acceptor_close_disconnects_initiator() {
        let acceptor = demo_acceptor().await;
        let client = connected_initiator(&acceptor).await;
        let mut events = client.processor().subscribe();
        wait_for_sessions(&acceptor, 1).await;

        acceptor.close().await;
        assert_eq!(acceptor.session_count(), 0);

        let event = timeout(WAIT, events.recv()).await.unwrap();
        assert!(matches!(event, Some(SessionEvent::Disconnected)));

        timeout(WAIT, client.closed()).await.unwrap();
        assert!(!client.is_connected());
        assert!(matches!(
            client.processor().call::<_, i32>("Add", (1, 2)).await,
            Err(RpcError::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_second_connect_rejected() {
        let acceptor = demo_acceptor().await;
        let client = connected_initiator(&acceptor).await;
        wait_for_sessions(&acceptor, 1).await;

        let err = client.connect(&acceptor.url()).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(ref m) if m == "already connected"));

        // The first connection is untouched
        let sum: i32 = client.processor().call("Add", (1, 2)).await.unwrap();
        assert_eq!(sum, 3);
        assert_eq!(acceptor.session_count(), 1);

        client.close(None).await;
        acceptor.close().await;
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let acceptor = demo_acceptor().await;
        let url = acceptor.url();
        acceptor.close().await;

        let client = Initiator::new(RpcConfig::default());
        let err = client.connect(&url).await.unwrap_err();
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = RpcConfig {
            max_concurrent_requests: 0,
            ..RpcConfig::default()
        };
        let result = Acceptor::bind("127.0.0.1:0", config, |_session: &RpcProcessor| {}).await;
        assert!(matches!(result, Err(RpcError::Config(_))));
    }

    // =============================================================================
    // WIRE COMPATIBILITY
    // =============================================================================

    #[tokio::test]
    async fn test_raw_frames_and_bad_input() {
        let (error_tx, mut error_rx) = mpsc::unbounded_channel();
        let acceptor = Acceptor::bind("127.0.0.1:0", RpcConfig::default(), move |session| {
            register_demo(session);
            let error_tx = error_tx.clone();
            session.on_error(move |e| {
                let _ = error_tx.send(e.to_string());
            });
        })
        .await
        .unwrap();

        let (mut socket, _) = tokio_tungstenite::connect_async(acceptor.url())
            .await
            .unwrap();

        // Garbage is reported on the session's error signal and the connection survives
        socket.send(Message::Text("xyz{}".into())).await.unwrap();
        let reported = timeout(WAIT, error_rx.recv()).await.unwrap().unwrap();
        assert!(reported.contains("xyz"));

        socket
            .send(Message::Text(
                r#"req{"id":"raw-1","method":"Add","params":[10,301]}"#.into(),
            ))
            .await
            .unwrap();

        let frame = timeout(WAIT, async {
            loop {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                    Some(Ok(_)) => continue,
                    other => panic!("socket ended: {other:?}"),
                }
            }
        })
        .await
        .unwrap();

        let body = frame.strip_prefix("res").unwrap();
        let response: Value = serde_json::from_str(body).unwrap();
        assert_eq!(response["id"], "raw-1");
        assert_eq!(response["result"], 311);
        assert!(response["error"].is_null());

        let _ = socket.close(None).await;
        acceptor.close().await;
    }
}
