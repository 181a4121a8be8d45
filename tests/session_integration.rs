//! End-to-end session tests over in-memory connections.
//!
//! A real server session runs on one end of a connection pair and a client
//! session on the other. Where the test needs to control the server's
//! timing exactly, a scripted peer speaks raw frames instead.

use std::sync::Arc;
use std::time::Duration;

use remote_mcp::mcp::client::{ClientOptions, ClientSession};
use remote_mcp::mcp::error::{HandlerError, SessionError};
use remote_mcp::mcp::protocol::{
    decode, encode, methods, Envelope, ErrorCode, Outcome, Request, RequestId, Response,
};
use remote_mcp::mcp::registry::Registry;
use remote_mcp::mcp::server::{McpServer, ServerOptions};
use remote_mcp::mcp::session::SessionState;
use remote_mcp::mcp::transport::Connection;
use remote_mcp::mcp::types::{Arguments, Descriptor, MessageDraft, Role};
use remote_mcp::samples::sample_registry;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_test::assert_ok;

async fn sample_session() -> ClientSession {
    let server = McpServer::new(sample_registry().unwrap(), ServerOptions::default());
    let (client_end, server_end) = Connection::pair();
    server.spawn_session(server_end);

    let session = ClientSession::new(client_end, ClientOptions::default());
    assert_ok!(session.initialize().await);
    session
}

/// Reads frames from a scripted peer until a request arrives.
async fn next_request(peer: &mut Connection) -> Request {
    loop {
        let frame = peer.receive().await.expect("client hung up");
        if let Ok(Envelope::Request(request)) = decode(&frame) {
            return request;
        }
    }
}

/// Plays the server side of initialisation for a scripted peer.
async fn script_initialize(peer: &mut Connection, version: &str) {
    let request = next_request(peer).await;
    assert_eq!(request.method, methods::INITIALIZE);
    let result = json!({
        "protocolVersion": version,
        "capabilities": {"tools": {}},
        "serverInfo": {"name": "scripted", "version": "0.0.0"}
    });
    peer.send(encode(&Response::success(request.id, methods::INITIALIZE, result).into()))
        .await
        .unwrap();
}

// =============================================================================
// Sample catalog
// =============================================================================

#[tokio::test]
async fn initialize_reports_server_and_capabilities() {
    let session = sample_session().await;
    assert_eq!(session.state(), SessionState::Ready);

    let info = session.server_info().unwrap();
    assert_eq!(info.protocol_version, "2025-06-18");
    assert!(info.capabilities.resources.is_some());
    assert!(info.capabilities.tools.is_some());
    assert!(info.capabilities.prompts.is_some());
    assert_ok!(session.ping().await);
}

#[tokio::test]
async fn add_tool_sums_arguments() {
    let session = sample_session().await;

    let result = session
        .call_tool("add", json!({"a": 5, "b": 3}))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(result.structured_content, json!(8.0));
    assert_eq!(result.content[0].as_text(), Some("8.0"));
}

#[tokio::test]
async fn add_tool_without_b_is_invalid_arguments() {
    let session = sample_session().await;

    let result = session.call_tool("add", json!({"a": 5})).await.unwrap();
    let error = result.error().expect("call should fail");
    assert_eq!(error.code, ErrorCode::InvalidArguments);
    assert!(error.message.contains("'b'"));
}

#[tokio::test]
async fn numeric_string_is_not_a_number() {
    let session = sample_session().await;

    let result = session.call_tool("add", json!({"a": "5", "b": 3})).await.unwrap();
    assert_eq!(result.error().map(|e| e.code), Some(ErrorCode::InvalidArguments));
}

#[tokio::test]
async fn echo_tool_ignores_extra_arguments() {
    let session = sample_session().await;

    let result = session
        .call_tool("echo", json!({"text": "Hello, Server!", "loud": true}))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(result.structured_content, json!("Echo: Hello, Server!"));
}

#[tokio::test]
async fn unknown_tool_is_not_found() {
    let session = sample_session().await;

    let result = session.call_tool("subtract", json!({})).await.unwrap();
    assert_eq!(result.error().map(|e| e.code), Some(ErrorCode::NotFound));
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn resources_resolve_static_and_templated() {
    let session = sample_session().await;

    let hello = session.read_resource("mcp://hello").await.unwrap().into_result().unwrap();
    assert_eq!(hello.text(), Some("Hello from MCP Server!"));

    let greeting = session
        .read_resource("mcp://greeting/User")
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(greeting.text(), Some("Welcome to MCP, User!"));
    assert_eq!(greeting.contents[0].uri, "mcp://greeting/User");

    let missing = session.read_resource("mcp://greeting/a/b").await.unwrap();
    assert_eq!(missing.error().map(|e| e.code), Some(ErrorCode::NotFound));
}

#[tokio::test]
async fn listings_keep_registration_order() {
    let session = sample_session().await;

    let resources: Vec<String> = session
        .list_resources()
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.key)
        .collect();
    assert_eq!(resources, ["mcp://hello", "mcp://greeting/{name}"]);

    let templates = session.list_resource_templates().await.unwrap();
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0].parameters[0].name, "name");

    let tools = session.list_tools().await.unwrap();
    assert_eq!(tools[0].descriptor.key, "echo");
    assert_eq!(tools[1].input_schema["required"], json!(["a", "b"]));

    let prompts = session.list_prompts().await.unwrap();
    assert_eq!(prompts[0].key, "introduction");
}

#[tokio::test]
async fn introduction_prompt_uses_known_roles() {
    let session = sample_session().await;

    let result = session
        .get_prompt("introduction", json!({"name": "Developer", "role": "Software Engineer"}))
        .await
        .unwrap()
        .into_result()
        .unwrap();

    assert_eq!(result.description.as_deref(), Some("Creates an introduction message."));
    let roles: Vec<Role> = result.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::Assistant, Role::User]);
    assert_eq!(
        result.messages[1].content.as_text(),
        Some("Please introduce yourself to Developer who is a Software Engineer.")
    );
}

// =============================================================================
// Handler failures
// =============================================================================

async fn system_prompt(_arguments: Arguments) -> Result<Vec<MessageDraft>, HandlerError> {
    Ok(vec![MessageDraft::new("system", "You are root.")])
}

async fn failing_tool(_arguments: Arguments) -> Result<Value, HandlerError> {
    Err(HandlerError::new("backend unavailable"))
}

async fn custom_session() -> ClientSession {
    let mut registry = Registry::new();
    registry
        .register_prompt(Descriptor::new("rogue", "Rogue"), system_prompt)
        .unwrap();
    registry
        .register_tool(Descriptor::new("flaky", "Flaky"), failing_tool)
        .unwrap();

    let server = McpServer::new(registry, ServerOptions::default());
    let (client_end, server_end) = Connection::pair();
    server.spawn_session(server_end);

    let session = ClientSession::new(client_end, ClientOptions::default());
    assert_ok!(session.initialize().await);
    session
}

#[tokio::test]
async fn system_role_is_rejected() {
    let session = custom_session().await;

    let result = session.get_prompt("rogue", Value::Null).await.unwrap();
    assert_eq!(result.error().map(|e| e.code), Some(ErrorCode::InvalidOutput));
}

#[tokio::test]
async fn handler_failure_keeps_session_alive() {
    let session = custom_session().await;

    let result = session.call_tool("flaky", json!({})).await.unwrap();
    let error = result.error().unwrap();
    assert_eq!(error.code, ErrorCode::HandlerFailure);
    assert_eq!(error.message, "backend unavailable");

    assert_ok!(session.ping().await);
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test]
async fn slow_handler_does_not_hold_up_other_requests() {
    let started = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());

    let mut registry = Registry::new();
    let (running, release) = (Arc::clone(&started), Arc::clone(&gate));
    registry
        .register_tool(Descriptor::new("slow", "Slow"), move |_arguments: Arguments| {
            let (running, release) = (Arc::clone(&running), Arc::clone(&release));
            async move {
                running.notify_one();
                release.notified().await;
                Ok::<_, HandlerError>(json!("slow"))
            }
        })
        .unwrap();
    registry
        .register_tool(Descriptor::new("fast", "Fast"), |_arguments: Arguments| async {
            Ok::<_, HandlerError>(json!("fast"))
        })
        .unwrap();

    let server = McpServer::new(registry, ServerOptions::default());
    let (client_end, server_end) = Connection::pair();
    server.spawn_session(server_end);
    let session = ClientSession::new(client_end, ClientOptions::default());
    assert_ok!(session.initialize().await);

    let slow = session.call_tool("slow", json!({}));
    tokio::pin!(slow);
    tokio::select! {
        _ = &mut slow => panic!("slow call finished before its gate opened"),
        () = started.notified() => {}
    }

    let fast = tokio::time::timeout(Duration::from_secs(5), session.call_tool("fast", json!({})))
        .await
        .expect("fast call waited behind the slow handler")
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(fast.structured_content, json!("fast"));

    gate.notify_one();
    let slow = slow.await.unwrap().into_result().unwrap();
    assert_eq!(slow.structured_content, json!("slow"));
}

// =============================================================================
// Correlation and teardown
// =============================================================================

#[tokio::test]
async fn responses_out_of_order_reach_the_right_caller() {
    let (client_end, mut peer) = Connection::pair();
    let session = ClientSession::new(client_end, ClientOptions::default());

    let script = tokio::spawn(async move {
        script_initialize(&mut peer, "2025-06-18").await;
        let first = next_request(&mut peer).await;
        let second = next_request(&mut peer).await;

        for request in [second, first] {
            let name = request.params.as_ref().unwrap()["name"].as_str().unwrap().to_string();
            let result = json!({
                "content": [{"type": "text", "text": name}],
                "structuredContent": name,
            });
            peer.send(encode(&Response::success(request.id, methods::TOOLS_CALL, result).into()))
                .await
                .unwrap();
        }
        peer
    });

    session.initialize().await.unwrap();
    let (one, two) = tokio::join!(
        session.call_tool("one", json!({})),
        session.call_tool("two", json!({}))
    );

    assert_eq!(one.unwrap().ok().unwrap().structured_content, json!("one"));
    assert_eq!(two.unwrap().ok().unwrap().structured_content, json!("two"));
    drop(script.await.unwrap());
}

#[tokio::test]
async fn closing_fails_every_pending_request() {
    let (client_end, mut peer) = Connection::pair();
    let options = ClientOptions {
        request_timeout: None,
        ..ClientOptions::default()
    };
    let session = ClientSession::new(client_end, options);

    let script = tokio::spawn(async move {
        script_initialize(&mut peer, "2025-06-18").await;
        for _ in 0..3 {
            next_request(&mut peer).await;
        }
        drop(peer);
    });

    session.initialize().await.unwrap();
    let (a, b, c, ()) = tokio::join!(
        session.call_tool("a", json!({})),
        session.call_tool("b", json!({})),
        session.read_resource("mcp://hello"),
        async { script.await.unwrap() }
    );

    assert!(matches!(a, Err(SessionError::ConnectionClosed)));
    assert!(matches!(b, Err(SessionError::ConnectionClosed)));
    assert!(matches!(c, Err(SessionError::ConnectionClosed)));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn explicit_close_rejects_further_calls() {
    let session = sample_session().await;
    session.close().await;

    assert_eq!(session.state(), SessionState::Closed);
    assert!(matches!(
        session.list_tools().await,
        Err(SessionError::NotReady {
            state: SessionState::Closed
        })
    ));
}

#[tokio::test]
async fn timeout_cancels_and_discards_late_response() {
    let (client_end, mut peer) = Connection::pair();
    let session = ClientSession::new(client_end, ClientOptions::default());

    let script = tokio::spawn(async move {
        script_initialize(&mut peer, "2025-06-18").await;
        let slow = next_request(&mut peer).await;

        // The client gives up and says so.
        let frame = peer.receive().await.unwrap();
        let Ok(Envelope::Notification(cancelled)) = decode(&frame) else {
            panic!("expected a cancellation notice");
        };
        assert_eq!(cancelled.method, methods::CANCELLED);
        assert_eq!(cancelled.params.unwrap()["requestId"], json!(slow.id));

        // Too late: this response must be discarded.
        peer.send(encode(&Response::success(slow.id, methods::PING, json!({})).into()))
            .await
            .unwrap();

        let next = next_request(&mut peer).await;
        peer.send(encode(&Response::success(next.id, methods::PING, json!({})).into()))
            .await
            .unwrap();
        peer
    });

    session.initialize().await.unwrap();
    let err = session
        .request_with_timeout(methods::PING, None, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Cancelled { id: RequestId::Number(_) }));

    let outcome = session.request(methods::PING, None).await.unwrap();
    assert_eq!(outcome, Outcome::Result(json!({})));
    drop(script.await.unwrap());
}

// =============================================================================
// Negotiation and robustness
// =============================================================================

#[tokio::test]
async fn unsupported_version_closes_session() {
    let (client_end, mut peer) = Connection::pair();
    let session = ClientSession::new(client_end, ClientOptions::default());

    let script = tokio::spawn(async move {
        script_initialize(&mut peer, "1999-01-01").await;
        peer
    });

    let err = session.initialize().await.unwrap_err();
    assert!(matches!(err, SessionError::Negotiation { .. }));
    assert_eq!(session.state(), SessionState::Closed);
    drop(script.await.unwrap());
}

#[tokio::test]
async fn older_supported_version_is_accepted() {
    let server = McpServer::new(sample_registry().unwrap(), ServerOptions::default());
    let (client_end, server_end) = Connection::pair();
    server.spawn_session(server_end);

    let options = ClientOptions {
        protocol_version: "2024-11-05".to_string(),
        ..ClientOptions::default()
    };
    let session = ClientSession::new(client_end, options);
    let info = session.initialize().await.unwrap();
    assert_eq!(info.protocol_version, "2024-11-05");
}

#[tokio::test]
async fn malformed_frames_do_not_close_the_session() {
    let (client_end, mut peer) = Connection::pair();
    let session = ClientSession::new(client_end, ClientOptions::default());

    let script = tokio::spawn(async move {
        script_initialize(&mut peer, "2025-06-18").await;
        let request = next_request(&mut peer).await;

        peer.send(b"{garbage".to_vec()).await.unwrap();
        peer.send(br#"{"kind":"response","method":"ping","result":{}}"#.to_vec())
            .await
            .unwrap();
        peer.send(encode(&Response::success(request.id, methods::PING, json!({})).into()))
            .await
            .unwrap();
        peer
    });

    session.initialize().await.unwrap();
    assert_ok!(session.ping().await);
    assert_eq!(session.state(), SessionState::Ready);
    drop(script.await.unwrap());
}

#[tokio::test]
async fn server_requests_are_answered() {
    let (client_end, mut peer) = Connection::pair();
    let session = ClientSession::new(client_end, ClientOptions::default());

    let script = tokio::spawn(async move {
        script_initialize(&mut peer, "2025-06-18").await;

        for (id, method) in [(100, methods::PING), (101, "sampling/createMessage")] {
            peer.send(encode(&Request::new(RequestId::Number(id), method).into()))
                .await
                .unwrap();
        }

        let mut outcomes = Vec::new();
        while outcomes.len() < 2 {
            let frame = peer.receive().await.unwrap();
            if let Ok(Envelope::Response(response)) = decode(&frame) {
                outcomes.push(response.outcome);
            }
        }
        outcomes
    });

    session.initialize().await.unwrap();
    let outcomes = script.await.unwrap();
    assert_eq!(outcomes[0], Outcome::Result(json!({})));
    assert!(matches!(
        &outcomes[1],
        Outcome::Error(error) if error.code == ErrorCode::MethodNotFound
    ));
}
