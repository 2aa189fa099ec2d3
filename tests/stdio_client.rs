//! End-to-end tests: `StdioClient` against the `stdio-child` fixture binary.

use mcp_stdio_bridge::{
    handshake, CallToolResult, Content, Error, HandshakeConfig, StdioClient, StdioConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn child(mode: &str) -> StdioConfig {
    StdioConfig::new(env!("CARGO_BIN_EXE_stdio-child"))
        .arg(mode)
        .close_grace(Duration::from_secs(1))
}

async fn start(config: StdioConfig) -> StdioClient {
    init_tracing();
    match StdioClient::start(config).await {
        Ok(client) => client,
        Err(e) => panic!("failed to start fixture: {}", e),
    }
}

/// Polls `cond` until it holds or `WAIT` elapses.
async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn pending_ids(client: &StdioClient) -> Vec<i64> {
    client
        .pending_snapshot()
        .iter()
        .filter_map(|msg| msg["id"].as_i64())
        .collect()
}

#[tokio::test]
async fn echo_reply_is_returned_verbatim() {
    let client = start(child("echo")).await;

    client.request(1, "ping", json!({})).await.unwrap();
    let response = client.await_response(1, WAIT).await.unwrap();

    assert_eq!(response, json!({ "jsonrpc": "2.0", "id": 1, "result": "ok" }));
    assert_eq!(client.pending_len(), 0);
    client.close().await;
}

#[tokio::test]
async fn plain_text_output_is_never_queued() {
    let client = start(child("echo")).await;

    // The child answers the notification with a text line only.
    client
        .notify("notifications/initialized", None::<Value>)
        .await
        .unwrap();
    client.request(2, "ping", json!({})).await.unwrap();
    client.await_response(2, WAIT).await.unwrap();

    assert_eq!(client.pending_len(), 0);
    client.close().await;
}

#[tokio::test]
async fn out_of_order_replies_keep_arrival_order() {
    let client = start(child("reverse")).await;

    client.request(1, "first", json!({})).await.unwrap();
    client.request(3, "second", json!({})).await.unwrap();
    assert!(eventually(|| client.pending_len() == 2).await);
    assert_eq!(pending_ids(&client), vec![3, 1]);

    let response = client.await_response(1, WAIT).await.unwrap();
    assert_eq!(response["result"]["echo"], 1);
    assert_eq!(pending_ids(&client), vec![3]);
    client.close().await;
}

#[tokio::test]
async fn timeout_consumes_nothing() {
    let client = start(child("reverse")).await;

    client.request(1, "held", json!({})).await.unwrap();
    let err = client
        .await_response(1, Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {}", err);

    // The second request releases the batch.
    client.request(2, "release", json!({})).await.unwrap();
    assert!(eventually(|| client.pending_len() == 2).await);

    let err = client
        .await_response(99, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { id: 99, .. }));
    assert_eq!(pending_ids(&client), vec![2, 1]);

    assert_eq!(client.await_response(1, WAIT).await.unwrap()["id"], 1);
    assert_eq!(client.await_response(2, WAIT).await.unwrap()["id"], 2);
    client.close().await;
}

#[tokio::test]
async fn child_exit_surfaces_as_timeout() {
    let client = start(child("exit")).await;

    client.request(1, "anything", json!({})).await.unwrap();
    let err = client
        .await_response(1, Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(eventually(|| !client.is_running()).await);
    client.close().await;
}

#[tokio::test]
async fn handshake_against_tool_server() {
    let client = start(child("server")).await;
    let config = HandshakeConfig {
        protocol_version: "2024-11-03".to_string(),
        settle_interval: Duration::from_millis(50),
        ..Default::default()
    };

    let outcome = handshake(&client, &config).await.unwrap();

    assert_eq!(outcome.initialize["id"], 0);
    assert_eq!(outcome.initialize["result"]["protocolVersion"], "2024-11-03");
    assert_eq!(outcome.tools["id"], 1);
    assert_eq!(outcome.tools_result().unwrap()["tools"][0]["name"], "echo");
    // The initialized notification gets no reply, so nothing is left over.
    assert_eq!(client.pending_len(), 0);
    client.close().await;
}

#[tokio::test]
async fn typed_helpers_against_tool_server() {
    let client = start(child("server")).await;

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.tools.len(), 1);

    let result: CallToolResult = client
        .call_tool("echo", json!({ "text": "over the pipe" }))
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(
        result.content,
        vec![Content::Text {
            text: "over the pipe".to_string()
        }]
    );

    let err = client
        .call::<_, Value>("resources/list", json!({}), WAIT)
        .await
        .unwrap_err();
    match err {
        Error::JsonRpc(data) => assert_eq!(data.code, -32601),
        other => panic!("expected a JSON-RPC error, got {}", other),
    }
    client.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_waiters_get_their_own_replies() {
    let client = Arc::new(start(child("reverse")).await);

    let waiter = |id: i64| {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.await_response(id, WAIT).await })
    };
    let five = waiter(5);
    let seven = waiter(7);
    sleep(Duration::from_millis(50)).await;

    // Arrival order at the client is 7, then 5.
    client.request(5, "five", json!({})).await.unwrap();
    client.request(7, "seven", json!({})).await.unwrap();

    let (five, seven) = tokio::join!(five, seven);
    let five = five.unwrap().unwrap();
    let seven = seven.unwrap().unwrap();
    assert_eq!(five["id"], 5);
    assert_eq!(five["result"]["echo"], 5);
    assert_eq!(seven["id"], 7);
    assert_eq!(seven["result"]["echo"], 7);
    assert_eq!(client.pending_len(), 0);
    client.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_never_interleave_lines() {
    let client = Arc::new(start(child("echo")).await);
    // Far larger than a pipe write, so every line takes several.
    let padding = "x".repeat(16 * 1024);

    let senders: Vec<_> = (0..8i64)
        .map(|task| {
            let client = Arc::clone(&client);
            let padding = padding.clone();
            tokio::spawn(async move {
                for n in 0..13i64 {
                    let id = 1000 + task * 100 + n;
                    client
                        .request(id, "bulk", json!({ "padding": padding }))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.await.unwrap();
    }

    for task in 0..8i64 {
        for n in 0..13i64 {
            let id = 1000 + task * 100 + n;
            let reply = client.await_response(id, WAIT).await.unwrap();
            assert_eq!(reply, json!({ "jsonrpc": "2.0", "id": id, "result": "ok" }));
        }
    }
    assert_eq!(client.pending_len(), 0);
    client.close().await;
}

#[tokio::test]
async fn send_after_close_is_a_write_error() {
    let client = start(child("echo")).await;
    client.close().await;

    let err = client.request(1, "ping", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Write(_)), "unexpected error: {}", err);
    assert!(!client.is_running());

    // Closing twice is harmless.
    client.close().await;
}

#[tokio::test]
async fn close_drops_replies_that_arrive_during_shutdown() {
    let client = start(child("echo")).await;
    for id in 0..50 {
        client.request(id, "ping", json!({})).await.unwrap();
    }

    // Nothing claimed; close while replies are still streaming in.
    client.close().await;
    assert_eq!(client.pending_len(), 0);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(client.pending_len(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn close_kills_a_child_that_ignores_stdin() {
    let client = start(
        StdioConfig::new("sleep")
            .arg("30")
            .close_grace(Duration::from_millis(500)),
    )
    .await;
    assert!(client.is_running());

    client.close().await;
    assert!(!client.is_running());
}

#[tokio::test]
async fn missing_program_is_a_spawn_error() {
    init_tracing();
    let result = StdioClient::start(StdioConfig::new("/nonexistent/stdio-bridge-child")).await;
    match result {
        Err(Error::Spawn { command, .. }) => assert!(command.contains("stdio-bridge-child")),
        Err(other) => panic!("expected a spawn error, got {}", other),
        Ok(_) => panic!("spawning a missing program succeeded"),
    }
}

#[tokio::test]
async fn env_overrides_reach_the_child() {
    let client = start(child("env").env("STDIO_BRIDGE_PROBE", "forty-two")).await;

    let value: Value = client
        .call("lookup", json!({ "name": "STDIO_BRIDGE_PROBE" }), WAIT)
        .await
        .unwrap();
    assert_eq!(value, "forty-two");

    // Everything else is inherited.
    let path: Value = client
        .call("lookup", json!({ "name": "PATH" }), WAIT)
        .await
        .unwrap();
    assert!(path.is_string());
    client.close().await;
}

#[tokio::test]
async fn chatty_stderr_does_not_stall_the_child() {
    let client = start(child("noisy")).await;

    client.request(0, "ping", json!({})).await.unwrap();
    let response = client
        .await_response(0, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(response["result"], "ok");
    client.close().await;
}
