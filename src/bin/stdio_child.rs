//! A child process for exercising `StdioClient` end to end.
//!
//! ```text
//! stdio-child [echo | server | reverse <n> | mute | exit | noisy | env]
//! ```
//!
//! Every mode except `mute` and `exit` mixes plain text into its stdout, the
//! way real servers print banners and progress next to protocol lines.

use mcp_stdio_bridge::{protocol, CallToolResult, Error, Result, StdioServer, Tool};
use serde_json::{json, Value};
use tokio::io::{stdin, stdout, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};

const NOISE_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "echo".to_string());
    eprintln!("stdio-child: starting in '{}' mode", mode);

    match mode.as_str() {
        "echo" => echo().await,
        "server" => server().await,
        "reverse" => {
            let batch = args.next().and_then(|n| n.parse().ok()).unwrap_or(2);
            reverse(batch).await
        }
        "mute" => mute().await,
        "exit" => exit_after_first_line().await,
        "noisy" => {
            let mut stderr = tokio::io::stderr();
            let line = "x".repeat(1023) + "\n";
            for _ in 0..NOISE_BYTES / line.len() {
                stderr.write_all(line.as_bytes()).await?;
            }
            stderr.flush().await?;
            echo().await
        }
        "env" => env_lookup().await,
        other => Err(Error::Other(format!("unknown mode '{}'", other))),
    }
}

fn input() -> Lines<BufReader<Stdin>> {
    BufReader::new(stdin()).lines()
}

async fn say(out: &mut Stdout, text: &str) -> Result<()> {
    protocol::write_line(out, text).await?;
    Ok(())
}

async fn reply(out: &mut Stdout, id: &Value, result: Value) -> Result<()> {
    let line = protocol::encode(&json!({ "jsonrpc": "2.0", "id": id, "result": result }))?;
    say(out, &line).await
}

/// Answers every message carrying an id with `"result": "ok"`. `quit` ends it.
async fn echo() -> Result<()> {
    let mut out = stdout();
    say(&mut out, "child ready").await?;

    let mut lines = input();
    while let Some(line) = lines.next_line().await? {
        if line.trim() == "quit" {
            say(&mut out, "bye").await?;
            break;
        }
        say(&mut out, &format!("received {} bytes", line.len())).await?;
        let Some(msg) = protocol::decode(&line) else {
            continue;
        };
        if let Some(id) = msg.get("id") {
            reply(&mut out, id, json!("ok")).await?;
        }
    }
    Ok(())
}

/// Collects `batch` requests, then answers them newest first.
async fn reverse(batch: usize) -> Result<()> {
    let mut out = stdout();
    let mut held = Vec::with_capacity(batch);

    let mut lines = input();
    while let Some(line) = lines.next_line().await? {
        let Some(id) = protocol::decode(&line).and_then(|msg| msg.get("id").cloned()) else {
            continue;
        };
        held.push(id);
        if held.len() == batch {
            say(&mut out, "flushing batch").await?;
            while let Some(id) = held.pop() {
                reply(&mut out, &id, json!({ "echo": id })).await?;
            }
        }
    }
    Ok(())
}

/// Reads until end of input and never answers.
async fn mute() -> Result<()> {
    let mut lines = input();
    while lines.next_line().await?.is_some() {}
    Ok(())
}

/// Exits, unanswered, as soon as the first line arrives.
async fn exit_after_first_line() -> Result<()> {
    let mut lines = input();
    let _ = lines.next_line().await?;
    eprintln!("stdio-child: exiting without a reply");
    Ok(())
}

/// Replies with the value of the environment variable named by `params.name`.
async fn env_lookup() -> Result<()> {
    let mut out = stdout();
    let mut lines = input();
    while let Some(line) = lines.next_line().await? {
        let Some(msg) = protocol::decode(&line) else {
            continue;
        };
        let Some(id) = msg.get("id") else {
            continue;
        };
        let value = msg["params"]["name"]
            .as_str()
            .and_then(|name| std::env::var(name).ok());
        reply(&mut out, id, json!(value)).await?;
    }
    Ok(())
}

async fn echo_tool(args: Value) -> Result<CallToolResult> {
    let text = args
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Other("missing 'text' argument".to_string()))?;
    Ok(CallToolResult::text(text))
}

/// A real tool server with a single `echo` tool, behind a plain-text banner.
async fn server() -> Result<()> {
    let mut out = stdout();
    say(&mut out, "stdio-child tool server starting").await?;
    out.flush().await?;

    StdioServer::new("stdio-child", env!("CARGO_PKG_VERSION"))
        .tool(
            Tool {
                name: "echo".to_string(),
                description: Some("Returns `text` unchanged".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }),
                annotations: None,
            },
            echo_tool,
        )
        .serve_stdio()
        .await
}
