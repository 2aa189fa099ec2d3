//! Defines the public-facing `StdioClient` and its launch configuration.

use super::session::{drain_stderr, drain_stdout, supervise};
use crate::{
    error::{Error, Result},
    protocol,
    queue::PendingQueue,
    types::{
        CallToolParams, CallToolResult, ListToolsParams, ListToolsResult, Notification, Request,
        METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
    },
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Default window for `call` and friends.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time `close()` waits for a cooperative exit before killing.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_millis(500);

/// How to launch the child process.
#[derive(Debug, Clone)]
pub struct StdioConfig {
    /// Program to run (e.g. "npx", "python").
    pub command: String,

    /// Arguments for the program.
    pub args: Vec<String>,

    /// Overrides layered on top of the current process environment.
    pub env: HashMap<String, String>,

    /// Working directory for the child, if not inherited.
    pub working_dir: Option<PathBuf>,

    /// Pause after spawning before `start` returns. Some servers print a
    /// banner and need a moment before they read stdin.
    pub startup_delay: Duration,

    /// How long `close()` waits after closing stdin before killing the child.
    pub close_grace: Duration,
}

impl StdioConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            startup_delay: Duration::ZERO,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// The command line as one string, for logs and error messages.
    pub fn display_command(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// A JSON-RPC client speaking line-delimited JSON to a child process.
///
/// The client owns the child exclusively. A background task drains the
/// child's stdout into a [`PendingQueue`]; callers claim replies from it by id
/// with [`StdioClient::await_response`]. Sends and waits take `&self`, so one
/// client can be shared (e.g. behind an `Arc`) by several tasks.
///
/// # Example
///
/// ```no_run
/// use mcp_stdio_bridge::{handshake, HandshakeConfig, StdioClient, StdioConfig};
///
/// #[tokio::main]
/// async fn main() -> mcp_stdio_bridge::Result<()> {
///     let config = StdioConfig::new("npx")
///         .args(["-y", "server-perplexity-ask"])
///         .env("PERPLEXITY_API_KEY", "YOUR_API_KEY_HERE");
///     let client = StdioClient::start(config).await?;
///
///     let outcome = handshake(&client, &HandshakeConfig::default()).await?;
///     println!("{}", outcome.tools);
///
///     client.close().await;
///     Ok(())
/// }
/// ```
pub struct StdioClient {
    command: String,
    pid: Option<u32>,
    stdin: Mutex<Option<ChildStdin>>,
    queue: Arc<PendingQueue>,
    exited: watch::Receiver<bool>,
    kill_switch: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    close_grace: Duration,
    next_request_id: AtomicI64,
    drain_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    stderr_handle: JoinHandle<()>,
}

impl StdioClient {
    /// Launches the child and starts draining its output.
    ///
    /// The child inherits the current environment with `config.env` laid on
    /// top. Fails with [`Error::Spawn`] if the program cannot be launched.
    pub async fn start(config: StdioConfig) -> Result<Self> {
        let command_str = config.display_command();
        debug!(command = %command_str, "Spawning child process");

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            command: command_str.clone(),
            source,
        })?;

        let missing = |stream: &str| Error::Spawn {
            command: command_str.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("failed to capture child {}", stream),
            ),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        let pid = child.id();

        let queue = Arc::new(PendingQueue::new());
        let (exited_tx, exited_rx) = watch::channel(false);
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(supervise(child, kill_rx, exited_tx));
        let drain_handle = tokio::spawn(drain_stdout(
            BufReader::new(stdout),
            Arc::clone(&queue),
            exited_rx.clone(),
        ));
        let stderr_handle = tokio::spawn(drain_stderr(BufReader::new(stderr)));

        info!(command = %command_str, pid = ?pid, "Child process started");

        if !config.startup_delay.is_zero() {
            tokio::time::sleep(config.startup_delay).await;
        }

        Ok(Self {
            command: command_str,
            pid,
            stdin: Mutex::new(Some(stdin)),
            queue,
            exited: exited_rx,
            kill_switch: std::sync::Mutex::new(Some(kill_tx)),
            close_grace: config.close_grace,
            next_request_id: AtomicI64::new(0),
            drain_handle: std::sync::Mutex::new(Some(drain_handle)),
            stderr_handle,
        })
    }

    /// Serializes `message` to one line and writes it to the child's stdin.
    ///
    /// Returns once the line is flushed; it does not wait for any reply.
    /// Concurrent sends are serialized so lines never interleave.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let line = protocol::encode(message)?;
        let mut stdin = self.stdin.lock().await;
        let writer = stdin.as_mut().ok_or_else(|| {
            Error::Write(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "client is closed",
            ))
        })?;

        if let Err(e) = protocol::write_line(writer, &line).await {
            warn!(error = %e, command = %self.command, "Failed to write to child stdin");
            return Err(Error::Write(e));
        }
        trace!(message = %line, "Sent line to child");
        Ok(())
    }

    /// Waits for the message whose id is `id` and removes it from the queue.
    ///
    /// Other queued messages keep their order. Fails with [`Error::Timeout`]
    /// if nothing matches within `timeout`, in which case nothing is consumed.
    /// The returned value is the raw message, `error` payloads included.
    pub async fn await_response(&self, id: i64, timeout: Duration) -> Result<Value> {
        let response = self.queue.wait_for(id, timeout).await;
        if let Err(Error::Timeout { .. }) = &response {
            debug!(id, ?timeout, unclaimed = self.queue.len(), "Timed out waiting for response");
        }
        response
    }

    /// Allocates a fresh request id. Ids start at 0 and never repeat.
    pub fn next_id(&self) -> i64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Sends a request with a caller-chosen id.
    pub async fn request<P: Serialize>(&self, id: i64, method: &str, params: P) -> Result<()> {
        self.send(&Request::new(id, method, params)).await
    }

    /// Sends a notification (no id, no reply).
    pub async fn notify<P: Serialize>(&self, method: &str, params: Option<P>) -> Result<()> {
        self.send(&Notification::new(method, params)).await
    }

    /// Sends a request with the next id and returns its `result`.
    ///
    /// An `error` payload becomes [`Error::JsonRpc`], unmodified.
    pub async fn call<P, R>(&self, method: &str, params: P, timeout: Duration) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id();
        self.request(id, method, params).await?;
        let response = self.await_response(id, timeout).await?;
        Ok(serde_json::from_value(into_result(response)?)?)
    }

    /// Sends a `tools/list` request.
    pub async fn list_tools(&self) -> Result<ListToolsResult> {
        self.call(
            METHOD_TOOLS_LIST,
            ListToolsParams::default(),
            DEFAULT_RESPONSE_TIMEOUT,
        )
        .await
    }

    /// Sends a `tools/call` request.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.call(METHOD_TOOLS_CALL, params, DEFAULT_RESPONSE_TIMEOUT)
            .await
    }

    /// `true` until the child has been observed to exit.
    pub fn is_running(&self) -> bool {
        !*self.exited.borrow()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Number of decoded messages nobody has claimed yet.
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// A copy of the unclaimed messages, oldest first.
    pub fn pending_snapshot(&self) -> Vec<Value> {
        self.queue.snapshot()
    }

    /// Terminates the child. Best-effort and idempotent; never fails.
    ///
    /// Closing stdin lets a well-behaved child exit on its own. If it has not
    /// exited after the grace period it is killed. Unclaimed replies are
    /// dropped.
    pub async fn close(&self) {
        let had_stdin = self.stdin.lock().await.take().is_some();
        if had_stdin {
            debug!(command = %self.command, "Closed child stdin");
        }

        let mut exited = self.exited.clone();
        if !self.wait_for_exit(&mut exited, self.close_grace).await {
            let kill_switch = self
                .kill_switch
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            if let Some(kill_switch) = kill_switch {
                let _ = kill_switch.send(());
            }
            if !self.wait_for_exit(&mut exited, self.close_grace).await {
                warn!(command = %self.command, pid = ?self.pid, "Child did not exit after kill");
            }
        }

        // The drain loop must be gone before the clear, or a tail line could
        // land in the queue afterwards.
        let drain = self
            .drain_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut drain) = drain {
            if tokio::time::timeout(self.close_grace, &mut drain).await.is_err() {
                drain.abort();
                let _ = drain.await;
            }
        }

        self.stderr_handle.abort();
        let dropped = self.queue.clear();
        if had_stdin {
            info!(command = %self.command, dropped, "Client closed");
        }
    }

    async fn wait_for_exit(&self, exited: &mut watch::Receiver<bool>, within: Duration) -> bool {
        tokio::time::timeout(within, exited.wait_for(|gone| *gone))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

impl Drop for StdioClient {
    /// Stops the background readers. Dropping the kill switch makes the
    /// supervisor kill the child if it is still running.
    fn drop(&mut self) {
        let drain = self
            .drain_handle
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(drain) = drain {
            drain.abort();
        }
        self.stderr_handle.abort();
    }
}

/// Splits a raw response into its `result`, or its `error` as [`Error::JsonRpc`].
pub fn into_result(mut response: Value) -> Result<Value> {
    if let Some(error) = response
        .get_mut("error")
        .filter(|e| !e.is_null())
        .map(Value::take)
    {
        return Err(Error::JsonRpc(serde_json::from_value(error)?));
    }
    match response.get_mut("result").map(Value::take) {
        Some(result) => Ok(result),
        None => Err(Error::Other(format!(
            "response carries neither result nor error: {}",
            response
        ))),
    }
}
