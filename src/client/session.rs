//! Background tasks that live for as long as a `StdioClient` owns its child:
//! the stdout drain loop, the stderr drain and the process supervisor.

use crate::{protocol, queue::PendingQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::process::Child;
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace, warn};

/// How long the drain loop keeps reading already-buffered output once the
/// child is known to have exited. Bounds each read, not the whole tail.
pub(crate) const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Reads the child's stdout line by line and publishes every JSON line to
/// `queue`. Non-JSON lines are dropped.
///
/// Returns on end-of-stream, on a read error, or once `exited` reports the
/// child gone. Every read races the exit signal, so a child that exits while
/// something else still holds its stdout open cannot park this loop forever.
pub(crate) async fn drain_stdout<R>(
    mut reader: R,
    queue: Arc<PendingQueue>,
    mut exited: watch::Receiver<bool>,
) where
    R: AsyncBufRead + Unpin,
{
    // read_until appends partial data to `buf` if the select drops it, so the
    // buffer has to outlive each iteration.
    let mut buf = Vec::new();
    loop {
        if *exited.borrow() {
            drain_tail(&mut reader, &mut buf, &queue).await;
            break;
        }

        tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => {
                    accept_line(&buf, &queue);
                    debug!("Child stdout reached end-of-stream");
                    break;
                }
                Ok(_) => {
                    accept_line(&buf, &queue);
                    buf.clear();
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read child stdout");
                    break;
                }
            },
            changed = exited.changed() => {
                if changed.is_err() {
                    // Supervisor is gone; treat that as exit.
                    drain_tail(&mut reader, &mut buf, &queue).await;
                    break;
                }
            }
        }
    }
    debug!(unclaimed = queue.len(), "Drain loop finished");
}

/// Picks up whatever the child wrote before exiting, one bounded read at a time.
async fn drain_tail<R>(reader: &mut R, buf: &mut Vec<u8>, queue: &PendingQueue)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match tokio::time::timeout(EXIT_DRAIN_GRACE, reader.read_until(b'\n', buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => {
                accept_line(buf, queue);
                buf.clear();
                return;
            }
            Ok(Ok(_)) => {
                accept_line(buf, queue);
                buf.clear();
            }
        }
    }
}

fn accept_line(raw: &[u8], queue: &PendingQueue) {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    if line.is_empty() {
        return;
    }
    trace!(line = %line, "Received line from child");
    if let Some(msg) = protocol::decode(line) {
        queue.push(msg);
    }
}

/// Consumes the child's stderr so it never blocks on a full pipe. Lines are
/// logged, not surfaced.
pub(crate) async fn drain_stderr<R>(reader: R)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "mcp_stdio_bridge::stderr", "{}", line),
            Ok(None) => break,
            Err(e) => {
                // Non UTF-8 output; keep consuming as raw bytes.
                trace!(error = %e, "Undecodable stderr line");
                let mut sink = lines.into_inner();
                let mut buf = Vec::new();
                while let Ok(n) = sink.read_until(b'\n', &mut buf).await {
                    if n == 0 {
                        break;
                    }
                    buf.clear();
                }
                break;
            }
        }
    }
}

/// Owns the `Child`: waits for it to exit, or kills it when asked (or when the
/// client goes away and drops the kill switch). Publishes the exit on `exited`.
pub(crate) async fn supervise(
    mut child: Child,
    kill_switch: oneshot::Receiver<()>,
    exited: watch::Sender<bool>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_switch => {
            debug!(pid = ?child.id(), "Killing child process");
            if let Err(e) = child.start_kill() {
                warn!(error = %e, "Failed to signal child process");
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => debug!(exit_code = ?status.code(), "Child process exited"),
        Err(e) => warn!(error = %e, "Failed to wait for child process"),
    }
    let _ = exited.send(true);
}
