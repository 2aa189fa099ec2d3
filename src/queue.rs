//! The pending-response queue shared between the drain loop and waiters.

use crate::error::{Error, Result};
use crate::protocol::message_id;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// An ordered, unbounded buffer of decoded messages nobody has claimed yet.
///
/// The drain loop is the only producer. Waiters remove the first message
/// carrying their id and leave everything else where it was, so the unclaimed
/// remainder always keeps the order in which it was read from the stream.
#[derive(Debug, Default)]
pub struct PendingQueue {
    messages: Mutex<VecDeque<Value>>,
    arrived: Notify,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Value>> {
        // A panicking waiter can't leave the deque half-modified.
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends a message and wakes every waiter so each can rescan.
    pub fn push(&self, msg: Value) {
        self.lock().push_back(msg);
        self.arrived.notify_waiters();
    }

    /// Removes and returns the first message whose id is `id`.
    pub fn take(&self, id: i64) -> Option<Value> {
        let mut messages = self.lock();
        let pos = messages
            .iter()
            .position(|msg| message_id(msg) == Some(id))?;
        messages.remove(pos)
    }

    /// Waits until a message with `id` is queued, then claims it.
    ///
    /// On timeout nothing is removed from the queue.
    pub async fn wait_for(&self, id: i64, timeout: Duration) -> Result<Value> {
        // `None` when the window is too large to represent: wait without a bound.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            // Register before scanning so a push between the scan and the
            // await still wakes us.
            notified.as_mut().enable();

            if let Some(msg) = self.take(id) {
                return Ok(msg);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.take(id).ok_or(Error::Timeout { id, after: timeout });
                    }
                }
                None => notified.await,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// A copy of the unclaimed messages, oldest first.
    pub fn snapshot(&self) -> Vec<Value> {
        self.lock().iter().cloned().collect()
    }

    /// Drops every unclaimed message. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut messages = self.lock();
        let dropped = messages.len();
        messages.clear();
        dropped
    }
}
