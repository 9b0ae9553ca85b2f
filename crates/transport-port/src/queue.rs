use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{PortError, PortResult};

/// Receive buffer with "became ready" signalling and a terminal closed state.
///
/// Closing takes priority over draining: once [`MessageQueue::close`] has been
/// called, reads fail with the close reason even if messages are still
/// buffered.
pub struct MessageQueue<T> {
    state: Mutex<QueueState<T>>,
    ready: Notify,
}

struct QueueState<T> {
    messages: VecDeque<T>,
    closed: Option<PortError>,
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                messages: VecDeque::new(),
                closed: None,
            }),
            ready: Notify::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().closed.is_none()
    }

    /// Appends a received message and wakes every pending waiter.
    pub fn push(&self, msg: T) {
        {
            let mut state = self.state.lock();
            if state.closed.is_some() {
                tracing::trace!("dropping message received after close");
                return;
            }
            state.messages.push_back(msg);
        }
        self.ready.notify_waiters();
    }

    /// Marks the queue closed and fails every pending waiter with `reason`.
    /// The first reason wins.
    pub fn close(&self, reason: PortError) {
        {
            let mut state = self.state.lock();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(reason);
        }
        self.ready.notify_waiters();
    }

    /// Resolves immediately if a message is buffered, fails immediately if
    /// closed, and otherwise waits for the next push or close.
    ///
    /// A push wakes all waiters, so a waiter may find the queue already
    /// drained by someone else by the time it reads.
    pub async fn wait_ready(&self) -> PortResult<()> {
        let notified = self.ready.notified();
        tokio::pin!(notified);
        // Register before inspecting the state so a push in between is not lost.
        notified.as_mut().enable();
        {
            let state = self.state.lock();
            if let Some(reason) = &state.closed {
                return Err(reason.clone());
            }
            if !state.messages.is_empty() {
                return Ok(());
            }
        }
        notified.await;
        self.check_open()
    }

    pub fn dequeue(&self) -> PortResult<Option<T>> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.closed {
            return Err(reason.clone());
        }
        Ok(state.messages.pop_front())
    }

    /// Coalescing read: discards every buffered message but the newest.
    pub fn clear_latest(&self) -> PortResult<Option<T>> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.closed {
            return Err(reason.clone());
        }
        let latest = state.messages.pop_back();
        state.messages.clear();
        Ok(latest)
    }

    fn check_open(&self) -> PortResult<()> {
        match &self.state.lock().closed {
            Some(reason) => Err(reason.clone()),
            None => Ok(()),
        }
    }
}
