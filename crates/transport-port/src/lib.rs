//! Buffered full-duplex message ports.
//!
//! Every transport used by a sync session (in-process channels, the compose
//! surface connection, the GhostText WebSocket) is wrapped around a
//! [`MessageQueue`] so callers see the same contract: wait until something is
//! ready, then read it either in order ([`MessagePort::dequeue`]) or coalesced
//! ([`MessagePort::clear_latest`]).

mod channel;
mod queue;

use async_trait::async_trait;
use thiserror::Error;

pub use channel::{ChannelPort, channel_pair};
pub use queue::MessageQueue;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("port closed: {0}")]
    Closed(String),
    #[error("port transport error: {0}")]
    Transport(String),
}

impl PortError {
    pub fn closed(reason: impl Into<String>) -> Self {
        PortError::Closed(reason.into())
    }
}

pub type PortResult<T> = Result<T, PortError>;

/// A full-duplex buffered message channel.
///
/// `Req` is what this end sends, `Resp` is what it receives. Once a port is
/// closed (locally, by the peer, or by a transport error) it never becomes
/// ready again, reads fail with the close reason, and sends fail.
#[async_trait]
pub trait MessagePort<Req, Resp>: Send + Sync
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn is_open(&self) -> bool;

    /// Resolves when a message is available, fails once the port is closed.
    async fn wait_ready(&self) -> PortResult<()>;

    /// Removes the earliest received message.
    fn dequeue(&self) -> PortResult<Option<Resp>>;

    /// Drops everything buffered and returns the newest message.
    fn clear_latest(&self) -> PortResult<Option<Resp>>;

    fn send(&self, msg: Req) -> PortResult<()>;

    /// Closes the port and notifies the remote end.
    fn close(&self);
}
