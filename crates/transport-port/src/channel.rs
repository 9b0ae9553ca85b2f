use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{MessagePort, MessageQueue, PortError, PortResult};

/// Frames travelling through an in-process channel. A raw channel does not
/// tell the other side when this side goes away, so closing sends an explicit
/// end-of-stream marker first.
enum Frame<T> {
    Message(T),
    EndOfStream,
}

/// One end of an in-process bidirectional channel.
pub struct ChannelPort<Req, Resp> {
    inbound: Arc<MessageQueue<Resp>>,
    outbound: mpsc::UnboundedSender<Frame<Req>>,
    pump: JoinHandle<()>,
}

/// Creates a connected pair of ports. The first end sends `A` and receives
/// `B`; the second end is the mirror image.
///
/// Delivery is asynchronous (a pump task per end), so this must be called
/// from within a Tokio runtime.
pub fn channel_pair<A, B>() -> (ChannelPort<A, B>, ChannelPort<B, A>)
where
    A: Send + 'static,
    B: Send + 'static,
{
    let (to_second, from_first) = mpsc::unbounded_channel();
    let (to_first, from_second) = mpsc::unbounded_channel();
    (
        ChannelPort::listen(to_second, from_second),
        ChannelPort::listen(to_first, from_first),
    )
}

impl<Req, Resp> ChannelPort<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn listen(
        outbound: mpsc::UnboundedSender<Frame<Req>>,
        frames: mpsc::UnboundedReceiver<Frame<Resp>>,
    ) -> Self {
        let inbound = Arc::new(MessageQueue::new());
        let pump = tokio::spawn(pump_frames(frames, inbound.clone()));
        Self {
            inbound,
            outbound,
            pump,
        }
    }
}

async fn pump_frames<T>(mut frames: mpsc::UnboundedReceiver<Frame<T>>, queue: Arc<MessageQueue<T>>) {
    while let Some(frame) = frames.recv().await {
        match frame {
            Frame::Message(msg) => queue.push(msg),
            Frame::EndOfStream => break,
        }
    }
    queue.close(PortError::closed("channel port closed by peer"));
}

#[async_trait]
impl<Req, Resp> MessagePort<Req, Resp> for ChannelPort<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn is_open(&self) -> bool {
        self.inbound.is_open()
    }

    async fn wait_ready(&self) -> PortResult<()> {
        self.inbound.wait_ready().await
    }

    fn dequeue(&self) -> PortResult<Option<Resp>> {
        self.inbound.dequeue()
    }

    fn clear_latest(&self) -> PortResult<Option<Resp>> {
        self.inbound.clear_latest()
    }

    fn send(&self, msg: Req) -> PortResult<()> {
        if !self.inbound.is_open() {
            return Err(PortError::closed("channel port already closed"));
        }
        self.outbound
            .send(Frame::Message(msg))
            .map_err(|_| PortError::closed("channel peer dropped"))
    }

    fn close(&self) {
        if !self.inbound.is_open() {
            return;
        }
        tracing::debug!("closing channel port");
        let _ = self.outbound.send(Frame::EndOfStream);
        self.inbound
            .close(PortError::closed("channel port already closed"));
        self.pump.abort();
    }
}

impl<Req, Resp> Drop for ChannelPort<Req, Resp> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test_timeout::tokio_timeout_test]
    async fn pair_round_trip() {
        let (left, right) = channel_pair::<String, u32>();

        left.send("ping".to_string()).expect("left send");
        right.send(42).expect("right send");

        right.wait_ready().await.expect("right ready");
        assert_eq!(right.dequeue(), Ok(Some("ping".to_string())));

        left.wait_ready().await.expect("left ready");
        assert_eq!(left.clear_latest(), Ok(Some(42)));
    }

    #[test_timeout::tokio_timeout_test]
    async fn close_notifies_peer() {
        let (left, right) = channel_pair::<&'static str, &'static str>();
        left.send("last words").expect("send");
        left.close();

        assert!(!left.is_open());
        assert!(left.send("too late").is_err());

        // The end-of-stream marker follows the last message and closes the peer.
        let err = loop {
            match right.wait_ready().await {
                Ok(()) => {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                Err(err) => break err,
            }
        };
        assert!(matches!(err, PortError::Closed(_)));
        assert!(!right.is_open());
        assert!(right.dequeue().is_err());
    }

    #[test_timeout::tokio_timeout_test]
    async fn dropping_an_end_closes_the_other() {
        let (left, right) = channel_pair::<(), ()>();
        drop(left);
        assert!(right.wait_ready().await.is_err());
        assert!(right.send(()).is_err());
    }

    #[test_timeout::tokio_timeout_test]
    async fn close_is_idempotent() {
        let (left, _right) = channel_pair::<(), ()>();
        left.close();
        left.close();
        assert!(!left.is_open());
    }
}
