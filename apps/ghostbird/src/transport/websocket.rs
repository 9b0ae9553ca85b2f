use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, trace, warn};
use transport_port::{MessagePort, MessageQueue, PortError, PortResult};
use url::Url;

const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

enum Outbound {
    Text(String),
    Close,
}

/// Text-frame [`MessagePort`] over a WebSocket.
///
/// Closing sends a native close frame; a close frame, a transport error or
/// the end of the stream from the server closes the receive queue.
pub struct WebSocketPort {
    inbound: Arc<MessageQueue<String>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    ws_task: JoinHandle<()>,
}

impl WebSocketPort {
    pub async fn connect(url: &Url) -> Result<Self, tokio_tungstenite::tungstenite::Error> {
        debug!(%url, "opening websocket");
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(Self::listen(stream))
    }

    /// Wraps an already established stream.
    pub fn listen<S>(stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let inbound = Arc::new(MessageQueue::new());
        let (outbound, rx_out) = mpsc::unbounded_channel();
        let ws_task = tokio::spawn(handle_websocket(
            stream,
            outbound.clone(),
            rx_out,
            inbound.clone(),
        ));
        Self {
            inbound,
            outbound,
            ws_task,
        }
    }
}

async fn handle_websocket<S>(
    stream: WebSocketStream<S>,
    tx_out: mpsc::UnboundedSender<Outbound>,
    mut rx_out: mpsc::UnboundedReceiver<Outbound>,
    inbound: Arc<MessageQueue<String>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_sender, mut ws_receiver) = stream.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx_out.recv().await {
            match outbound {
                Outbound::Text(text) => {
                    trace!(frame = %text, "websocket frame sent");
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => break,
            }
        }
        let _ = ws_sender.close().await;
    });

    let reason = loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                trace!(frame = %text, "websocket frame received");
                inbound.push(text);
            }
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                Ok(text) => inbound.push(text),
                Err(_) => warn!("dropping non-utf8 binary websocket frame"),
            },
            Some(Ok(Message::Close(frame))) => break PortError::closed(describe_close(frame)),
            Some(Ok(_)) => {}
            Some(Err(err)) => break PortError::Transport(err.to_string()),
            None => break PortError::closed("websocket stream ended"),
        }
    };
    debug!(reason = %reason, "websocket closed");
    inbound.close(reason);

    // Closing the sink flushes the reply to a close frame from the server.
    let _ = tx_out.send(Outbound::Close);
    drop(tx_out);
    if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut send_task)
        .await
        .is_err()
    {
        debug!("websocket close did not flush in time");
        send_task.abort();
    }
}

fn describe_close(frame: Option<CloseFrame<'_>>) -> String {
    match frame {
        Some(frame) if frame.reason.is_empty() => {
            format!("closed by server ({})", u16::from(frame.code))
        }
        Some(frame) => format!("closed by server ({}: {})", u16::from(frame.code), frame.reason),
        None => "closed by server".to_string(),
    }
}

#[async_trait]
impl MessagePort<String, String> for WebSocketPort {
    fn is_open(&self) -> bool {
        self.inbound.is_open()
    }

    async fn wait_ready(&self) -> PortResult<()> {
        self.inbound.wait_ready().await
    }

    fn dequeue(&self) -> PortResult<Option<String>> {
        self.inbound.dequeue()
    }

    fn clear_latest(&self) -> PortResult<Option<String>> {
        self.inbound.clear_latest()
    }

    fn send(&self, msg: String) -> PortResult<()> {
        if !self.inbound.is_open() {
            return Err(PortError::closed("websocket already closed"));
        }
        self.outbound
            .send(Outbound::Text(msg))
            .map_err(|_| PortError::closed("websocket task ended"))
    }

    fn close(&self) {
        if !self.inbound.is_open() {
            return;
        }
        debug!("closing websocket");
        let _ = self.outbound.send(Outbound::Close);
        self.inbound.close(PortError::closed("websocket already closed"));
    }
}

impl Drop for WebSocketPort {
    fn drop(&mut self) {
        // The send task outlives this and closes the socket once the
        // outbound channel is gone.
        self.ws_task.abort();
    }
}
