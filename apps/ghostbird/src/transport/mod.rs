//! GhostText transports: the HTTP handshake and the WebSocket session.

mod connector;
mod web_client;
mod websocket;

pub use connector::{ClientSession, WebSocketConnector, web_socket_url};
pub use web_client::{ReqwestWebClient, WebClient};
pub use websocket::WebSocketPort;
