// # Rippled WebSocket Transport
//
// This crate provides the `LedgerTransport` implementation for a rippled
// node's public WebSocket API.
//
// ## Scope
//
// The transport only moves frames:
// - Outbound: one JSON request per text frame
// - Inbound: text frames (and UTF-8 binary frames) in arrival order
//
// Request ids, pagination and retries belong to `LedgerClient` and
// `IndexerEngine`. Control frames (ping/pong) are answered by tungstenite
// and never surface. A close frame ends the message stream.
//
// ## Endpoints
//
// - `wss://host:port` for public nodes (TLS with standard certificate checks)
// - `ws://host:port` for a local node
//
// ## Size limits
//
// A full `ledger_data` page is far larger than tungstenite's 16 MiB frame
// default. Frames and messages are both capped at `max_message_bytes`
// (`rippled.max_message_mib` in the configuration).

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt, future};
use ledger_index_core::config::RippledConfig;
use ledger_index_core::traits::{LedgerConnection, LedgerSink, LedgerTransport};
use ledger_index_core::{Error, Result};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound limit when none is configured (1 GiB)
const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024 * 1024;

/// WebSocket transport to a rippled node
#[derive(Debug, Clone)]
pub struct RippledTransport {
    url: Url,
    endpoint: String,
    max_message_bytes: usize,
}

impl RippledTransport {
    /// Create a transport for `endpoint`
    ///
    /// # Returns
    ///
    /// - `Ok(RippledTransport)`: Valid `ws://` or `wss://` URL
    /// - `Err(Error::Config)`: Unparseable URL, other scheme, or no host
    pub fn new(endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| Error::config(format!("invalid ledger endpoint '{}': {}", endpoint, e)))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "ledger endpoint must use ws:// or wss://, got '{}'",
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(Error::config(format!(
                "ledger endpoint '{}' has no host",
                endpoint
            )));
        }

        Ok(Self {
            url,
            endpoint: endpoint.to_string(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        })
    }

    /// Create a transport from the `rippled` configuration section
    pub fn from_config(config: &RippledConfig) -> Result<Self> {
        Ok(Self::new(&config.endpoint())?.with_max_message_bytes(config.max_message_bytes()))
    }

    /// Cap inbound frames and messages at `bytes`
    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    fn socket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_frame_size: Some(self.max_message_bytes),
            max_message_size: Some(self.max_message_bytes),
            ..Default::default()
        }
    }

    /// Whether frames travel over TLS
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

#[async_trait]
impl LedgerTransport for RippledTransport {
    async fn connect(&self) -> Result<LedgerConnection> {
        tracing::debug!("opening WebSocket to {}", self.endpoint);

        let (socket, response) =
            connect_async_with_config(self.url.as_str(), Some(self.socket_config()), false)
                .await
            .map_err(|e| Error::transport(format!("connect to {} failed: {}", self.endpoint, e)))?;

        tracing::info!(
            "connected to {} (HTTP {})",
            self.endpoint,
            response.status()
        );

        let (write, read) = socket.split();
        let messages = read
            .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
            .filter_map(|frame| future::ready(inbound_text(frame)));

        Ok(LedgerConnection {
            sink: Box::new(RippledSink { write }),
            messages: Box::pin(messages),
        })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Write half of the socket
struct RippledSink {
    write: SplitSink<Socket, Message>,
}

#[async_trait]
impl LedgerSink for RippledSink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.write
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::transport(format!("send failed: {}", e)))
    }
}

/// Map one inbound frame to a message, or `None` for frames with no payload
/// for the client.
fn inbound_text(
    frame: std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<String>> {
    match frame {
        Ok(Message::Text(text)) => Some(Ok(text)),
        Ok(Message::Binary(bytes)) => Some(
            String::from_utf8(bytes)
                .map_err(|e| Error::protocol(format!("binary frame is not UTF-8: {}", e))),
        ),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_) | Message::Close(_)) => None,
        Err(e) => Some(Err(Error::transport(format!("receive failed: {}", e)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_test::assert_ok;

    #[test]
    fn test_accepts_ws_and_wss() {
        let plain = RippledTransport::new("ws://localhost:6006").unwrap();
        assert!(!plain.is_secure());
        assert_eq!(plain.endpoint(), "ws://localhost:6006");

        let secure = RippledTransport::new("wss://xrplcluster.com:443").unwrap();
        assert!(secure.is_secure());
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(matches!(
            RippledTransport::new("http://localhost:6006"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            RippledTransport::new("not a url"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_from_config_uses_endpoint() {
        let config = RippledConfig {
            host: "s1.ripple.com".to_string(),
            port: 443,
            secure: true,
            reconnect_delay_ms: None,
            max_message_mib: 64,
        };
        let transport = RippledTransport::from_config(&config).unwrap();
        assert_eq!(transport.endpoint(), "wss://s1.ripple.com:443");
        assert_eq!(transport.max_message_bytes, 64 * 1024 * 1024);

        let config = transport.socket_config();
        assert_eq!(config.max_frame_size, Some(64 * 1024 * 1024));
        assert_eq!(config.max_message_size, Some(64 * 1024 * 1024));
    }

    #[test]
    fn test_inbound_frames() {
        assert_eq!(
            inbound_text(Ok(Message::Text("{}".to_string()))).unwrap().unwrap(),
            "{}"
        );
        assert_eq!(
            inbound_text(Ok(Message::Binary(b"{\"a\":1}".to_vec()))).unwrap().unwrap(),
            "{\"a\":1}"
        );
        assert!(matches!(
            inbound_text(Ok(Message::Binary(vec![0xff, 0xfe]))),
            Some(Err(Error::Protocol(_)))
        ));
        assert!(inbound_text(Ok(Message::Ping(vec![1]))).is_none());
        assert!(inbound_text(Ok(Message::Pong(vec![1]))).is_none());
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = RippledTransport::new(&format!("ws://127.0.0.1:{}", port)).unwrap();
        assert!(matches!(
            transport.connect().await,
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_round_trip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Answers each request with its id, then closes
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            let request = socket.next().await.unwrap().unwrap();
            let request: serde_json::Value =
                serde_json::from_str(request.to_text().unwrap()).unwrap();
            let reply = serde_json::json!({ "id": request["id"], "status": "success" });

            socket.send(Message::Ping(vec![7])).await.unwrap();
            socket.send(Message::Text(reply.to_string())).await.unwrap();
            socket.close(None).await.unwrap();
        });

        let transport = RippledTransport::new(&format!("ws://127.0.0.1:{}", port)).unwrap();
        let LedgerConnection {
            mut sink,
            mut messages,
        } = transport.connect().await.unwrap();

        assert_ok!(
            sink.send(r#"{"id":"closed","command":"ledger","ledger_index":"closed"}"#.to_string())
                .await
        );

        let reply: serde_json::Value =
            serde_json::from_str(&messages.next().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["id"], "closed");

        // Close ends the stream
        assert!(messages.next().await.is_none());
        server.await.unwrap();
    }

    /// Serve one connection that sends a single `bytes`-long text frame
    async fn serve_large_frame(bytes: usize) -> (u16, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            let prefix = r#"{"id":"state:1","pad":""#;
            let mut text = String::with_capacity(bytes);
            text.push_str(prefix);
            text.push_str(&"x".repeat(bytes - prefix.len() - 2));
            text.push_str(r#""}"#);
            // The client may already have hung up on an oversized frame
            let _ = socket.send(Message::Text(text)).await;
            let _ = socket.close(None).await;
        });

        (port, server)
    }

    #[tokio::test]
    async fn test_receives_page_larger_than_library_default() {
        let bytes = 20 * 1024 * 1024;
        let (port, server) = serve_large_frame(bytes).await;

        let transport = RippledTransport::new(&format!("ws://127.0.0.1:{}", port)).unwrap();
        let mut connection = transport.connect().await.unwrap();

        let text = connection.messages.next().await.unwrap().unwrap();
        assert_eq!(text.len(), bytes);
        assert!(text.starts_with(r#"{"id":"state:1""#));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_frame_over_configured_limit_is_transport_error() {
        let (port, server) = serve_large_frame(64 * 1024).await;

        let transport = RippledTransport::new(&format!("ws://127.0.0.1:{}", port))
            .unwrap()
            .with_max_message_bytes(16 * 1024);
        let mut connection = transport.connect().await.unwrap();

        assert!(matches!(
            connection.messages.next().await,
            Some(Err(Error::Transport(_)))
        ));
        server.await.unwrap();
    }
}
