//! # WebSocket Connector
//!
//! Dials `ws://` / `wss://` endpoints with tokio-tungstenite. Envelopes
//! travel as binary WebSocket messages carrying the raw JSON payload — the
//! WebSocket layer already frames, so the length-prefixed binary format is
//! not applied here. Ping/pong frames are answered by the library and
//! skipped by the reader.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::card::Endpoint;
use crate::error::{A2aError, A2aResult};
use crate::message::frame::FrameType;
use crate::transport::auth::AuthConfig;

use super::{Connector, DialedIo, TransportKind, WireSink, WireStream};

type WsStreamInner = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for WebSocket endpoints.
#[derive(Debug, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Renders the dial URL for an endpoint.
    fn url_for(endpoint: &Endpoint) -> String {
        if endpoint.address.starts_with("ws://") || endpoint.address.starts_with("wss://") {
            return endpoint.address.clone();
        }
        let scheme = if endpoint.secure { "wss" } else { "ws" };
        let port = endpoint.port.unwrap_or(crate::config::DEFAULT_MESH_PORT);
        let path = endpoint.path.as_deref().unwrap_or("/a2a");
        format!("{}://{}:{}{}", scheme, endpoint.address, port, path)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn dial(&self, endpoint: &Endpoint, auth: Option<&AuthConfig>) -> A2aResult<DialedIo> {
        let url = Self::url_for(endpoint);

        let mut request = url
            .clone()
            .into_client_request()
            .map_err(|e| A2aError::Validation(format!("bad websocket url {}: {}", url, e)))?;
        if let Some(header) = auth.and_then(AuthConfig::authorization_header) {
            let value = HeaderValue::from_str(&header)
                .map_err(|e| A2aError::AuthenticationFailed(format!("bad auth header: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = connect_async(request).await.map_err(|e| match e {
            tokio_tungstenite::tungstenite::Error::Tls(e) => A2aError::TlsFailed(e.to_string()),
            tokio_tungstenite::tungstenite::Error::Http(resp)
                if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 =>
            {
                A2aError::AuthenticationFailed(format!("handshake rejected: {}", resp.status()))
            }
            other => A2aError::TransientNetwork(format!("websocket dial failed: {}", other)),
        })?;
        debug!(%url, "websocket connected");

        let (sink, stream) = stream.split();
        Ok(DialedIo {
            sink: Box::new(WsSink { sink }),
            stream: Box::new(WsReader { stream }),
        })
    }
}

struct WsSink {
    sink: SplitSink<WsStreamInner, WsMessage>,
}

#[async_trait]
impl WireSink for WsSink {
    async fn write_payload(&mut self, _frame_type: FrameType, payload: &[u8]) -> A2aResult<()> {
        self.sink
            .send(WsMessage::Binary(payload.to_vec()))
            .await
            .map_err(|e| A2aError::TransientNetwork(format!("websocket write failed: {}", e)))
    }

    async fn close(&mut self) -> A2aResult<()> {
        self.sink
            .send(WsMessage::Close(None))
            .await
            .map_err(|e| A2aError::TransientNetwork(format!("websocket close failed: {}", e)))
    }
}

struct WsReader {
    stream: SplitStream<WsStreamInner>,
}

#[async_trait]
impl WireStream for WsReader {
    async fn next_payload(&mut self) -> Option<A2aResult<Vec<u8>>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Binary(bytes)) => return Some(Ok(bytes)),
                Ok(WsMessage::Text(text)) => return Some(Ok(text.into_bytes())),
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => {
                    continue
                }
                Ok(WsMessage::Close(_)) => return None,
                Err(e) => {
                    return Some(Err(A2aError::TransientNetwork(format!(
                        "websocket read failed: {}",
                        e
                    ))))
                }
            }
        }
    }
}
