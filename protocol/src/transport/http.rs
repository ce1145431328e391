//! # HTTP Connector
//!
//! Request/response transport over HTTP/1.1 (and HTTP/2 where the server
//! negotiates it): each A2A envelope is POSTed as a JSON body, and the
//! response body — when non-empty — flows back through the connection's
//! read side. Notifications expect `204 No Content` or an empty body.
//!
//! HTTP has no live socket to own, so the "connection" is a reqwest client
//! plus a channel: the sink performs the POST and forwards the reply into
//! the channel the reader yields from. This keeps the owner-loop model
//! uniform across transports.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tokio::sync::mpsc;
use tracing::debug;

use crate::card::Endpoint;
use crate::error::{A2aError, A2aResult};
use crate::message::frame::FrameType;
use crate::transport::auth::AuthConfig;

use super::{Connector, DialedIo, TransportKind, WireSink, WireStream};

/// Connector for HTTP endpoints.
#[derive(Debug)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl HttpConnector {
    /// Renders the POST URL for an endpoint.
    fn url_for(endpoint: &Endpoint) -> String {
        if endpoint.address.starts_with("http://") || endpoint.address.starts_with("https://") {
            return endpoint.address.clone();
        }
        let scheme = if endpoint.secure { "https" } else { "http" };
        let port = endpoint.port.unwrap_or(crate::config::DEFAULT_RPC_PORT);
        let path = endpoint.path.as_deref().unwrap_or("/a2a");
        format!("{}://{}:{}{}", scheme, endpoint.address, port, path)
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn dial(&self, endpoint: &Endpoint, auth: Option<&AuthConfig>) -> A2aResult<DialedIo> {
        let url = Self::url_for(endpoint);
        let auth_header = match auth.and_then(AuthConfig::authorization_header) {
            Some(header) => Some(
                HeaderValue::from_str(&header)
                    .map_err(|e| A2aError::AuthenticationFailed(format!("bad auth header: {}", e)))?,
            ),
            None => None,
        };

        debug!(%url, "http endpoint bound");
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        Ok(DialedIo {
            sink: Box::new(HttpSink {
                client: self.client.clone(),
                url,
                auth_header,
                reply_tx,
            }),
            stream: Box::new(HttpReader { reply_rx }),
        })
    }
}

struct HttpSink {
    client: reqwest::Client,
    url: String,
    auth_header: Option<HeaderValue>,
    reply_tx: mpsc::UnboundedSender<A2aResult<Vec<u8>>>,
}

#[async_trait]
impl WireSink for HttpSink {
    async fn write_payload(&mut self, _frame_type: FrameType, payload: &[u8]) -> A2aResult<()> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec());
        if let Some(auth) = &self.auth_header {
            request = request.header(AUTHORIZATION, auth.clone());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                A2aError::Timeout {
                    elapsed_ms: 0,
                    timeout_ms: 0,
                }
            } else {
                A2aError::TransientNetwork(format!("http request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(A2aError::AuthenticationFailed(format!(
                "server rejected credentials: {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(A2aError::TransientNetwork(format!(
                "http status {}",
                status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| A2aError::TransientNetwork(format!("http body read failed: {}", e)))?;
        if !body.is_empty() {
            // Reader side is gone only during teardown; the reply is moot then.
            let _ = self.reply_tx.send(Ok(body.to_vec()));
        }
        Ok(())
    }

    async fn close(&mut self) -> A2aResult<()> {
        Ok(())
    }
}

struct HttpReader {
    reply_rx: mpsc::UnboundedReceiver<A2aResult<Vec<u8>>>,
}

#[async_trait]
impl WireStream for HttpReader {
    async fn next_payload(&mut self) -> Option<A2aResult<Vec<u8>>> {
        self.reply_rx.recv().await
    }
}
