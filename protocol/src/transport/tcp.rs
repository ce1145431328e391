//! # TCP & gRPC-Framed Connectors
//!
//! Byte-oriented stream transports. Every envelope is wrapped in the
//! length-prefixed binary frame from [`crate::message::frame`]; the reader
//! feeds raw reads through the incremental decoder, so partial delivery at
//! any byte boundary is handled.
//!
//! A connection opens with a 5-byte preface: the 4 protocol magic bytes
//! plus a channel marker (1 = plain TCP, 2 = gRPC-framed). The gRPC channel
//! runs the identical frame format; the marker exists so a listener can
//! route the two channels to different handlers.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::card::Endpoint;
use crate::config::PROTOCOL_MAGIC;
use crate::error::{A2aError, A2aResult};
use crate::message::frame::{encode_frame, FrameDecoder, FrameType};
use crate::transport::auth::AuthConfig;

use super::{Connector, DialedIo, TransportKind, WireSink, WireStream};

/// Channel marker for plain TCP.
pub const CHANNEL_TCP: u8 = 1;

/// Channel marker for the gRPC-framed channel.
pub const CHANNEL_GRPC: u8 = 2;

/// Read buffer size for the stream reader.
const READ_BUF_SIZE: usize = 8 * 1024;

/// Connector for framed stream endpoints. One instance serves either the
/// plain TCP or the gRPC-framed channel, distinguished by the preface.
#[derive(Debug)]
pub struct StreamConnector {
    kind: TransportKind,
}

impl StreamConnector {
    /// A plain-TCP connector.
    pub fn tcp() -> Self {
        Self {
            kind: TransportKind::Tcp,
        }
    }

    /// A gRPC-framed connector.
    pub fn grpc() -> Self {
        Self {
            kind: TransportKind::Grpc,
        }
    }

    fn channel_marker(&self) -> u8 {
        match self.kind {
            TransportKind::Grpc => CHANNEL_GRPC,
            _ => CHANNEL_TCP,
        }
    }
}

#[async_trait]
impl Connector for StreamConnector {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn dial(&self, endpoint: &Endpoint, _auth: Option<&AuthConfig>) -> A2aResult<DialedIo> {
        if endpoint.secure {
            // Stream TLS needs an acceptor from the embedding process; the
            // config hook exists but the core dials plaintext only.
            return Err(A2aError::TlsFailed(
                "TLS is not available on raw stream transports".into(),
            ));
        }

        let port = endpoint
            .port
            .ok_or_else(|| A2aError::Validation("stream endpoint requires a port".into()))?;
        let addr = format!("{}:{}", endpoint.address, port);

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| A2aError::TransientNetwork(format!("tcp dial {} failed: {}", addr, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| A2aError::TransientNetwork(format!("set_nodelay failed: {}", e)))?;

        let (read_half, mut write_half) = stream.into_split();

        // Preface: magic + channel marker.
        let mut preface = PROTOCOL_MAGIC.to_be_bytes().to_vec();
        preface.push(self.channel_marker());
        write_half
            .write_all(&preface)
            .await
            .map_err(|e| A2aError::TransientNetwork(format!("preface write failed: {}", e)))?;

        debug!(%addr, kind = ?self.kind, "stream connected");
        Ok(DialedIo {
            sink: Box::new(StreamSink { writer: write_half }),
            stream: Box::new(StreamReader {
                reader: read_half,
                decoder: FrameDecoder::new(),
            }),
        })
    }
}

struct StreamSink {
    writer: OwnedWriteHalf,
}

#[async_trait]
impl WireSink for StreamSink {
    async fn write_payload(&mut self, frame_type: FrameType, payload: &[u8]) -> A2aResult<()> {
        let frame = encode_frame(frame_type, payload)?;
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| A2aError::TransientNetwork(format!("stream write failed: {}", e)))
    }

    async fn close(&mut self) -> A2aResult<()> {
        self.writer
            .shutdown()
            .await
            .map_err(|e| A2aError::TransientNetwork(format!("stream shutdown failed: {}", e)))
    }
}

struct StreamReader {
    reader: OwnedReadHalf,
    decoder: FrameDecoder,
}

#[async_trait]
impl WireStream for StreamReader {
    async fn next_payload(&mut self) -> Option<A2aResult<Vec<u8>>> {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => return Some(Ok(frame.payload.to_vec())),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }

            match self.reader.read(&mut buf).await {
                Ok(0) => return None,
                Ok(n) => self.decoder.extend(&buf[..n]),
                Err(e) => {
                    return Some(Err(A2aError::TransientNetwork(format!(
                        "stream read failed: {}",
                        e
                    ))))
                }
            }
        }
    }
}
