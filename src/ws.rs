//! WebSocket transport
//!
//! Opens the agent websocket with tokio-tungstenite, splits it and runs one
//! reader and one writer task that bridge the socket to the `Connection`
//! channels.

use crate::events::{TransportEvent, WireMessage};
use crate::transport::{ConnectRequest, Connection, Connector, TransportError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, trace};

/// Connector for the hosted voice agent endpoint
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        // Another part of the process may already have installed a provider
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, request: ConnectRequest) -> Result<Connection, TransportError> {
        let mut ws_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectionFailed(format!("Invalid URL {}: {}", request.url, e)))?;
        let auth = HeaderValue::from_str(&format!("Token {}", request.token))
            .map_err(|_| TransportError::AuthenticationFailed("API key is not a valid header value".to_string()))?;
        ws_request.headers_mut().insert(AUTHORIZATION, auth);

        info!("Connecting to voice agent at {}", request.url);
        let (ws_stream, resp) = tokio::time::timeout(self.connect_timeout, connect_async(ws_request))
            .await
            .map_err(|_| {
                TransportError::ConnectionFailed(format!("Timed out after {:?}", self.connect_timeout))
            })?
            .map_err(map_connect_error)?;
        debug!("WebSocket connection response: {:?}", resp.status());

        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Writer: drains the outgoing channel in order
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let frame = match msg {
                    WireMessage::Text(text) => Message::Text(text.into()),
                    WireMessage::Binary(bytes) => Message::Binary(bytes.into()),
                    WireMessage::Close => break,
                };
                if let Err(e) = sink.send(frame).await {
                    error!("WebSocket send failed: {}", e);
                    return;
                }
            }
            if let Err(e) = sink.close().await {
                debug!("WebSocket close: {}", e);
            }
            debug!("WebSocket writer finished");
        });

        // Reader: forwards payloads and exactly one terminal event
        tokio::spawn(async move {
            let terminal = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        trace!("📥 {}", text);
                        if in_tx.send(TransportEvent::Text(text.to_string())).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if in_tx.send(TransportEvent::Binary(bytes.to_vec())).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("WebSocket closed: {:?}", frame);
                        break match frame {
                            Some(frame) => TransportEvent::Closed {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.to_string(),
                            },
                            None => TransportEvent::Closed {
                                code: None,
                                reason: String::new(),
                            },
                        };
                    }
                    // Ping/pong are answered by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(WsError::ConnectionClosed)) | None => {
                        break TransportEvent::Closed {
                            code: None,
                            reason: "connection dropped".to_string(),
                        };
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break TransportEvent::Error(e.to_string());
                    }
                }
            };
            let _ = in_tx.send(terminal);
            debug!("WebSocket reader finished");
        });

        info!("✅ Connected to voice agent");
        Ok(Connection {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

fn map_connect_error(e: WsError) -> TransportError {
    match e {
        WsError::Http(resp) if matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
            TransportError::AuthenticationFailed(format!("Server rejected credentials ({})", resp.status()))
        }
        WsError::Http(resp) => TransportError::ConnectionFailed(format!("HTTP {}", resp.status())),
        other => TransportError::WebSocket(other.to_string()),
    }
}
