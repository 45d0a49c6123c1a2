//! Duplex connection collaborators
//!
//! A `Connector` opens one persistent connection and hands back a pair of
//! channels: everything written to `outgoing` goes out in order, everything
//! the remote side sends (plus close/error lifecycle) arrives on `incoming`.
//! `crate::ws` provides the websocket implementation.

use crate::events::{TransportEvent, WireMessage};
use async_trait::async_trait;
use std::fmt;
use tokio::sync::mpsc;

/// Error type for transport operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Everything needed to open the connection
#[derive(Clone)]
pub struct ConnectRequest {
    pub url: String,
    pub token: String,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// An open duplex connection
#[derive(Debug)]
pub struct Connection {
    pub outgoing: mpsc::UnboundedSender<WireMessage>,
    pub incoming: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, request: ConnectRequest) -> Result<Connection, TransportError>;
}

/// Issues the credential used to open the connection. Called once per connect.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, TransportError>;
}

/// A fixed API key
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, TransportError> {
        if self.0.is_empty() {
            return Err(TransportError::AuthenticationFailed("API key is empty".to_string()));
        }
        Ok(self.0.clone())
    }
}
