//! Client error types.

use crate::config::ConfigError;
use mts_protocol::ErrorId;
use std::io;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] mts_protocol::ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("server error: {code} - {message}")]
    ServerError { code: ErrorId, message: String },

    #[error("a request is already in flight")]
    RequestInFlight,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("client shut down")]
    Shutdown,
}

impl ClientError {
    pub(crate) fn auth(reason: impl Into<String>) -> Self {
        ClientError::AuthenticationFailed {
            reason: reason.into(),
        }
    }

    /// Returns whether the failed operation may succeed on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::NotConnected => true,
            ClientError::TlsHandshake(_) => true,
            ClientError::ServerError { code, .. } => *code == ErrorId::SystemError,
            _ => false,
        }
    }

    /// Returns whether the error means the stream went away.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            ClientError::ConnectionClosed | ClientError::Timeout | ClientError::NotConnected => true,
            ClientError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }

    /// Returns whether the server rejected the credentials.
    pub fn is_authentication(&self) -> bool {
        match self {
            ClientError::AuthenticationFailed { .. } => true,
            ClientError::ServerError { code, .. } => code.is_authentication(),
            _ => false,
        }
    }

    /// Returns whether the error is a transport-level failure.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::ConnectionClosed
                | ClientError::Timeout
                | ClientError::NotConnected
                | ClientError::TlsHandshake(_)
        )
    }

    /// Returns whether the orchestrator should reconnect after this error.
    ///
    /// Before the first successful login only closed-connection failures are
    /// retried; afterwards any transport or protocol failure is.
    pub fn is_reconnectable(&self, booted: bool) -> bool {
        if self.is_authentication() {
            return false;
        }
        if self.is_connection_closed() {
            return true;
        }
        booted
            && (self.is_transport()
                || matches!(self, ClientError::Protocol(_) | ClientError::Json(_)))
    }
}
