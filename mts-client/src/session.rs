//! Session and lifecycle state owned by one client instance.

use std::fmt;

/// Credentials obtained from the server during login.
///
/// Written only by the orchestrator after a handshake phase completes.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Session {
    client_certificate: Option<Vec<u8>>,
    jwt: Option<String>,
}

impl Session {
    pub fn new(client_certificate: Vec<u8>, jwt: Option<String>) -> Self {
        Self {
            client_certificate: Some(client_certificate),
            jwt: jwt.filter(|t| !t.is_empty()),
        }
    }

    /// Certificate issued by the password login.
    pub fn client_certificate(&self) -> Option<&[u8]> {
        self.client_certificate.as_deref()
    }

    /// Session token issued by the certificate login.
    pub fn jwt(&self) -> Option<&str> {
        self.jwt.as_deref()
    }

    pub fn is_established(&self) -> bool {
        self.client_certificate.is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field(
                "client_certificate",
                &self.client_certificate.as_ref().map(|c| format!("{} bytes", c.len())),
            )
            .field("jwt", &self.jwt.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Lifecycle of a [`Client`](crate::Client).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Constructed, not started.
    Idle,
    /// Running the login handshake.
    Authenticating,
    /// Logged in; payloads may be sent.
    Ready,
    /// Waiting before a reconnect attempt.
    Backoff,
    /// Stopped after a non-recoverable error.
    Failed,
    /// Stopped by shutdown.
    Closed,
}

impl ClientState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ClientState::Failed | ClientState::Closed)
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Idle => write!(f, "idle"),
            ClientState::Authenticating => write!(f, "authenticating"),
            ClientState::Ready => write!(f, "ready"),
            ClientState::Backoff => write!(f, "backoff"),
            ClientState::Failed => write!(f, "failed"),
            ClientState::Closed => write!(f, "closed"),
        }
    }
}
