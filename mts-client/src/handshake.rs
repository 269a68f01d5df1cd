//! Two-phase login handshake.
//!
//! ```text
//! Idle -> ConnectingPlain -> AwaitingPasswordCert -> ReconnectingSecure
//!      -> AwaitingSessionToken -> Ready
//! ```
//!
//! Any failure moves to `Error`. A run that resumes with a stored
//! certificate starts at `ReconnectingSecure`.

use crate::config::Credentials;
use crate::connection::{ConnectMode, Connection, ConnectionConfig};
use crate::dispatch::{Action, Dispatcher, InboundEvent};
use crate::error::ClientError;
use crate::session::Session;
use mts_protocol::{
    node, Envelope, ErrorPayload, LoginPayload, LoginResponsePayload, NodeId, Route,
    RpcIdAllocator, RpcIdScope,
};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    ConnectingPlain,
    AwaitingPasswordCert,
    ReconnectingSecure,
    AwaitingSessionToken,
    Ready,
    Error,
}

/// A logged-in connection and the session it produced.
pub struct Established {
    pub connection: Connection,
    pub session: Session,
}

/// Runs the login sequence against one server.
pub struct Handshake<'a> {
    config: &'a ConnectionConfig,
    credentials: &'a Credentials,
    ids: &'a RpcIdAllocator,
    id_scope: RpcIdScope,
    src_id: NodeId,
    dst_id: NodeId,
    timeout: Duration,
    events: Option<&'a broadcast::Sender<InboundEvent>>,
    state: HandshakeState,
}

impl<'a> Handshake<'a> {
    pub fn new(
        config: &'a ConnectionConfig,
        credentials: &'a Credentials,
        ids: &'a RpcIdAllocator,
    ) -> Self {
        Self {
            config,
            credentials,
            ids,
            id_scope: RpcIdScope::Engine,
            src_id: node::MTS_RMS_SERVER,
            dst_id: node::MTS_SERVER,
            timeout: config.request_timeout,
            events: None,
            state: HandshakeState::Idle,
        }
    }

    /// Bound on each login exchange.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_nodes(mut self, src_id: NodeId, dst_id: NodeId) -> Self {
        self.src_id = src_id;
        self.dst_id = dst_id;
        self
    }

    pub fn with_id_scope(mut self, scope: RpcIdScope) -> Self {
        self.id_scope = scope;
        self
    }

    /// Where to relay unrelated traffic that arrives mid-handshake.
    pub fn with_events(mut self, events: &'a broadcast::Sender<InboundEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Runs the handshake to completion.
    ///
    /// With `resume_certificate` the password phase is skipped. Errors are
    /// returned as-is and never retried here.
    pub async fn run(
        &mut self,
        resume_certificate: Option<Vec<u8>>,
    ) -> Result<Established, ClientError> {
        self.state = HandshakeState::Idle;
        match self.drive(resume_certificate).await {
            Ok(established) => {
                self.transition(HandshakeState::Ready);
                Ok(established)
            }
            Err(err) => {
                tracing::debug!("Handshake failed in {:?}: {}", self.state, err);
                self.transition(HandshakeState::Error);
                Err(err)
            }
        }
    }

    async fn drive(&mut self, resume: Option<Vec<u8>>) -> Result<Established, ClientError> {
        let certificate = match resume {
            Some(certificate) => {
                tracing::debug!("Resuming session with issued certificate");
                certificate
            }
            None => self.password_phase().await?,
        };
        self.certificate_phase(certificate).await
    }

    async fn password_phase(&mut self) -> Result<Vec<u8>, ClientError> {
        self.transition(HandshakeState::ConnectingPlain);
        let conn = self.open(ConnectMode::NoVerify).await?;

        self.transition(HandshakeState::AwaitingPasswordCert);
        tracing::info!("Logging in as {}", self.credentials.username());
        let result = self.login(&conn, self.credentials.password_login()).await;
        conn.close().await;
        let response = result?;

        let payload: LoginResponsePayload = response
            .decode_data()
            .map_err(|e| ClientError::auth(format!("undecodable login response: {}", e)))?;
        tracing::debug!("Login response: {:?}", payload);
        if payload.client_certificate.is_empty() {
            return Err(ClientError::auth("login response carries no client certificate"));
        }

        tracing::info!(
            "Password login accepted, certificate issued ({} bytes)",
            payload.client_certificate.len()
        );
        Ok(payload.client_certificate)
    }

    async fn certificate_phase(&mut self, certificate: Vec<u8>) -> Result<Established, ClientError> {
        self.transition(HandshakeState::ReconnectingSecure);
        let conn = self
            .open(ConnectMode::ClientCertificate(certificate.clone()))
            .await?;

        self.transition(HandshakeState::AwaitingSessionToken);
        let login = self.credentials.certificate_login(certificate.clone());
        let response = match self.login(&conn, login).await {
            Ok(response) => response,
            Err(err) => {
                conn.close().await;
                return Err(err);
            }
        };

        let jwt = response.jwt().map(str::to_string);
        if jwt.is_none() {
            tracing::warn!("Certificate login accepted without a session token");
        }
        tracing::info!("Certificate login accepted");

        Ok(Established {
            connection: conn,
            session: Session::new(certificate, jwt),
        })
    }

    async fn open(&self, mode: ConnectMode) -> Result<Connection, ClientError> {
        let conn = Connection::new(self.config.clone());
        conn.connect(mode).await?;
        if self.id_scope == RpcIdScope::Connection {
            self.ids.reset();
        }
        Ok(conn)
    }

    /// Sends one login request and waits for its `LoginResponse`.
    ///
    /// Pings and other traffic arriving in between are handled like in
    /// steady state.
    async fn login(&self, conn: &Connection, payload: LoginPayload) -> Result<Envelope, ClientError> {
        payload.validate()?;
        let data = serde_json::to_vec(&payload)?;
        let request = self
            .ids
            .build_request(Route::Login, self.src_id, self.dst_id, data);
        conn.send(&request).await?;
        tracing::debug!(
            "Login sent (rpc_id={}, certificate={})",
            request.rpc_id,
            payload.is_certificate_login()
        );

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let frame = conn.read_frame_timeout(remaining).await?;

            match Dispatcher::dispatch_frame(&frame.payload)? {
                Action::LoginResponse(response) => {
                    if response.is_error {
                        return Err(rejection(&response));
                    }
                    return Ok(response);
                }
                Action::Reply(reply) if reply.rpc_id == request.rpc_id && reply.is_error => {
                    return Err(rejection(&reply));
                }
                Action::Reply(reply) => self.relay(InboundEvent::Reply(reply)),
                Action::Respond(envelope) => conn.send(&envelope).await?,
                Action::Relay(event) => self.relay(event),
            }
        }
    }

    fn relay(&self, event: InboundEvent) {
        tracing::debug!(
            "Relaying route={} during handshake",
            event.envelope().route
        );
        if let Some(events) = self.events {
            let _ = events.send(event);
        }
    }

    fn transition(&mut self, next: HandshakeState) {
        tracing::debug!("Handshake {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

fn rejection(envelope: &Envelope) -> ClientError {
    match envelope.decode_data::<ErrorPayload>() {
        Ok(error) => ClientError::auth(error.to_string()),
        Err(_) => ClientError::auth(format!("server rejected login (route {})", envelope.route)),
    }
}
