//! High-level client: owns the session, runs the login handshake, keeps one
//! reader task per connection and reconnects with backoff.

use crate::config::{ClientConfig, Credentials};
use crate::connection::{Connection, ConnectionConfig};
use crate::dispatch::{Action, Dispatcher, InboundEvent};
use crate::error::ClientError;
use crate::handshake::{Established, Handshake};
use crate::session::{ClientState, Session};
use crate::signal::{ErrorReporter, OnceSignal, ERROR_CHANNEL_CAPACITY};
use mts_protocol::{Envelope, ErrorId, ErrorPayload, OplPayload, Route, RpcIdAllocator};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

/// Capacity of the inbound event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Receivers handed to the caller at construction.
pub struct ClientSignals {
    /// Fires once: `true` on the first successful login, `false` if the
    /// client stops before that.
    pub boot: oneshot::Receiver<bool>,
    /// Errors surfaced by the engine. Bounded; the engine never waits on it.
    pub errors: mpsc::Receiver<ClientError>,
}

/// MTS client.
///
/// Cloning is cheap; all clones drive the same engine.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct PendingRequest {
    rpc_id: i32,
    tx: oneshot::Sender<Envelope>,
}

struct Inner {
    id: Uuid,
    config: ClientConfig,
    connection_config: ConnectionConfig,
    credentials: Credentials,
    ids: RpcIdAllocator,
    /// Live connection while Ready.
    connection: Mutex<Option<Arc<Connection>>>,
    /// Written only by the orchestrator task.
    session: watch::Sender<Session>,
    /// Written only by the orchestrator task (and `shutdown` before start).
    state: watch::Sender<ClientState>,
    events: broadcast::Sender<InboundEvent>,
    /// The single in-flight correlated request.
    pending: Mutex<Option<PendingRequest>>,
    /// Woken when a request times out and the connection must be dropped.
    invalidated: Notify,
    shutdown: watch::Sender<bool>,
    boot: OnceSignal<bool>,
    errors: ErrorReporter,
    started: AtomicBool,
}

impl Client {
    /// Creates a client. Nothing happens until [`start`](Self::start).
    pub fn new(config: ClientConfig, credentials: Credentials) -> (Self, ClientSignals) {
        let (boot, boot_rx) = OnceSignal::channel();
        let (errors, errors_rx) = ErrorReporter::channel(ERROR_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (session, _) = watch::channel(Session::default());
        let (state, _) = watch::channel(ClientState::Idle);
        let (shutdown, _) = watch::channel(false);

        let inner = Inner {
            id: Uuid::new_v4(),
            connection_config: config.connection_config(),
            config,
            credentials,
            ids: RpcIdAllocator::new(),
            connection: Mutex::new(None),
            session,
            state,
            events,
            pending: Mutex::new(None),
            invalidated: Notify::new(),
            shutdown,
            boot,
            errors,
            started: AtomicBool::new(false),
        };

        let signals = ClientSignals {
            boot: boot_rx,
            errors: errors_rx,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            signals,
        )
    }

    /// Creates a client from configuration, resolving credentials from it.
    pub fn from_config(config: ClientConfig) -> Result<(Self, ClientSignals), ClientError> {
        let credentials = config.credentials.resolve()?;
        Ok(Self::new(config, credentials))
    }

    /// Spawns the orchestrator task. Can be called once.
    pub fn start(&self) -> Result<JoinHandle<()>, ClientError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::InvalidState("client already started".to_string()));
        }

        let span = tracing::info_span!(
            "mts_client",
            id = %self.inner.id,
            host = %self.inner.connection_config.host
        );
        Ok(tokio::spawn(self.inner.clone().run().instrument(span)))
    }

    /// Instance id, as shown in log spans.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.inner.state.subscribe()
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Session {
        self.inner.session.borrow().clone()
    }

    /// Subscribes to OPL messages, uncorrelated replies and server errors.
    pub fn subscribe_events(&self) -> broadcast::Receiver<InboundEvent> {
        self.inner.events.subscribe()
    }

    /// Waits until the client is logged in and payloads may be sent.
    pub async fn ready(&self) -> Result<(), ClientError> {
        let mut rx = self.inner.state.subscribe();
        loop {
            match *rx.borrow_and_update() {
                ClientState::Ready => return Ok(()),
                ClientState::Failed => {
                    return Err(ClientError::InvalidState("client failed".to_string()))
                }
                ClientState::Closed => return Err(ClientError::Shutdown),
                _ => {}
            }
            rx.changed().await.map_err(|_| ClientError::Shutdown)?;
        }
    }

    /// Sends an OPL message. One-way: `rpcId` is always 0 and no reply is
    /// awaited.
    pub async fn send_opl(&self, payload: &OplPayload) -> Result<(), ClientError> {
        let connection = self.inner.active_connection()?;
        let data = serde_json::to_vec(payload)?;
        let envelope = self.inner.build_request(Route::Opl, data);
        connection.send(&envelope).await
    }

    /// Sends a request and waits for the reply with the same `rpcId`.
    ///
    /// Only one request may be in flight. A timeout drops the connection and
    /// the client reconnects.
    pub async fn request(&self, route: Route, data: Vec<u8>) -> Result<Envelope, ClientError> {
        if route == Route::Opl {
            return Err(ClientError::InvalidState(
                "OPL is one-way, use send_opl".to_string(),
            ));
        }
        let connection = self.inner.active_connection()?;

        let (tx, rx) = oneshot::channel();
        let envelope = {
            let mut slot = self.inner.pending.lock();
            if slot.is_some() {
                return Err(ClientError::RequestInFlight);
            }
            let envelope = self.inner.build_request(route, data);
            *slot = Some(PendingRequest {
                rpc_id: envelope.rpc_id,
                tx,
            });
            envelope
        };
        let rpc_id = envelope.rpc_id;

        if let Err(err) = connection.send(&envelope).await {
            self.inner.clear_pending(rpc_id);
            return Err(err);
        }

        match tokio::time::timeout(self.inner.connection_config.request_timeout, rx).await {
            Ok(Ok(reply)) if reply.is_error => Err(server_error(&reply)),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.inner.clear_pending(rpc_id);
                tracing::warn!("Request rpc_id={} timed out, dropping connection", rpc_id);
                self.inner.invalidated.notify_waiters();
                Err(ClientError::Timeout)
            }
        }
    }

    /// Stops the client and closes the connection. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutdown.send_replace(true) {
            return;
        }
        tracing::info!("Shutdown requested");
        if !self.inner.started.load(Ordering::SeqCst) {
            self.inner.set_state(ClientState::Closed);
            self.inner.boot.fire(false);
        }
    }
}

fn server_error(reply: &Envelope) -> ClientError {
    match reply.decode_data::<ErrorPayload>() {
        Ok(error) => ClientError::ServerError {
            code: error.code,
            message: error.message,
        },
        Err(e) => ClientError::ServerError {
            code: ErrorId::Unknown(0),
            message: format!("undecodable error payload: {}", e),
        },
    }
}

/// Aborts the reader task when the connection it serves is dropped.
struct ReaderTask(JoinHandle<ClientError>);

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut booted = false;
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            self.set_state(ClientState::Authenticating);

            let established = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                result = self.establish() => result,
            };

            let error = match established {
                Ok(Established {
                    connection,
                    session,
                }) => {
                    attempt = 0;
                    let connection = Arc::new(connection);
                    self.session.send_replace(session);
                    *self.connection.lock() = Some(connection.clone());
                    self.set_state(ClientState::Ready);
                    if self.boot.fire(true) {
                        tracing::info!("Boot complete");
                    }
                    booted = true;

                    let outcome = tokio::select! {
                        biased;
                        _ = shutdown.changed() => None,
                        err = self.serve(connection.clone()) => Some(err),
                    };

                    self.connection.lock().take();
                    self.fail_pending();
                    connection.close().await;
                    match outcome {
                        Some(err) => err,
                        None => break,
                    }
                }
                Err(err) => err,
            };

            let next_attempt = attempt.saturating_add(1);
            let reconnect =
                error.is_reconnectable(booted) && self.config.reconnect.allows(next_attempt);
            if reconnect {
                tracing::warn!("Connection lost: {} (reconnect attempt {})", error, next_attempt);
            } else {
                tracing::error!("Stopping: {}", error);
            }
            self.errors.report(error);

            if !reconnect {
                self.set_state(ClientState::Failed);
                self.boot.fire(false);
                return;
            }

            attempt = next_attempt;
            let delay = self.config.reconnect.delay_for_attempt(attempt);
            self.set_state(ClientState::Backoff);
            tracing::debug!("Reconnecting in {:?}", delay);
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let connection = self.connection.lock().take();
        if let Some(connection) = connection {
            connection.close().await;
        }
        self.fail_pending();
        self.set_state(ClientState::Closed);
        self.boot.fire(false);
        tracing::info!("Client closed");
    }

    /// Logs in, resuming with the stored certificate when there is one.
    async fn establish(&self) -> Result<Established, ClientError> {
        let resume = self
            .session
            .borrow()
            .client_certificate()
            .map(<[u8]>::to_vec);

        let mut handshake = Handshake::new(&self.connection_config, &self.credentials, &self.ids)
            .with_nodes(self.config.nodes.src_id, self.config.nodes.dst_id)
            .with_id_scope(self.config.rpc.id_scope)
            .with_events(&self.events);

        match resume {
            Some(certificate) => match handshake.run(Some(certificate)).await {
                Err(err) if err.is_authentication() => {
                    tracing::warn!("Certificate login rejected ({}), logging in again", err);
                    self.session.send_replace(Session::default());
                    handshake.run(None).await
                }
                other => other,
            },
            None => handshake.run(None).await,
        }
    }

    /// Runs the reader task for `connection` until it fails or a request
    /// timeout invalidates the connection.
    async fn serve(self: &Arc<Self>, connection: Arc<Connection>) -> ClientError {
        let mut reader = ReaderTask(tokio::spawn(
            self.clone()
                .read_loop(connection)
                .instrument(tracing::Span::current()),
        ));

        tokio::select! {
            joined = &mut reader.0 => joined.unwrap_or_else(|e| {
                ClientError::InvalidState(format!("reader task ended: {}", e))
            }),
            _ = self.invalidated.notified() => ClientError::Timeout,
        }
    }

    async fn read_loop(self: Arc<Self>, connection: Arc<Connection>) -> ClientError {
        tracing::debug!("Reader started");
        loop {
            let frame = match connection.read_frame().await {
                Ok(frame) => frame,
                Err(err) => return err,
            };

            let action = match Dispatcher::dispatch_frame(&frame.payload) {
                Ok(action) => action,
                Err(err) => {
                    tracing::warn!("Undecodable frame, dropping connection: {}", err);
                    return err.into();
                }
            };

            match action {
                Action::Respond(envelope) => {
                    if let Err(err) = connection.send(&envelope).await {
                        return err;
                    }
                }
                Action::Relay(event) => self.publish(event),
                Action::Reply(envelope) => self.complete_pending(envelope),
                Action::LoginResponse(envelope) => {
                    tracing::warn!(
                        "LoginResponse outside the handshake (rpc_id={})",
                        envelope.rpc_id
                    );
                    self.publish(InboundEvent::UnexpectedLoginResponse(envelope));
                }
            }
        }
    }

    fn complete_pending(&self, reply: Envelope) {
        let pending = {
            let mut slot = self.pending.lock();
            match slot.as_ref() {
                Some(p) if p.rpc_id == reply.rpc_id => slot.take(),
                _ => None,
            }
        };

        match pending {
            Some(pending) => {
                if let Err(reply) = pending.tx.send(reply) {
                    tracing::debug!("Caller stopped waiting for rpc_id={}", reply.rpc_id);
                }
            }
            None if reply.is_error => self.publish(InboundEvent::ServerError(reply)),
            None => {
                tracing::debug!("Uncorrelated reply rpc_id={}", reply.rpc_id);
                self.publish(InboundEvent::Reply(reply));
            }
        }
    }

    fn clear_pending(&self, rpc_id: i32) {
        let mut slot = self.pending.lock();
        if slot.as_ref().map(|p| p.rpc_id) == Some(rpc_id) {
            slot.take();
        }
    }

    /// Drops the in-flight request; its caller sees `ConnectionClosed`.
    fn fail_pending(&self) {
        self.pending.lock().take();
    }

    fn publish(&self, event: InboundEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn build_request(&self, route: Route, data: Vec<u8>) -> Envelope {
        let envelope =
            self.ids
                .build_request(route, self.config.nodes.src_id, self.config.nodes.dst_id, data);
        match self.session.borrow().jwt() {
            Some(jwt) => envelope.with_jwt(jwt),
            None => envelope,
        }
    }

    fn active_connection(&self) -> Result<Arc<Connection>, ClientError> {
        if *self.state.borrow() != ClientState::Ready {
            return Err(ClientError::NotConnected);
        }
        self.connection
            .lock()
            .clone()
            .filter(|c| c.is_connected())
            .ok_or(ClientError::NotConnected)
    }

    fn set_state(&self, state: ClientState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("State {} -> {}", previous, state);
        }
    }
}
