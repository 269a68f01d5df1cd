//! A single transport connection to the MTS server.

use crate::config::TlsConfig;
use crate::error::ClientError;
use crate::stream::MtsStream;
use crate::tls::{create_client_cert_connector, create_insecure_connector};
use mts_protocol::{Decoder, Encoder, Envelope, Frame};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// How the TLS layer is set up for a connection.
#[derive(Clone)]
pub enum ConnectMode {
    /// Skip server verification. Used for the password login only.
    NoVerify,
    /// Present the certificate issued by the password login.
    ClientCertificate(Vec<u8>),
}

impl fmt::Debug for ConnectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectMode::NoVerify => write!(f, "NoVerify"),
            ConnectMode::ClientCertificate(cert) => {
                write!(f, "ClientCertificate({} bytes)", cert.len())
            }
        }
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Bound on awaiting one response.
    pub request_timeout: Duration,
    /// Read chunk size; independent of frame boundaries.
    pub read_buffer_size: usize,
    pub tls: TlsConfig,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            tls: TlsConfig::default(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A connection to the MTS server.
///
/// All writes go through one mutex-guarded send path so frames are never
/// interleaved. Reads are expected from one task at a time.
pub struct Connection {
    config: ConnectionConfig,
    /// Write half of the stream.
    writer: Mutex<Option<WriteHalf<MtsStream>>>,
    /// Read half of the stream.
    reader: Mutex<Option<ReadHalf<MtsStream>>>,
    /// Accumulates inbound bytes until a full frame is buffered.
    decoder: Mutex<Decoder>,
    connected: AtomicBool,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let decoder = Decoder::with_capacity(config.read_buffer_size);
        Self {
            config,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            decoder: Mutex::new(decoder),
            connected: AtomicBool::new(false),
        }
    }

    /// Opens the transport in the given mode.
    ///
    /// Failures are returned to the caller; no retry happens here.
    pub async fn connect(&self, mode: ConnectMode) -> Result<(), ClientError> {
        let endpoint = self.config.endpoint();
        tracing::debug!("Connecting to {} ({:?})...", endpoint, mode);

        let tcp_stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(endpoint.as_str()),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection failed: {}", e);
            ClientError::Io(e)
        })?;

        tcp_stream.set_nodelay(true).ok();

        let stream = if self.config.tls.enabled {
            let (connector, server_name) = match mode {
                ConnectMode::NoVerify => {
                    tracing::debug!("Server certificate verification disabled for password login");
                    create_insecure_connector(&self.config.tls, &self.config.host)?
                }
                ConnectMode::ClientCertificate(ref cert) => {
                    create_client_cert_connector(&self.config.tls, &self.config.host, cert)?
                }
            };

            tracing::debug!("Performing TLS handshake...");
            let tls_stream = tokio::time::timeout(
                self.config.connect_timeout,
                connector.connect(server_name, tcp_stream),
            )
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;

            tracing::debug!("TLS handshake complete");
            MtsStream::from(tls_stream)
        } else {
            MtsStream::from(tcp_stream)
        };

        if let Ok(peer) = stream.peer_addr() {
            tracing::debug!("Connected to {} (tls={})", peer, stream.is_secure());
        }

        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(read_half);
        self.decoder.lock().await.clear();
        self.connected.store(true, Ordering::SeqCst);

        Ok(())
    }

    /// Encodes and writes one envelope.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let encoded = Encoder::encode_envelope(envelope)?;
        {
            let mut writer_guard = self.writer.lock().await;
            let writer = writer_guard.as_mut().ok_or(ClientError::NotConnected)?;
            writer.write_all(&encoded).await?;
            writer.flush().await?;
        }
        tracing::debug!(
            "Sent route={} rpc_id={} reply={} ({} bytes)",
            envelope.route,
            envelope.rpc_id,
            envelope.reply,
            encoded.len()
        );
        Ok(())
    }

    /// Reads until one complete frame is buffered and returns it.
    pub async fn read_frame(&self) -> Result<Frame, ClientError> {
        let mut reader_guard = self.reader.lock().await;
        let mut buf = vec![0u8; self.config.read_buffer_size];

        loop {
            if let Some(frame) = self.decoder.lock().await.decode_frame()? {
                tracing::debug!("Decoded frame ({} bytes)", frame.payload.len());
                return Ok(frame);
            }

            let reader = reader_guard.as_mut().ok_or(ClientError::NotConnected)?;
            let n = reader.read(&mut buf).await?;

            if n == 0 {
                tracing::debug!("Connection closed (0 bytes)");
                self.connected.store(false, Ordering::SeqCst);
                return Err(ClientError::ConnectionClosed);
            }

            self.decoder.lock().await.extend(&buf[..n]);
        }
    }

    /// Like [`read_frame`](Self::read_frame) but bounded by `timeout`.
    ///
    /// A timeout leaves the stream in an unknown state, so the connection is
    /// closed before `Timeout` is returned.
    pub async fn read_frame_timeout(&self, timeout: Duration) -> Result<Frame, ClientError> {
        match tokio::time::timeout(timeout, self.read_frame()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!("Read timeout after {:?}", timeout);
                self.close().await;
                Err(ClientError::Timeout)
            }
        }
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Closes the connection. Safe to call more than once.
    pub async fn close(&self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);

        if let Some(mut writer) = self.writer.lock().await.take() {
            tracing::debug!("Shutting down writer");
            let _ = writer.shutdown().await;
        }

        // A reader task may be parked in read_frame holding the lock; it sees
        // EOF or gets aborted by its owner.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        if let Ok(mut decoder) = self.decoder.try_lock() {
            decoder.clear();
        }

        if was_connected {
            tracing::debug!("Connection to {} closed", self.config.endpoint());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mts_protocol::Route;
    use tokio::net::TcpListener;

    fn plain_config(port: u16) -> ConnectionConfig {
        let mut tls = TlsConfig::default();
        tls.enabled = false;
        ConnectionConfig::new("127.0.0.1", port).with_tls(tls)
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new("127.0.0.1", 10001);
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.tls.enabled);
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config = ConnectionConfig::new("127.0.0.1", 10001).with_read_buffer_size(100);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config =
            ConnectionConfig::new("127.0.0.1", 10001).with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_connect_mode_debug_hides_certificate() {
        let mode = ConnectMode::ClientCertificate(b"SECRET-CERT".to_vec());
        assert_eq!(format!("{:?}", mode), "ClientCertificate(11 bytes)");
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let conn = Connection::new(plain_config(1));
        let env = Envelope::request(Route::RmsPing, 1, 2, 1, vec![]);
        assert!(matches!(conn.send(&env).await, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_plain_roundtrip_and_split_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let env = Envelope::request(Route::RmsPing, 1, 2, 5, vec![]).with_jwt("T1");
            let bytes = Encoder::encode_envelope(&env).unwrap();
            // Dribble the frame out in small pieces.
            for chunk in bytes.chunks(3) {
                socket.write_all(chunk).await.unwrap();
                socket.flush().await.unwrap();
                tokio::task::yield_now().await;
            }

            let mut decoder = Decoder::new();
            let mut buf = [0u8; 256];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                decoder.extend(&buf[..n]);
                if let Some(env) = decoder.decode_envelope().unwrap() {
                    return env;
                }
            }
        });

        let conn = Connection::new(plain_config(port));
        conn.connect(ConnectMode::NoVerify).await.unwrap();
        assert!(conn.is_connected());

        let frame = conn.read_frame_timeout(Duration::from_secs(5)).await.unwrap();
        let ping: Envelope = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(ping.rpc_id, 5);

        conn.send(&ping.response(Route::RmsPingResponse, vec![0; 4]))
            .await
            .unwrap();
        let echoed = server.await.unwrap();
        assert_eq!(echoed.route, Route::RmsPingResponse);
        assert!(echoed.reply);

        conn.close().await;
        conn.close().await;
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_read_timeout_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let conn = Connection::new(plain_config(port));
        conn.connect(ConnectMode::NoVerify).await.unwrap();
        let result = conn.read_frame_timeout(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ClientError::Timeout)));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_peer_close_is_connection_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let conn = Connection::new(plain_config(port));
        conn.connect(ConnectMode::NoVerify).await.unwrap();
        let result = conn.read_frame().await;
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let conn = Connection::new(plain_config(port));
        let err = conn.connect(ConnectMode::NoVerify).await.unwrap_err();
        assert!(err.is_connection_closed());
    }
}
