//! Scripted plain-TCP MTS server for integration tests.

#![allow(dead_code)]

use bytes::BytesMut;
use mts_client::config::ReconnectConfig;
use mts_client::{ClientConfig, Credentials};
use mts_protocol::{
    AppId, Decoder, Encoder, Envelope, ErrorId, LoginPayload, LoginResponsePayload, Route,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const ISSUED_CERT: &[u8] = b"-----ISSUED CERT-----";
pub const SESSION_JWT: &str = "eyJhbGciOiJIUzI1NiJ9.session";

/// Upper bound on any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

pub struct FakeServer {
    listener: TcpListener,
    pub port: u16,
}

impl FakeServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    pub async fn accept(&self) -> Peer {
        let (stream, _) = tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("client did not connect")
            .unwrap();
        Peer {
            stream,
            decoder: Decoder::new(),
        }
    }

    /// Serves both login phases and returns the logged-in connection.
    pub async fn accept_session(&self) -> Peer {
        let mut plain = self.accept().await;
        plain.serve_password_login().await;
        let mut secure = self.accept().await;
        secure.serve_certificate_login().await;
        secure
    }
}

/// One accepted client connection.
pub struct Peer {
    stream: TcpStream,
    decoder: Decoder,
}

impl Peer {
    /// Next envelope, or None once the client closed the connection.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            if let Some(envelope) = self.decoder.decode_envelope().unwrap() {
                return Some(envelope);
            }
            let mut buf = BytesMut::with_capacity(4096);
            let n = tokio::time::timeout(WAIT, self.stream.read_buf(&mut buf))
                .await
                .expect("client went silent")
                .ok()?;
            if n == 0 {
                return None;
            }
            self.decoder.extend_bytes(buf.freeze());
        }
    }

    pub async fn expect(&mut self, route: Route) -> Envelope {
        let envelope = self.recv().await.expect("connection closed");
        assert_eq!(envelope.route, route, "unexpected envelope {:?}", envelope);
        envelope
    }

    pub async fn send(&mut self, envelope: &Envelope) {
        let bytes = Encoder::encode_envelope(envelope).unwrap();
        self.stream.write_all(&bytes).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Answers a password login with [`ISSUED_CERT`].
    pub async fn serve_password_login(&mut self) -> Envelope {
        let request = self.expect(Route::Login).await;
        let login: LoginPayload = request.decode_data().unwrap();
        assert!(!login.is_certificate_login());

        let body = LoginResponsePayload {
            client_certificate: ISSUED_CERT.to_vec(),
            ..Default::default()
        };
        let response = request.response(Route::LoginResponse, serde_json::to_vec(&body).unwrap());
        self.send(&response).await;
        request
    }

    /// Answers a certificate login with [`SESSION_JWT`].
    pub async fn serve_certificate_login(&mut self) -> Envelope {
        let request = self.expect(Route::Login).await;
        let login: LoginPayload = request.decode_data().unwrap();
        assert_eq!(login.client_certificate.as_deref(), Some(ISSUED_CERT));

        let response = request
            .response(Route::LoginResponse, b"{}".to_vec())
            .with_jwt(SESSION_JWT);
        self.send(&response).await;
        request
    }

    /// Rejects the next login.
    pub async fn reject_login(&mut self, code: ErrorId, message: &str) -> Envelope {
        let request = self.expect(Route::Login).await;
        let response = request
            .error_response(code, message, Route::LoginResponse)
            .unwrap();
        self.send(&response).await;
        request
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("rms", "secret", AppId::RmsServer, vec![7; 32])
}

pub fn config(port: u16) -> ClientConfig {
    ClientConfig::default()
        .with_server("127.0.0.1", port)
        .with_tls_enabled(false)
        .with_request_timeout(Duration::from_secs(2))
        .with_reconnect(ReconnectConfig {
            initial_delay_ms: 10,
            max_delay_ms: 50,
            ..ReconnectConfig::default()
        })
}
