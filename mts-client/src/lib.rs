//! # mts-client
//!
//! Client engine for the MTS protocol.
//!
//! This crate provides:
//! - Two-phase login (password, then issued client certificate)
//! - Automatic ping responses and inbound routing
//! - One-way OPL sends and single in-flight request/reply correlation
//! - Reconnection with backoff and session resumption

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod session;
pub mod signal;
pub mod stream;
pub mod tls;

pub use client::{Client, ClientSignals};
pub use config::{ClientConfig, ConfigError, Credentials};
pub use connection::{ConnectMode, Connection, ConnectionConfig};
pub use dispatch::{Action, Dispatcher, InboundEvent};
pub use error::ClientError;
pub use handshake::{Established, Handshake, HandshakeState};
pub use session::{ClientState, Session};
