//! Byte stream under a [`Connection`](crate::Connection): TLS towards a real
//! MTS server, plain TCP for local emulators.

use pin_project_lite::pin_project;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

pin_project! {
    #[project = MtsStreamProj]
    pub enum MtsStream {
        Plain { #[pin] tcp: TcpStream },
        Secure { #[pin] tls: TlsStream<TcpStream> },
    }
}

impl MtsStream {
    pub fn is_secure(&self) -> bool {
        matches!(self, MtsStream::Secure { .. })
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            MtsStream::Plain { tcp } => tcp,
            MtsStream::Secure { tls } => tls.get_ref().0,
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }
}

impl From<TcpStream> for MtsStream {
    fn from(tcp: TcpStream) -> Self {
        MtsStream::Plain { tcp }
    }
}

impl From<TlsStream<TcpStream>> for MtsStream {
    fn from(tls: TlsStream<TcpStream>) -> Self {
        MtsStream::Secure { tls }
    }
}

impl AsyncRead for MtsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            MtsStreamProj::Plain { tcp } => tcp.poll_read(cx, buf),
            MtsStreamProj::Secure { tls } => tls.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MtsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            MtsStreamProj::Plain { tcp } => tcp.poll_write(cx, buf),
            MtsStreamProj::Secure { tls } => tls.poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            MtsStreamProj::Plain { tcp } => tcp.poll_write_vectored(cx, bufs),
            MtsStreamProj::Secure { tls } => tls.poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            MtsStream::Plain { tcp } => tcp.is_write_vectored(),
            MtsStream::Secure { tls } => tls.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MtsStreamProj::Plain { tcp } => tcp.poll_flush(cx),
            MtsStreamProj::Secure { tls } => tls.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MtsStreamProj::Plain { tcp } => tcp.poll_shutdown(cx),
            MtsStreamProj::Secure { tls } => tls.poll_shutdown(cx),
        }
    }
}
