//! TCP stream transport, optionally wrapped in TLS
//!
//! The audio stream is raw PCM with no framing, so the transport only needs
//! to guarantee that every byte handed to [`Connection::send`] is written in
//! order. Nagle's algorithm is disabled to keep small chunks moving.

use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::TransportError;
use crate::network::tls::{server_name, TlsConfig};

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// An established stream connection
pub struct Connection {
    stream: Option<Stream>,
    peer: SocketAddr,
    encrypted: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("encrypted", &self.encrypted)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection {
    /// Connect to `host:port`, performing the TLS handshake if `tls` is given.
    ///
    /// `host` is also the identity expected in the receiver's certificate.
    pub async fn connect(
        host: &str,
        port: u16,
        tls: Option<&TlsConfig>,
    ) -> Result<Self, TransportError> {
        let target = format!("{}:{}", host, port);
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|source| TransportError::Connect {
                target: target.clone(),
                source,
            })?;

        tcp.set_nodelay(true)
            .map_err(|source| TransportError::Connect {
                target: target.clone(),
                source,
            })?;

        let peer = tcp.peer_addr().map_err(|source| TransportError::Connect {
            target: target.clone(),
            source,
        })?;

        let stream = match tls {
            Some(config) => {
                let name = server_name(host)
                    .map_err(|e| TransportError::InvalidServerName(e.to_string()))?;
                let connector = TlsConnector::from(config.client_config());
                let tls_stream = connector
                    .connect(name, tcp)
                    .await
                    .map_err(TransportError::TlsHandshake)?;
                Stream::Tls(Box::new(tls_stream))
            }
            None => Stream::Plain(tcp),
        };

        tracing::debug!("Connected to {} (TLS: {})", peer, tls.is_some());

        Ok(Self {
            stream: Some(stream),
            peer,
            encrypted: tls.is_some(),
        })
    }

    /// Write all of `data`; partial writes are retried until done or failed
    pub async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        match self.stream.as_mut() {
            Some(Stream::Plain(tcp)) => tcp.write_all(data).await.map_err(TransportError::Send),
            Some(Stream::Tls(tls)) => {
                tls.write_all(data).await.map_err(TransportError::Send)?;
                // Push the TLS record out instead of waiting for more data
                tls.flush().await.map_err(TransportError::Send)
            }
            None => Err(TransportError::Closed),
        }
    }

    /// Shut down the write side and release the socket.
    ///
    /// Safe to call any number of times; shutdown errors are only logged.
    pub async fn close(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };

        let result = match stream {
            Stream::Plain(mut tcp) => tcp.shutdown().await,
            Stream::Tls(mut tls) => tls.shutdown().await,
        };
        if let Err(e) = result {
            tracing::debug!("Shutdown of {} failed: {}", self.peer, e);
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether TCP_NODELAY is set on the underlying socket
    pub fn nodelay(&self) -> Option<bool> {
        match self.stream.as_ref()? {
            Stream::Plain(tcp) => tcp.nodelay().ok(),
            Stream::Tls(tls) => tls.get_ref().0.nodelay().ok(),
        }
    }
}
