//! Error types for the audio relay

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Audio source error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// UDP discovery and handshake errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Interrupted")]
    Interrupted,
}

/// TLS context construction errors
#[derive(Error, Debug)]
pub enum TlsError {
    #[error("Failed to load certificate: {0}")]
    Certificate(String),

    #[error("Failed to load private key: {0}")]
    PrivateKey(String),

    #[error("Failed to load trust store: {0}")]
    TrustStore(String),

    #[error("Protocol configuration rejected: {0}")]
    Protocol(String),

    #[error("Invalid verification posture: {0}")]
    InvalidPosture(&'static str),
}

/// Stream transport errors (TCP / TLS)
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(std::io::Error),

    #[error("Invalid server name: {0}")]
    InvalidServerName(String),

    #[error("Send failed: {0}")]
    Send(std::io::Error),

    #[error("Send timed out after {0} ms")]
    Timeout(u64),

    #[error("Connection closed")]
    Closed,
}

/// Audio source subprocess errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to start audio source '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Audio source has no output stream")]
    NoOutput,

    #[error("Read failed: {0}")]
    Read(std::io::Error),

    #[error("Audio source exited ({0})")]
    Exited(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
