//! End-to-end relay flow
//!
//! discover → select → handshake → stream. Each step is also callable on its
//! own; [`Relay::run`] chains them the way the `sender` binary uses them.

use std::sync::Arc;

use crate::audio::AudioSource;
use crate::config::AppConfig;
use crate::error::{AudioError, NetworkError, Result};
use crate::network::discovery::{DiscoveryClient, PeerRecord};
use crate::network::handshake::{ConnectionOutcome, HandshakeClient, ResponseListener};
use crate::network::sender::{SessionConfig, StreamReport, StreamSession};
use crate::network::tls::{self, TlsConfig};
use crate::shutdown::Shutdown;

/// Starts the audio source once the stream connection is up
pub type SourceLauncher =
    Arc<dyn Fn() -> std::result::Result<AudioSource, AudioError> + Send + Sync>;

/// How a relay attempt ended
#[derive(Debug)]
pub enum RelayOutcome {
    /// Discovery found no receivers
    NoPeers,
    /// The receiver declined the connection
    Rejected,
    /// The receiver never answered the connect request
    TimedOut,
    /// A stream ran; see the report for how it ended
    Streamed(StreamReport),
}

pub struct Relay {
    config: AppConfig,
    tls: Option<TlsConfig>,
    discovery: DiscoveryClient,
    launcher: SourceLauncher,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .field("tls", &self.tls)
            .field("discovery", &self.discovery)
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Validate `config` and build the TLS context if enabled.
    ///
    /// The audio source defaults to the encoder process from `[audio]`.
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let tls = if config.tls.enabled {
            Some(tls::from_settings(&config.tls)?)
        } else {
            None
        };

        let audio = config.audio.clone();
        let launcher: SourceLauncher = Arc::new(move || AudioSource::spawn(&audio));
        let discovery =
            DiscoveryClient::new().with_broadcast_address(config.network.broadcast_address);

        Ok(Self {
            config,
            tls,
            discovery,
            launcher,
        })
    }

    /// Replace the audio source (stdin, a file, a test script)
    pub fn with_source<F>(mut self, launch: F) -> Self
    where
        F: Fn() -> std::result::Result<AudioSource, AudioError> + Send + Sync + 'static,
    {
        self.launcher = Arc::new(launch);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    /// Look for receivers on the configured discovery port
    pub async fn discover(&self, shutdown: Shutdown) -> Vec<PeerRecord> {
        let network = &self.config.network;
        self.discovery
            .discover_until(network.discovery_timeout(), network.discovery_port, shutdown)
            .await
    }

    /// Ask `host` for permission to stream and wait for the answer.
    ///
    /// The response listener is bound before the request goes out.
    pub async fn handshake(&self, host: &str, shutdown: Shutdown) -> Result<ConnectionOutcome> {
        let network = &self.config.network;
        let listener = ResponseListener::bind(network.response_port())?;

        tracing::info!("Requesting connection to {}...", host);
        HandshakeClient::new(network.device_name())
            .send_request(host, network.discovery_port)
            .await?;

        Ok(listener.wait(network.handshake_timeout(), shutdown).await?)
    }

    /// Stream to `host:port` until shutdown or failure
    pub async fn stream(&self, host: &str, port: u16, shutdown: Shutdown) -> StreamReport {
        let session = SessionConfig::from_app(&self.config, host, port, self.tls.clone());
        let launcher = self.launcher.clone();
        StreamSession::new(session)
            .run(move || launcher(), shutdown)
            .await
    }

    /// Run the whole flow.
    ///
    /// Without `host`, receivers are discovered and `select` picks one by
    /// index; `None` or an out-of-range index picks the first. With `host`,
    /// the stream goes to the configured stream port.
    ///
    /// A shutdown before streaming starts yields `NetworkError::Interrupted`.
    pub async fn run<S>(
        &self,
        host: Option<&str>,
        select: S,
        shutdown: Shutdown,
    ) -> Result<RelayOutcome>
    where
        S: FnOnce(&[PeerRecord]) -> Option<usize>,
    {
        let (host, port) = match host {
            Some(host) => (host.to_string(), self.config.network.stream_port),
            None => {
                let peers = self.discover(shutdown.clone()).await;
                if shutdown.is_triggered() {
                    return Err(NetworkError::Interrupted.into());
                }
                if peers.is_empty() {
                    tracing::error!("No receivers found. Make sure the receiver app is running.");
                    return Ok(RelayOutcome::NoPeers);
                }

                let peer = match select(peers.as_slice()).and_then(|i| peers.get(i)) {
                    Some(peer) => {
                        tracing::info!("Selected: {}", peer);
                        peer
                    }
                    None => {
                        tracing::info!("Using first device: {}", peers[0]);
                        &peers[0]
                    }
                };
                (peer.address.to_string(), peer.port)
            }
        };

        // Selection may have blocked on the user; do not contact the receiver after a stop
        if shutdown.is_triggered() {
            return Err(NetworkError::Interrupted.into());
        }

        match self.handshake(&host, shutdown.clone()).await? {
            ConnectionOutcome::Accepted => {
                tracing::info!("Connection accepted, starting audio stream...");
                Ok(RelayOutcome::Streamed(self.stream(&host, port, shutdown).await))
            }
            ConnectionOutcome::Rejected => {
                tracing::warn!("Connection rejected by receiver");
                Ok(RelayOutcome::Rejected)
            }
            ConnectionOutcome::TimedOut => {
                tracing::warn!(
                    "Connection timeout. Receiver may not be running or not responding."
                );
                Ok(RelayOutcome::TimedOut)
            }
        }
    }
}

impl RelayOutcome {
    /// The stream report, if a stream ran
    pub fn into_report(self) -> Option<StreamReport> {
        match self {
            RelayOutcome::Streamed(report) => Some(report),
            _ => None,
        }
    }
}
