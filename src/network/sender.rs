//! Audio stream sender
//!
//! A [`StreamSession`] owns one transport connection and one audio source for
//! the lifetime of a stream:
//!
//! ```text
//! Idle ──> Connecting ──> Streaming ──> Draining ──> Closed
//!              │                                       ▲
//!              └───────────── connect / spawn failed ──┘
//! ```
//!
//! While streaming, a read that yields no data is replaced by a chunk of
//! silence so the receiver keeps getting a continuous byte cadence. Any read
//! or send failure, a stopped source process, or a shutdown request ends the
//! stream; a short tail of silence is sent before the connection is closed.

use bytes::Bytes;
use std::time::{Duration, Instant};

use crate::audio::{self, AudioSource};
use crate::config::AppConfig;
use crate::constants::DRAIN_SILENCE_BYTES;
use crate::error::{AudioError, Error, TransportError};
use crate::network::tls::TlsConfig;
use crate::network::transport::Connection;
use crate::shutdown::Shutdown;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
    Draining,
    Closed,
}

/// Parameters of one streaming session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Receiver host; also the expected TLS identity
    pub peer_host: String,

    /// Receiver TCP port
    pub peer_port: u16,

    /// TLS settings, `None` for plain TCP
    pub tls: Option<TlsConfig>,

    /// Read and silence chunk size in bytes
    pub buffer_size: usize,

    /// Treat a read stalled this long as an empty read
    pub idle_read_timeout: Option<Duration>,

    /// Pause after a silence chunk
    pub silence_pause: Duration,

    /// Upper bound for a single send
    pub send_timeout: Duration,

    /// Log progress every time this many bytes have been streamed
    pub progress_interval: u64,
}

impl SessionConfig {
    pub fn new(peer_host: impl Into<String>, peer_port: u16) -> Self {
        Self::from_app(&AppConfig::default(), peer_host, peer_port, None)
    }

    /// Take stream parameters from the `[stream]` section
    pub fn from_app(
        config: &AppConfig,
        peer_host: impl Into<String>,
        peer_port: u16,
        tls: Option<TlsConfig>,
    ) -> Self {
        let stream = &config.stream;
        Self {
            peer_host: peer_host.into(),
            peer_port,
            tls,
            buffer_size: stream.buffer_size,
            idle_read_timeout: stream.idle_read_timeout_ms.map(Duration::from_millis),
            silence_pause: Duration::from_millis(stream.silence_pause_ms),
            send_timeout: Duration::from_millis(stream.send_timeout_ms),
            progress_interval: stream.progress_interval_bytes,
        }
    }
}

/// What happened during a session
#[derive(Debug)]
pub struct StreamReport {
    /// Audio bytes forwarded from the source
    pub bytes_sent: u64,

    /// Zero bytes sent for idle reads and the final drain
    pub silence_bytes: u64,

    /// Reads that produced no data
    pub idle_reads: u64,

    /// The session was stopped by a shutdown request
    pub interrupted: bool,

    /// Error that ended the session, if any
    pub error: Option<Error>,

    pub elapsed: Duration,

    /// Always [`StreamState::Closed`] once `run` returns
    pub state: StreamState,
}

impl StreamReport {
    fn new() -> Self {
        Self {
            bytes_sent: 0,
            silence_bytes: 0,
            idle_reads: 0,
            interrupted: false,
            error: None,
            elapsed: Duration::ZERO,
            state: StreamState::Idle,
        }
    }

    pub fn megabytes_sent(&self) -> f64 {
        self.bytes_sent as f64 / (1024.0 * 1024.0)
    }

    /// Ended by the user rather than by a failure
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }

    /// Playback time of the audio actually forwarded
    pub fn audio_duration(&self) -> Duration {
        audio::duration_of(self.bytes_sent)
    }
}

/// Why the streaming loop stopped
enum Stop {
    Interrupted,
    Failed(Error),
}

/// One connection, one audio source, one pass through the state machine
#[derive(Debug)]
pub struct StreamSession {
    config: SessionConfig,
    state: StreamState,
    report: StreamReport,
    silence: Bytes,
}

impl StreamSession {
    pub fn new(config: SessionConfig) -> Self {
        let silence = audio::silence(config.buffer_size);
        Self {
            config,
            state: StreamState::Idle,
            report: StreamReport::new(),
            silence,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Connect, start the source with `launch`, stream until stopped, then
    /// drain and release everything.
    ///
    /// Never fails: the outcome, including any error, is in the report.
    pub async fn run<F>(mut self, launch: F, mut shutdown: Shutdown) -> StreamReport
    where
        F: FnOnce() -> Result<AudioSource, AudioError>,
    {
        let started = Instant::now();
        self.transition(StreamState::Connecting);

        let host = self.config.peer_host.clone();
        let tls = self.config.tls.clone();
        let connected = tokio::select! {
            biased;
            _ = shutdown.triggered() => None,
            result = Connection::connect(&host, self.config.peer_port, tls.as_ref()) => {
                Some(result)
            }
        };

        let mut connection = match connected {
            Some(Ok(connection)) => connection,
            Some(Err(e)) => {
                tracing::error!("Failed to connect: {}", e);
                self.report.error = Some(e.into());
                return self.finish(None, None, started).await;
            }
            None => {
                self.report.interrupted = true;
                return self.finish(None, None, started).await;
            }
        };

        let mut source = match launch() {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("Failed to start audio source: {}", e);
                self.report.error = Some(e.into());
                return self.finish(Some(connection), None, started).await;
            }
        };

        tracing::info!(
            "Streaming audio to {} (TLS: {})",
            connection.peer_addr(),
            connection.is_encrypted()
        );
        self.transition(StreamState::Streaming);

        match self.stream(&mut connection, &mut source, &mut shutdown).await {
            Stop::Interrupted => self.report.interrupted = true,
            Stop::Failed(e) => {
                tracing::error!("Streaming error: {}", e);
                self.report.error = Some(e);
            }
        }

        self.drain(&mut connection).await;
        self.finish(Some(connection), Some(source), started).await
    }

    async fn stream(
        &mut self,
        connection: &mut Connection,
        source: &mut AudioSource,
        shutdown: &mut Shutdown,
    ) -> Stop {
        let mut buffer = vec![0u8; self.config.buffer_size];

        loop {
            let read = tokio::select! {
                biased;
                _ = shutdown.triggered() => return Stop::Interrupted,
                read = read_chunk(source, &mut buffer, self.config.idle_read_timeout) => read,
            };

            match read {
                Ok(0) => {
                    self.report.idle_reads += 1;
                    let silence = self.silence.clone();
                    if let Err(e) = self.send(connection, &silence).await {
                        return Stop::Failed(e.into());
                    }
                    self.report.silence_bytes += silence.len() as u64;

                    if let Some(status) = source.exit_status() {
                        return Stop::Failed(AudioError::Exited(status.to_string()).into());
                    }

                    tokio::select! {
                        biased;
                        _ = shutdown.triggered() => return Stop::Interrupted,
                        _ = tokio::time::sleep(self.config.silence_pause) => {}
                    }
                }
                Ok(size) => {
                    if let Err(e) = self.send(connection, &buffer[..size]).await {
                        return Stop::Failed(e.into());
                    }
                    let before = self.report.bytes_sent;
                    self.report.bytes_sent += size as u64;

                    let interval = self.config.progress_interval;
                    if crossed_interval(before, self.report.bytes_sent, interval) {
                        tracing::info!("Sent {:.1} MB", self.report.megabytes_sent());
                    }
                }
                Err(e) => return Stop::Failed(e.into()),
            }
        }
    }

    /// Best-effort tail of silence; failures are only logged
    async fn drain(&mut self, connection: &mut Connection) {
        self.transition(StreamState::Draining);

        let tail = audio::silence(DRAIN_SILENCE_BYTES);
        match self.send(connection, &tail).await {
            Ok(()) => self.report.silence_bytes += tail.len() as u64,
            Err(e) => tracing::debug!("Final silence not sent: {}", e),
        }
    }

    async fn finish(
        mut self,
        connection: Option<Connection>,
        source: Option<AudioSource>,
        started: Instant,
    ) -> StreamReport {
        if let Some(mut source) = source {
            source.stop().await;
        }
        if let Some(mut connection) = connection {
            connection.close().await;
        }

        self.transition(StreamState::Closed);
        self.report.state = StreamState::Closed;
        self.report.elapsed = started.elapsed();

        tracing::info!(
            "Streaming stopped. Total sent: {:.2} MB",
            self.report.megabytes_sent()
        );
        self.report
    }

    async fn send(&self, connection: &mut Connection, data: &[u8]) -> Result<(), TransportError> {
        let limit = self.config.send_timeout;
        match tokio::time::timeout(limit, connection.send(data)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit.as_millis() as u64)),
        }
    }

    fn transition(&mut self, next: StreamState) {
        tracing::debug!("Stream state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

async fn read_chunk(
    source: &mut AudioSource,
    buffer: &mut [u8],
    idle_timeout: Option<Duration>,
) -> Result<usize, AudioError> {
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, source.read(buffer)).await {
            Ok(result) => result,
            Err(_) => Ok(0),
        },
        None => source.read(buffer).await,
    }
}

/// Whether going from `before` to `after` bytes passed a multiple of `interval`
fn crossed_interval(before: u64, after: u64, interval: u64) -> bool {
    interval > 0 && before / interval != after / interval
}
