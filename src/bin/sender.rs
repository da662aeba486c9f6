//! Desktop Audio Sender
//!
//! Streams desktop audio to a receiver on the local network.
//!
//! Usage:
//!   cargo run --bin sender -- --discover
//!   cargo run --bin sender -- --host 192.168.1.50 --port 5000 --tls --cafile ca.pem

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use lan_audio_relay::{
    config::AppConfig,
    logging,
    network::PeerRecord,
    relay::{Relay, RelayOutcome},
    shutdown,
};

#[derive(Parser)]
#[command(name = "sender")]
#[command(about = "Stream desktop audio to a receiver on the local network")]
struct Args {
    /// Discover receiver devices on the local network
    #[arg(long)]
    discover: bool,

    /// Destination host IP
    #[arg(long)]
    host: Option<String>,

    /// Destination port
    #[arg(long)]
    port: Option<u16>,

    /// PulseAudio/PipeWire source device
    #[arg(long)]
    device: Option<String>,

    /// Enable TLS encryption
    #[arg(long)]
    tls: bool,

    /// TLS client certificate file
    #[arg(long)]
    certfile: Option<PathBuf>,

    /// TLS private key file
    #[arg(long)]
    keyfile: Option<PathBuf>,

    /// CA certificate file
    #[arg(long)]
    cafile: Option<PathBuf>,

    /// Disable TLS verification (insecure)
    #[arg(long)]
    no_verify: bool,

    /// Stream buffer size in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Discovery and handshake port
    #[arg(long)]
    discovery_port: Option<u16>,

    /// Config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    /// Command line flags win over the config file
    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.network.stream_port = port;
        }
        if let Some(port) = self.discovery_port {
            config.network.discovery_port = port;
        }
        if let Some(device) = &self.device {
            config.audio.device = device.clone();
        }
        if let Some(size) = self.buffer_size {
            config.stream.buffer_size = size;
        }
        if self.tls {
            config.tls.enabled = true;
        }
        if self.certfile.is_some() {
            config.tls.cert_file = self.certfile.clone();
        }
        if self.keyfile.is_some() {
            config.tls.key_file = self.keyfile.clone();
        }
        if self.cafile.is_some() {
            config.tls.ca_file = self.cafile.clone();
        }
        if self.no_verify {
            config.tls.verify = false;
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => match AppConfig::default_path() {
            Some(path) if path.exists() => AppConfig::load(&path)
                .with_context(|| format!("Failed to load config {}", path.display())),
            _ => Ok(AppConfig::default()),
        },
    }
}

/// Print the receivers and read a choice from stdin
fn prompt_for_peer(peers: &[PeerRecord]) -> Option<usize> {
    println!("\n═══ Discovered Receivers ═══");
    for (i, peer) in peers.iter().enumerate() {
        println!("  [{}] {}", i, peer.name);
        println!("      IP: {}:{}", peer.address, peer.port);
    }
    println!("{}", "═".repeat(30));

    print!("\nSelect device [0-{}] (default: 0): ", peers.len() - 1);
    let _ = std::io::stdout().flush();

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line).ok()?;
    let choice = line.trim();
    if choice.is_empty() {
        return Some(0);
    }
    choice.parse().ok()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init("info");

    let mut config = load_config(args.config.as_ref())?;
    args.apply(&mut config);

    let relay = Relay::new(config).context("Invalid configuration")?;

    let (trigger, shutdown) = shutdown::channel();
    shutdown::spawn_signal_handler(trigger);

    let host = if args.discover { None } else { args.host.as_deref() };
    let outcome = relay
        .run(
            host,
            |peers| tokio::task::block_in_place(|| prompt_for_peer(peers)),
            shutdown,
        )
        .await;

    match outcome {
        Ok(RelayOutcome::Streamed(report)) => {
            tracing::info!(
                "Done streaming: {:.2} MB in {:.1?} ({:.1?} of audio)",
                report.megabytes_sent(),
                report.elapsed,
                report.audio_duration()
            );
            if let Some(e) = report.error {
                return Err(e).context("Stream ended with an error");
            }
        }
        Ok(RelayOutcome::NoPeers) => {}
        Ok(RelayOutcome::Rejected) => tracing::error!("✗ Connection rejected by receiver"),
        Ok(RelayOutcome::TimedOut) => tracing::error!("✗ Connection timeout"),
        Err(lan_audio_relay::Error::Network(lan_audio_relay::error::NetworkError::Interrupted)) => {
            tracing::info!("Interrupted by user");
        }
        Err(e) => return Err(e).context("Failed to set up the stream"),
    }

    Ok(())
}
