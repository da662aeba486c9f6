//! Configuration management

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Discovery / handshake configuration
    pub network: NetworkConfig,

    /// Streaming engine configuration
    pub stream: StreamConfig,

    /// Optional TLS for the audio stream
    pub tls: TlsSettings,

    /// Audio source subprocess
    pub audio: AudioSourceConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// UDP port the receiver listens on for probes and connect requests
    pub discovery_port: u16,

    /// TCP port of the receiver's audio socket when not discovered
    pub stream_port: u16,

    /// Local UDP port for accept/reject replies (defaults to `discovery_port`)
    pub response_port: Option<u16>,

    /// Destination of the discovery probe
    pub broadcast_address: Ipv4Addr,

    /// How long discovery collects responses
    pub discovery_timeout_secs: u64,

    /// How long to wait for an accept/reject reply
    pub handshake_timeout_secs: u64,

    /// Name announced in the connect request (defaults to the host name)
    pub device_name: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: DEFAULT_DISCOVERY_PORT,
            stream_port: DEFAULT_STREAM_PORT,
            response_port: None,
            broadcast_address: Ipv4Addr::BROADCAST,
            discovery_timeout_secs: DEFAULT_DISCOVERY_TIMEOUT_SECS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            device_name: None,
        }
    }
}

impl NetworkConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Port the accept/reject listener binds to
    pub fn response_port(&self) -> u16 {
        self.response_port.unwrap_or(self.discovery_port)
    }

    /// Name sent in `AURYNK_CONNECT`
    pub fn device_name(&self) -> String {
        self.device_name.clone().unwrap_or_else(local_device_name)
    }
}

/// Host name of this machine, `Desktop` when it cannot be determined
pub fn local_device_name() -> String {
    system_host_name()
        .into_iter()
        .chain(
            ["COMPUTERNAME", "HOSTNAME"]
                .iter()
                .filter_map(|var| std::env::var(var).ok()),
        )
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "Desktop".to_string())
}

#[cfg(unix)]
fn system_host_name() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is writable for buf.len() bytes
    let result = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if result != 0 {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Some(String::from_utf8_lossy(&buf[..len]).into_owned())
}

#[cfg(not(unix))]
fn system_host_name() -> Option<String> {
    None
}

/// Streaming engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bytes read from the audio source per iteration (also the silence chunk size)
    pub buffer_size: usize,

    /// Treat a read stalled longer than this as an empty read
    pub idle_read_timeout_ms: Option<u64>,

    /// Pause after sending a silence chunk
    pub silence_pause_ms: u64,

    /// Upper bound on a single send
    pub send_timeout_ms: u64,

    /// Progress log interval
    pub progress_interval_bytes: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_read_timeout_ms: None,
            silence_pause_ms: 10,
            send_timeout_ms: 5000,
            progress_interval_bytes: PROGRESS_INTERVAL_BYTES,
        }
    }
}

/// Minimum TLS protocol version
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

/// TLS settings for the audio stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Wrap the audio stream in TLS
    pub enabled: bool,

    /// Client certificate (PEM) for mutual TLS
    pub cert_file: Option<PathBuf>,

    /// Client private key (PEM) for mutual TLS
    pub key_file: Option<PathBuf>,

    /// CA bundle (PEM) used instead of the system trust store
    pub ca_file: Option<PathBuf>,

    /// Verify the receiver's certificate and host name
    pub verify: bool,

    /// Lowest accepted protocol version (strongest supported when unset)
    pub minimum_version: Option<TlsVersion>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_file: None,
            key_file: None,
            ca_file: None,
            verify: true,
            minimum_version: None,
        }
    }
}

/// Audio source (ffmpeg) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSourceConfig {
    /// Encoder executable
    pub program: String,

    /// Capture backend passed to `-f` (pulse, alsa, dshow, avfoundation...)
    pub input_format: String,

    /// Capture device passed to `-i`
    pub device: String,

    /// Grace period between terminate and kill
    pub stop_grace_ms: u64,
}

impl Default for AudioSourceConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            input_format: "pulse".to_string(),
            device: "default".to_string(),
            stop_grace_ms: 2000,
        }
    }
}

impl AudioSourceConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "audio-streamer", "lan-audio-relay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject settings the streaming engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.stream.buffer_size == 0 {
            return Err(crate::Error::Config("stream.buffer_size must be > 0".into()));
        }
        if self.tls.key_file.is_some() && self.tls.cert_file.is_none() {
            return Err(crate::Error::Config(
                "tls.key_file requires tls.cert_file".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.network.discovery_port, 5002);
        assert_eq!(config.network.stream_port, 5000);
        assert_eq!(config.network.response_port(), 5002);
        assert_eq!(config.stream.buffer_size, 4096);
        assert!(!config.tls.enabled);
        assert!(config.tls.verify);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [network]
            discovery_port = 6002

            [tls]
            enabled = true
            verify = false
            minimum_version = "1.2"
            "#,
        )
        .unwrap();

        assert_eq!(config.network.discovery_port, 6002);
        assert_eq!(config.network.stream_port, 5000);
        assert_eq!(config.stream.buffer_size, 4096);
        assert!(config.tls.enabled);
        assert!(!config.tls.verify);
        assert_eq!(config.tls.minimum_version, Some(TlsVersion::Tls12));
        assert_eq!(config.audio.program, "ffmpeg");
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("lan-audio-relay-config-{}.toml", std::process::id()));
        let mut config = AppConfig::default();
        config.network.device_name = Some("Desktop-PC".to_string());
        config.stream.buffer_size = 2048;

        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.network.device_name(), "Desktop-PC");
        assert_eq!(loaded.stream.buffer_size, 2048);
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let mut config = AppConfig::default();
        config.stream.buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_key_without_cert() {
        let mut config = AppConfig::default();
        config.tls.key_file = Some(PathBuf::from("client.key"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_local_device_name_not_empty() {
        assert!(!local_device_name().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_device_name_is_kernel_host_name() {
        let kernel = std::fs::read_to_string("/proc/sys/kernel/hostname").unwrap();
        let kernel = kernel.trim();
        assert_eq!(system_host_name().as_deref(), Some(kernel));
        if !kernel.is_empty() {
            assert_eq!(local_device_name(), kernel);
        }
    }
}
