//! PCM audio source
//!
//! The desktop capture is delegated to an encoder subprocess (ffmpeg) that
//! writes raw s16le, 44.1 kHz, stereo PCM to its stdout. The session only
//! reads bytes from it and stops it on exit: terminate first, kill after a
//! grace period.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use crate::config::AudioSourceConfig;
use crate::constants::{CHANNELS, SAMPLE_RATE};
use crate::error::AudioError;

/// Encoder arguments: capture `device` through `input_format`, emit raw PCM on stdout
pub fn source_args(config: &AudioSourceConfig) -> Vec<String> {
    let sample_rate = SAMPLE_RATE.to_string();
    let channels = CHANNELS.to_string();
    [
        "-f", config.input_format.as_str(),
        "-i", config.device.as_str(),
        "-f", "s16le",
        "-acodec", "pcm_s16le",
        "-ar", sample_rate.as_str(),
        "-ac", channels.as_str(),
        "-loglevel", "error",
        "-",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Readable PCM byte stream, optionally backed by a child process
pub struct AudioSource {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    child: Option<Child>,
    stop_grace: Duration,
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSource")
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .field("stop_grace", &self.stop_grace)
            .finish()
    }
}

impl AudioSource {
    /// Start the encoder process described by `config`
    pub fn spawn(config: &AudioSourceConfig) -> Result<Self, AudioError> {
        let mut command = Command::new(&config.program);
        command.args(source_args(config));

        tracing::info!(
            "Starting {} capturing '{}' via {}",
            config.program,
            config.device,
            config.input_format
        );
        Self::from_command(command, config.stop_grace())
    }

    /// Run `command` and read PCM from its stdout
    pub fn from_command(mut command: Command, stop_grace: Duration) -> Result<Self, AudioError> {
        let program = command.as_std().get_program().to_string_lossy().into_owned();
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AudioError::SpawnFailed {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(AudioError::NoOutput)?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(program.clone(), stderr));
        }
        tracing::debug!("{} running (pid {:?})", program, child.id());

        Ok(Self {
            reader: Box::new(stdout),
            child: Some(child),
            stop_grace,
        })
    }

    /// Use an arbitrary byte stream (stdin, a file, a test script) as the source
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            child: None,
            stop_grace: Duration::ZERO,
        }
    }

    /// Read up to `buf.len()` bytes. `Ok(0)` means nothing is available now.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
        self.reader.read(buf).await.map_err(AudioError::Read)
    }

    /// Exit status if the backing process has already exited
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        self.child.as_mut()?.try_wait().ok().flatten()
    }

    pub fn is_process(&self) -> bool {
        self.child.is_some()
    }

    /// Stop the backing process: terminate, wait up to the grace period,
    /// then kill. Errors are logged, never returned.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Ok(Some(status)) = child.try_wait() {
            tracing::debug!("Audio source already exited: {}", status);
            return;
        }

        terminate(&mut child);
        match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!("Audio source stopped: {}", status),
            Ok(Err(e)) => tracing::debug!("Waiting for audio source failed: {}", e),
            Err(_) => {
                tracing::debug!("Audio source ignored terminate, killing");
                if let Err(e) = child.kill().await {
                    tracing::debug!("Failed to kill audio source: {}", e);
                }
            }
        }
    }
}

/// Polite stop request: SIGTERM on Unix, hard kill elsewhere
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid belongs to a child we have not reaped yet
            let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if result == 0 {
                return;
            }
            tracing::debug!("SIGTERM failed: {}", std::io::Error::last_os_error());
        }
    }

    if let Err(e) = child.start_kill() {
        tracing::debug!("Failed to stop audio source: {}", e);
    }
}

async fn forward_stderr(program: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            tracing::warn!("{}: {}", program, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn shell(script: &str, stop_grace: Duration) -> AudioSource {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        AudioSource::from_command(command, stop_grace).unwrap()
    }

    #[test]
    fn test_source_args() {
        let args = source_args(&AudioSourceConfig::default());
        assert_eq!(
            args,
            vec![
                "-f", "pulse", "-i", "default", "-f", "s16le", "-acodec", "pcm_s16le",
                "-ar", "44100", "-ac", "2", "-loglevel", "error", "-",
            ]
        );
    }

    #[test]
    fn test_source_args_custom_device() {
        let config = AudioSourceConfig {
            input_format: "alsa".to_string(),
            device: "hw:1".to_string(),
            ..Default::default()
        };
        let args = source_args(&config);
        assert_eq!(&args[..4], &["-f", "alsa", "-i", "hw:1"]);
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let config = AudioSourceConfig {
            program: "definitely-not-an-encoder-binary".to_string(),
            ..Default::default()
        };
        let result = AudioSource::spawn(&config);
        assert!(matches!(result, Err(AudioError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_from_reader() {
        let mut source = AudioSource::from_reader(&b"\x01\x02\x03\x04"[..]);
        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
        assert_eq!(source.read(&mut buf).await.unwrap(), 0);
        assert!(!source.is_process());
        assert!(source.exit_status().is_none());
        source.stop().await;
        source.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_terminates_process() {
        let mut source = shell(
            "while true; do printf 'ab'; sleep 0.05; done",
            Duration::from_secs(2),
        );

        let mut buf = [0u8; 16];
        assert!(source.read(&mut buf).await.unwrap() > 0);

        let started = Instant::now();
        source.stop().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!source.is_process());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_after_grace() {
        let mut source = shell(
            "trap '' TERM; while true; do sleep 0.05; done",
            Duration::from_millis(200),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        source.stop().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_after_eof() {
        let mut source = shell("printf 'x'", Duration::from_secs(1));

        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).await.unwrap(), 1);
        assert_eq!(source.read(&mut buf).await.unwrap(), 0);

        let mut status = None;
        for _ in 0..50 {
            status = source.exit_status();
            if status.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(status.unwrap().success());
    }
}
