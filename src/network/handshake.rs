//! Протокол рукопожатия с приёмником
//!
//! Этот модуль реализует запрос на подключение перед стримингом:
//! - Отправка `AURYNK_CONNECT;<имя устройства>` на выбранный приёмник
//! - Ожидание ответа `AURYNK_ACCEPT` / `AURYNK_REJECT` на отдельном сокете
//! - Таймаут, если приёмник не ответил
//!
//! ## Протокол
//!
//! ```text
//! Desktop                          Receiver
//!   │                                 │
//!   │──── AURYNK_CONNECT;<name> ────>│
//!   │                                 │  (пользователь подтверждает)
//!   │<─── AURYNK_ACCEPT ─────────────│
//!   │                                 │
//!   │═════ TCP: PCM s16le ══════════>│
//!   │                                 │
//! ```

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::NetworkError;
use crate::network::udp::{ephemeral_socket, listener_socket};
use crate::protocol::{connect_request, Reply};
use crate::shutdown::Shutdown;

/// Максимальное время одного ожидания датаграммы
pub const RESPONSE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Результат запроса на подключение
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Приёмник принял подключение
    Accepted,
    /// Приёмник отклонил подключение
    Rejected,
    /// Ответ не пришёл вовремя
    TimedOut,
}

/// Клиент рукопожатия
#[derive(Debug, Clone)]
pub struct HandshakeClient {
    /// Наше имя, которое увидит пользователь приёмника
    device_name: String,
}

impl HandshakeClient {
    /// Создать клиент
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
        }
    }

    /// Наше имя
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Отправить запрос на подключение.
    ///
    /// Ошибка возвращается только при локальном сбое отправки; отсутствие
    /// ответа сюда не относится.
    pub async fn send_request(&self, host: &str, port: u16) -> Result<(), NetworkError> {
        let socket = ephemeral_socket().await?;
        socket
            .send_to(&connect_request(&self.device_name), (host, port))
            .await
            .map_err(|e| NetworkError::SendFailed(format!("{}:{}: {}", host, port, e)))?;

        tracing::info!("Connection request sent to {}:{}", host, port);
        Ok(())
    }

    /// Отправить запрос, вернуть `true` при успешной отправке
    pub async fn request_connection(&self, host: &str, port: u16) -> bool {
        match self.send_request(host, port).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to send connection request: {}", e);
                false
            }
        }
    }

    /// Открыть слушатель на `listen_port` и дождаться ответа
    pub async fn await_outcome(
        &self,
        timeout: Duration,
        listen_port: u16,
    ) -> Result<ConnectionOutcome, NetworkError> {
        ResponseListener::bind(listen_port)?
            .wait(timeout, Shutdown::never())
            .await
    }
}

/// UDP-слушатель ответа приёмника.
///
/// Привязывается до отправки запроса, чтобы не потерять быстрый ответ.
/// Закрывается сразу после получения результата.
#[derive(Debug)]
pub struct ResponseListener {
    socket: UdpSocket,
}

impl ResponseListener {
    /// Привязать слушатель (SO_REUSEADDR) на всех интерфейсах
    pub fn bind(listen_port: u16) -> Result<Self, NetworkError> {
        Ok(Self {
            socket: listener_socket(listen_port)?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))
    }

    /// Ждать `AURYNK_ACCEPT` / `AURYNK_REJECT` не дольше `timeout`.
    ///
    /// Побеждает первый распознанный ответ, остальные датаграммы
    /// игнорируются. Отмена через `shutdown` даёт `NetworkError::Interrupted`.
    pub async fn wait(
        self,
        timeout: Duration,
        mut shutdown: Shutdown,
    ) -> Result<ConnectionOutcome, NetworkError> {
        tracing::info!("Waiting for connection response (timeout: {:?})...", timeout);

        let deadline = Instant::now() + timeout;
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let received = tokio::select! {
                _ = shutdown.triggered() => return Err(NetworkError::Interrupted),
                r = tokio::time::timeout(
                    remaining.min(RESPONSE_POLL_INTERVAL),
                    self.socket.recv_from(&mut buffer),
                ) => r,
            };

            match received {
                Ok(Ok((size, from))) => match Reply::parse(&buffer[..size]) {
                    Some(Reply::Accept) => {
                        tracing::info!("Connection ACCEPTED by {}", from.ip());
                        return Ok(ConnectionOutcome::Accepted);
                    }
                    Some(Reply::Reject) => {
                        tracing::warn!("Connection REJECTED by {}", from.ip());
                        return Ok(ConnectionOutcome::Rejected);
                    }
                    None => {
                        tracing::debug!("Ignoring unrelated datagram from {}", from);
                    }
                },
                Ok(Err(e)) => {
                    tracing::debug!("Response receive error: {}", e);
                }
                // Истёк срез ожидания - проверяем общий дедлайн
                Err(_) => {}
            }
        }

        tracing::warn!("Connection response timeout");
        Ok(ConnectionOutcome::TimedOut)
    }
}
