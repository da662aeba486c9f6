//! Сетевая подсистема
//!
//! Содержит модули для:
//! - UDP сокетов (broadcast и слушатели с SO_REUSEADDR)
//! - Обнаружения приёмников в локальной сети
//! - Рукопожатия перед началом стриминга
//! - TLS и TCP транспорта аудиопотока
//! - Отправки PCM потока

pub mod udp;
pub mod discovery;
pub mod handshake;
pub mod tls;
pub mod transport;
pub mod sender;

pub use udp::{broadcast_socket, listener_socket};
pub use discovery::{discover, DiscoveryClient, PeerRecord, PeerSet};
pub use handshake::{ConnectionOutcome, HandshakeClient, ResponseListener};
pub use tls::{TlsConfig, TlsContextBuilder, TlsPurpose};
pub use transport::Connection;
pub use sender::{SessionConfig, StreamReport, StreamSession, StreamState};
