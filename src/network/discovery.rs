//! Receiver discovery for LAN audio relay
//!
//! Broadcasts a single `AURYNK_DISCOVER` probe and collects the
//! `AURYNK_RESPONSE` datagrams that come back within a fixed window.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::time::Instant;

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::NetworkError;
use crate::network::udp::broadcast_socket;
use crate::protocol::{discovery_probe, DiscoveryResponse};
use crate::shutdown::Shutdown;

/// Longest single wait for a datagram, so the deadline and shutdown are
/// checked at least this often
pub const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Discovered receiver
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerRecord {
    /// Source address of the response datagram
    pub address: IpAddr,
    /// TCP port the receiver accepts audio on
    pub port: u16,
    /// Display name, not unique
    pub name: String,
}

impl PeerRecord {
    pub fn new(address: IpAddr, port: u16, name: impl Into<String>) -> Self {
        Self {
            address,
            port,
            name: name.into(),
        }
    }

    /// Get the audio streaming address
    pub fn stream_address(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl std::fmt::Display for PeerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}:{}", self.name, self.address, self.port)
    }
}

/// Insertion-ordered set of discovered peers.
///
/// Two records are the same peer only if address, port and name all match.
#[derive(Debug, Clone, Default)]
pub struct PeerSet {
    peers: Vec<PeerRecord>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `peer` unless already present. Returns true if it was new.
    pub fn insert(&mut self, peer: PeerRecord) -> bool {
        if self.peers.contains(&peer) {
            return false;
        }
        self.peers.push(peer);
        true
    }

    /// Handle one datagram from `source`; returns the new peer if it was a
    /// valid, previously unseen response
    pub fn record_datagram(&mut self, source: SocketAddr, data: &[u8]) -> Option<&PeerRecord> {
        let response = DiscoveryResponse::parse(data)?;
        let peer = PeerRecord::new(source.ip(), response.port, response.name);
        if self.insert(peer) {
            self.peers.last()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.iter()
    }

    pub fn into_vec(self) -> Vec<PeerRecord> {
        self.peers
    }
}

/// One-shot discovery client
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    /// Where the probe is sent
    broadcast_address: Ipv4Addr,
    /// Upper bound on a single receive wait
    poll_interval: Duration,
}

impl Default for DiscoveryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryClient {
    pub fn new() -> Self {
        Self {
            broadcast_address: Ipv4Addr::BROADCAST,
            poll_interval: DISCOVERY_POLL_INTERVAL,
        }
    }

    /// Send the probe somewhere other than 255.255.255.255 (a subnet
    /// broadcast, or a single host)
    pub fn with_broadcast_address(mut self, address: Ipv4Addr) -> Self {
        self.broadcast_address = address;
        self
    }

    /// Discover receivers for `timeout`, probing `discovery_port`
    pub async fn discover(&self, timeout: Duration, discovery_port: u16) -> Vec<PeerRecord> {
        self.discover_until(timeout, discovery_port, Shutdown::never()).await
    }

    /// Like [`discover`](Self::discover) but stops early on shutdown,
    /// returning what was collected so far.
    ///
    /// Socket failures are logged and yield an empty result.
    pub async fn discover_until(
        &self,
        timeout: Duration,
        discovery_port: u16,
        shutdown: Shutdown,
    ) -> Vec<PeerRecord> {
        tracing::info!("Starting device discovery...");

        let peers = match self.run(timeout, discovery_port, shutdown).await {
            Ok(peers) => peers,
            Err(e) => {
                tracing::error!("Discovery broadcast failed: {}", e);
                PeerSet::new()
            }
        };

        tracing::info!("Discovery complete. Found {} device(s)", peers.len());
        peers.into_vec()
    }

    async fn run(
        &self,
        timeout: Duration,
        discovery_port: u16,
        mut shutdown: Shutdown,
    ) -> Result<PeerSet, NetworkError> {
        let socket = broadcast_socket()?;
        let target = SocketAddr::from((self.broadcast_address, discovery_port));

        socket
            .send_to(&discovery_probe(), target)
            .await
            .map_err(|e| NetworkError::BroadcastFailed(e.to_string()))?;
        tracing::info!("Discovery broadcast sent on port {}", discovery_port);

        let deadline = Instant::now() + timeout;
        let mut peers = PeerSet::new();
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let received = tokio::select! {
                _ = shutdown.triggered() => {
                    tracing::debug!("Discovery interrupted");
                    break;
                }
                r = tokio::time::timeout(
                    remaining.min(self.poll_interval),
                    socket.recv_from(&mut buffer),
                ) => r,
            };

            match received {
                Ok(Ok((size, source))) => {
                    if let Some(peer) = peers.record_datagram(source, &buffer[..size]) {
                        tracing::info!("Discovered: {}", peer);
                    }
                }
                Ok(Err(e)) => {
                    tracing::debug!("Discovery receive error: {}", e);
                }
                Err(_) => continue,
            }
        }

        Ok(peers)
    }
}

/// One-shot discovery with default settings
pub async fn discover(timeout: Duration, discovery_port: u16) -> Vec<PeerRecord> {
    DiscoveryClient::new().discover(timeout, discovery_port).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::net::UdpSocket;

    fn addr(ip: &str, port: u16) -> SocketAddr {
        SocketAddr::new(ip.parse().unwrap(), port)
    }

    #[test]
    fn test_single_response_scenario() {
        let mut peers = PeerSet::new();
        let new = peers
            .record_datagram(addr("192.168.1.50", 5002), b"AURYNK_RESPONSE;5000;PixelPhone")
            .cloned();

        assert_eq!(
            new,
            Some(PeerRecord::new("192.168.1.50".parse().unwrap(), 5000, "PixelPhone"))
        );
        assert_eq!(peers.into_vec().len(), 1);
    }

    #[test]
    fn test_duplicate_response_ignored() {
        let mut peers = PeerSet::new();
        let source = addr("192.168.1.50", 40000);
        assert!(peers.record_datagram(source, b"AURYNK_RESPONSE;5000;Phone").is_some());
        assert!(peers.record_datagram(source, b"AURYNK_RESPONSE;5000;Phone").is_none());
        // Same device, different name is a distinct entry
        assert!(peers.record_datagram(source, b"AURYNK_RESPONSE;5000;Phone 2").is_some());
        assert_eq!(peers.len(), 2);
    }

    #[test]
    fn test_same_name_different_devices() {
        let mut peers = PeerSet::new();
        peers.record_datagram(addr("10.0.0.2", 5002), b"AURYNK_RESPONSE;5000;Phone");
        peers.record_datagram(addr("10.0.0.3", 5002), b"AURYNK_RESPONSE;5000;Phone");
        assert_eq!(peers.len(), 2);
    }

    #[test]
    fn test_short_response_never_added() {
        let mut peers = PeerSet::new();
        assert!(peers.record_datagram(addr("10.0.0.2", 5002), b"AURYNK_RESPONSE;5000").is_none());
        assert!(peers.record_datagram(addr("10.0.0.2", 5002), b"AURYNK_DISCOVER").is_none());
        assert!(peers.is_empty());
    }

    #[test]
    fn test_malformed_port_uses_fallback() {
        let mut peers = PeerSet::new();
        let peer = peers
            .record_datagram(addr("10.0.0.2", 5002), b"AURYNK_RESPONSE;port;Phone")
            .cloned()
            .unwrap();
        assert_eq!(peer.port, 5000);
        assert_eq!(peer.stream_address(), addr("10.0.0.2", 5000));
    }

    proptest! {
        #[test]
        fn test_no_duplicates_and_first_seen_order(
            responses in prop::collection::vec((0u8..4, 4999u16..5002, 0u8..3), 0..40)
        ) {
            let mut peers = PeerSet::new();
            let mut expected: Vec<PeerRecord> = Vec::new();

            for (host, port, name) in &responses {
                let source = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, *host)), 5002);
                let name = format!("Device{}", name);
                let datagram = format!("AURYNK_RESPONSE;{};{}", port, name);
                peers.record_datagram(source, datagram.as_bytes());

                let record = PeerRecord::new(source.ip(), *port, name);
                if !expected.contains(&record) {
                    expected.push(record);
                }
            }

            let result = peers.into_vec();
            let unique: std::collections::HashSet<_> = result.iter().collect();
            prop_assert_eq!(unique.len(), result.len());
            prop_assert_eq!(result, expected);
        }
    }

    #[tokio::test]
    async fn test_discover_over_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (size, from) = receiver.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..size], b"AURYNK_DISCOVER");
            // Duplicate and garbage replies must not show up in the result
            for reply in [
                &b"AURYNK_RESPONSE;5000;PixelPhone"[..],
                &b"AURYNK_RESPONSE;5000;PixelPhone"[..],
                &b"noise"[..],
                &b"AURYNK_RESPONSE;6001;Tablet"[..],
            ] {
                receiver.send_to(reply, from).await.unwrap();
            }
        });

        let started = Instant::now();
        let peers = DiscoveryClient::new()
            .with_broadcast_address(Ipv4Addr::LOCALHOST)
            .discover(Duration::from_millis(700), port)
            .await;
        responder.await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(700));
        assert_eq!(
            peers,
            vec![
                PeerRecord::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000, "PixelPhone"),
                PeerRecord::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6001, "Tablet"),
            ]
        );
    }

    #[tokio::test]
    async fn test_discover_respects_deadline_without_replies() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();

        let started = Instant::now();
        let peers = DiscoveryClient::new()
            .with_broadcast_address(Ipv4Addr::LOCALHOST)
            .discover(Duration::from_millis(300), port)
            .await;

        assert!(peers.is_empty());
        assert!(started.elapsed() < Duration::from_millis(1300));
    }

    #[tokio::test]
    async fn test_discover_stops_on_shutdown() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let (trigger, shutdown) = crate::shutdown::channel();

        let started = Instant::now();
        let discovery = tokio::spawn(async move {
            DiscoveryClient::new()
                .with_broadcast_address(Ipv4Addr::LOCALHOST)
                .discover_until(Duration::from_secs(30), port, shutdown)
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.trigger();

        let peers = discovery.await.unwrap();
        assert!(peers.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
