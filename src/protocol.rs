//! Control messages exchanged with the receiver over UDP
//!
//! ## Messages
//!
//! ```text
//! ┌────────────────────┬───────────────────┬───────────────────────────────┐
//! │ Message            │ Direction         │ Payload (UTF-8, ';'-separated)│
//! ├────────────────────┼───────────────────┼───────────────────────────────┤
//! │ Discovery probe    │ desktop → bcast   │ AURYNK_DISCOVER               │
//! │ Discovery response │ receiver → desktop│ AURYNK_RESPONSE;<port>;<name> │
//! │ Connect request    │ desktop → receiver│ AURYNK_CONNECT;<deviceName>   │
//! │ Accept             │ receiver → desktop│ AURYNK_ACCEPT...  (prefix)    │
//! │ Reject             │ receiver → desktop│ AURYNK_REJECT...  (prefix)    │
//! └────────────────────┴───────────────────┴───────────────────────────────┘
//! ```
//!
//! The audio itself is not framed: after an accept the TCP connection carries
//! raw s16le PCM until either side closes it.

use bytes::Bytes;

/// Discovery probe payload
pub const DISCOVER: &str = "AURYNK_DISCOVER";

/// Discovery response prefix
pub const RESPONSE_PREFIX: &str = "AURYNK_RESPONSE";

/// Connect request prefix
pub const CONNECT_PREFIX: &str = "AURYNK_CONNECT";

/// Accept reply prefix
pub const ACCEPT_PREFIX: &str = "AURYNK_ACCEPT";

/// Reject reply prefix
pub const REJECT_PREFIX: &str = "AURYNK_REJECT";

/// Field separator
pub const SEPARATOR: char = ';';

/// Port assumed when a response carries an unparsable port field
pub const FALLBACK_RESPONSE_PORT: u16 = 5000;

/// Decode a datagram the way the receiver writes it: lossy UTF-8, trimmed
fn datagram_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).trim().to_string()
}

/// Encoded discovery probe
pub fn discovery_probe() -> Bytes {
    Bytes::from_static(DISCOVER.as_bytes())
}

/// Encoded connect request announcing `device_name`
pub fn connect_request(device_name: &str) -> Bytes {
    Bytes::from(format!("{}{}{}", CONNECT_PREFIX, SEPARATOR, device_name))
}

/// A receiver's answer to the discovery probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResponse {
    /// TCP port of the receiver's audio socket
    pub port: u16,
    /// Display name
    pub name: String,
}

impl DiscoveryResponse {
    pub fn new(port: u16, name: impl Into<String>) -> Self {
        Self {
            port,
            name: name.into(),
        }
    }

    /// Parse `AURYNK_RESPONSE;<port>;<name>`.
    ///
    /// Returns `None` for anything that is not a response or has fewer than
    /// three fields. A bad port field falls back to
    /// [`FALLBACK_RESPONSE_PORT`]; fields after the name are ignored.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let text = datagram_text(data);
        if !text.starts_with(RESPONSE_PREFIX) {
            return None;
        }

        let fields: Vec<&str> = text.split(SEPARATOR).collect();
        if fields.len() < 3 {
            return None;
        }

        let port = fields[1]
            .trim()
            .parse::<u16>()
            .unwrap_or(FALLBACK_RESPONSE_PORT);

        Some(Self {
            port,
            name: fields[2].to_string(),
        })
    }

    pub fn encode(&self) -> Bytes {
        Bytes::from(format!(
            "{}{}{}{}{}",
            RESPONSE_PREFIX, SEPARATOR, self.port, SEPARATOR, self.name
        ))
    }
}

/// Receiver's verdict on a connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Accept,
    Reject,
}

impl Reply {
    /// Prefix match; anything after the keyword is ignored
    pub fn parse(data: &[u8]) -> Option<Self> {
        let text = datagram_text(data);
        if text.starts_with(ACCEPT_PREFIX) {
            Some(Self::Accept)
        } else if text.starts_with(REJECT_PREFIX) {
            Some(Self::Reject)
        } else {
            None
        }
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Self::Accept => Bytes::from_static(ACCEPT_PREFIX.as_bytes()),
            Self::Reject => Bytes::from_static(REJECT_PREFIX.as_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let response = DiscoveryResponse::parse(b"AURYNK_RESPONSE;5000;PixelPhone").unwrap();
        assert_eq!(response, DiscoveryResponse::new(5000, "PixelPhone"));
    }

    #[test]
    fn test_parse_response_trims_whitespace() {
        let response = DiscoveryResponse::parse(b"  AURYNK_RESPONSE;6000;Tablet\n").unwrap();
        assert_eq!(response.port, 6000);
        assert_eq!(response.name, "Tablet");
    }

    #[test]
    fn test_malformed_port_falls_back() {
        for data in [
            &b"AURYNK_RESPONSE;abc;Phone"[..],
            &b"AURYNK_RESPONSE;;Phone"[..],
            &b"AURYNK_RESPONSE;70000;Phone"[..],
            &b"AURYNK_RESPONSE;-1;Phone"[..],
        ] {
            let response = DiscoveryResponse::parse(data).unwrap();
            assert_eq!(response.port, 5000, "{:?}", String::from_utf8_lossy(data));
            assert_eq!(response.name, "Phone");
        }
    }

    #[test]
    fn test_too_few_fields_ignored() {
        assert!(DiscoveryResponse::parse(b"AURYNK_RESPONSE").is_none());
        assert!(DiscoveryResponse::parse(b"AURYNK_RESPONSE;5000").is_none());
    }

    #[test]
    fn test_non_response_ignored() {
        assert!(DiscoveryResponse::parse(b"AURYNK_DISCOVER").is_none());
        assert!(DiscoveryResponse::parse(b"HELLO;5000;Phone").is_none());
        assert!(DiscoveryResponse::parse(&[0xff, 0xfe, 0x00]).is_none());
    }

    #[test]
    fn test_extra_fields_ignored() {
        let response = DiscoveryResponse::parse(b"AURYNK_RESPONSE;5001;Phone;v2;extra").unwrap();
        assert_eq!(response, DiscoveryResponse::new(5001, "Phone"));
    }

    #[test]
    fn test_response_encode() {
        let response = DiscoveryResponse::new(5000, "PixelPhone");
        assert_eq!(response.encode().as_ref(), b"AURYNK_RESPONSE;5000;PixelPhone");
    }

    #[test]
    fn test_connect_request() {
        assert_eq!(connect_request("Desktop-PC").as_ref(), b"AURYNK_CONNECT;Desktop-PC");
        assert_eq!(discovery_probe().as_ref(), b"AURYNK_DISCOVER");
    }

    #[test]
    fn test_reply_prefix_match() {
        assert_eq!(Reply::parse(b"AURYNK_ACCEPT"), Some(Reply::Accept));
        assert_eq!(Reply::parse(b"AURYNK_ACCEPT;PixelPhone"), Some(Reply::Accept));
        assert_eq!(Reply::parse(b"AURYNK_REJECT\n"), Some(Reply::Reject));
        assert_eq!(Reply::parse(b"AURYNK_RESPONSE;5000;x"), None);
        assert_eq!(Reply::parse(b"accept"), None);
    }
}
