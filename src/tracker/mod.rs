//! HTTP tracker client: announce requests and compact/non-compact peer
//! list parsing.
//!
//! This is a best-effort collaborator, not a hardened implementation —
//! DHT peer discovery is the primary path and the tracker is consulted
//! opportunistically when the magnet link names one.
use crate::wire::{InfoHash, PeerAddress};
use rand::Rng;
use serde::Deserialize;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker url error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("tracker http request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("tracker response is not valid bencode: {0}")]
    BencodeDe(#[from] serde_bencode::Error),

    #[error("tracker returned a malformed compact peer list")]
    BadCompactPeers(#[from] crate::wire::PeerAddressError),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Started,
    Stopped,
    Completed,
    None,
}

impl Event {
    fn as_str(&self) -> &'static str {
        match self {
            Event::Started => "started",
            Event::Stopped => "stopped",
            Event::Completed => "completed",
            Event::None => "",
        }
    }
}

/// A client communicating with a single BitTorrent tracker over HTTP.
#[derive(Debug)]
pub struct Client {
    peer_id: [u8; 20],
    port: u16,
}

#[derive(Debug)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: Event,
}

#[derive(Debug)]
pub struct AnnounceResponse {
    pub interval: i64,
    pub peers: Vec<PeerAddress>,
}

#[derive(Debug, Deserialize)]
struct TrackerResponse {
    #[serde(default)]
    interval: i64,
    #[serde(default)]
    peers: Peers,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Peers {
    Compact(Vec<u8>),
    NonCompact(Vec<PeerDict>),
}

impl Default for Peers {
    fn default() -> Self {
        Peers::Compact(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct PeerDict {
    ip: String,
    port: u16,
}

impl Client {
    pub fn new(port: u16) -> Self {
        Client {
            peer_id: generate_peer_id(),
            port,
        }
    }

    /// The local peer id this client announces under, reused as the peer
    /// id presented in the wire handshake so trackers and peers see a
    /// consistent identity for the session.
    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Sends an announce request to `tracker_url` and returns the peers it
    /// reports. `left` is the number of bytes still needed; for a
    /// metadata-only announce (before the info dict is known) pass the
    /// largest plausible upper bound.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn announce(
        &self,
        tracker_url: &str,
        info_hash: InfoHash,
        uploaded: u64,
        downloaded: u64,
        left: u64,
        event: Event,
    ) -> TrackerResult<AnnounceResponse> {
        let request = AnnounceRequest {
            info_hash,
            peer_id: self.peer_id,
            port: self.port,
            uploaded,
            downloaded,
            left,
            event,
        };
        let mut url = url::Url::parse(tracker_url)?;
        let mut params = vec![
            ("info_hash", url_encode(request.info_hash.as_bytes())),
            ("peer_id", url_encode(&request.peer_id)),
            ("port", request.port.to_string()),
            ("uploaded", request.uploaded.to_string()),
            ("downloaded", request.downloaded.to_string()),
            ("left", request.left.to_string()),
            ("compact", "1".to_string()),
        ];
        if request.event != Event::None {
            params.push(("event", request.event.as_str().to_string()));
        }
        url.query_pairs_mut().extend_pairs(&params).finish();
        tracing::debug!(%url, "sending tracker announce");
        let response = reqwest::get(url).await?;
        let response_bytes = response.bytes().await?;
        Self::parse_announce_response(&response_bytes)
    }

    /// Parses a bencoded tracker response, handling both the compact
    /// (6-byte-per-peer string) and non-compact (list of ip/port dicts)
    /// peer list forms.
    fn parse_announce_response(bytes: &[u8]) -> TrackerResult<AnnounceResponse> {
        let tracker_response: TrackerResponse = serde_bencode::from_bytes(bytes)?;
        let peers = match tracker_response.peers {
            Peers::Compact(bytes) => PeerAddress::parse_compact_list(&bytes)?,
            Peers::NonCompact(dicts) => dicts
                .into_iter()
                .filter_map(|dict| {
                    dict.ip
                        .parse::<Ipv4Addr>()
                        .ok()
                        .map(|ip| PeerAddress::new(ip, dict.port))
                })
                .collect(),
        };
        Ok(AnnounceResponse {
            interval: tracker_response.interval,
            peers,
        })
    }
}

/// Builds a 20-byte peer id: an 8-byte client identifier prefix followed
/// by 11 random bytes.
fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    let prefix = b"-MD0001-";
    peer_id[..prefix.len()].copy_from_slice(prefix);
    let mut rng = rand::rng();
    rng.fill(&mut peer_id[prefix.len()..]);
    peer_id
}

/// Percent-encodes a byte slice per RFC 3986, leaving the unreserved set
/// (`a-z A-Z 0-9 - . _ ~`) untouched.
fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_has_expected_prefix() {
        let id = generate_peer_id();
        assert_eq!(&id[..8], b"-MD0001-");
    }

    #[test]
    fn url_encode_leaves_unreserved_untouched_and_escapes_rest() {
        assert_eq!(url_encode(b"az09-._~"), "az09-._~");
        assert_eq!(url_encode(&[0xff]), "%FF");
    }

    #[test]
    fn parses_compact_peer_list() {
        let mut peers_bytes = Vec::new();
        peers_bytes.extend_from_slice(&[192, 168, 0, 1, 0x1a, 0xe1]);
        let mut response = Vec::new();
        response.extend_from_slice(b"d8:intervali1800e5:peers");
        response.extend_from_slice(format!("{}:", peers_bytes.len()).as_bytes());
        response.extend_from_slice(&peers_bytes);
        response.extend_from_slice(b"e");
        let parsed = Client::parse_announce_response(&response).unwrap();
        assert_eq!(parsed.interval, 1800);
        assert_eq!(parsed.peers, vec![PeerAddress::new(Ipv4Addr::new(192, 168, 0, 1), 0x1ae1)]);
    }

    #[test]
    fn parses_non_compact_peer_list() {
        let response = b"d8:intervali900e5:peersld2:ip9:127.0.0.14:porti6881eeee";
        let parsed = Client::parse_announce_response(response).unwrap();
        assert_eq!(parsed.interval, 900);
        assert_eq!(parsed.peers, vec![PeerAddress::new(Ipv4Addr::new(127, 0, 0, 1), 6881)]);
    }
}
