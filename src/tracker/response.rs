use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use super::error::TrackerError;
use crate::bencode::{decode, Dict, Value};
use crate::constants::TRACKER_ANNOUNCE_INTERVAL;
use crate::metainfo::InfoHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    None,
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::None => "",
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }

    pub fn as_udp_id(&self) -> u32 {
        match self {
            TrackerEvent::None => 0,
            TrackerEvent::Completed => 1,
            TrackerEvent::Started => 2,
            TrackerEvent::Stopped => 3,
        }
    }
}

/// Parameters of one announce, shared by every tracker transport.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: TrackerEvent,
}

impl AnnounceRequest {
    pub fn with_event(&self, event: TrackerEvent) -> Self {
        Self {
            event,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnounceResponse {
    /// Seconds to wait before the next regular announce.
    pub interval: u32,
    pub min_interval: Option<u32>,
    pub complete: Option<u32>,
    pub incomplete: Option<u32>,
    pub peers: Vec<SocketAddr>,
    pub peers6: Vec<SocketAddr>,
    pub warning_message: Option<String>,
    pub tracker_id: Option<String>,
}

impl AnnounceResponse {
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            min_interval: None,
            complete: None,
            incomplete: None,
            peers: Vec::new(),
            peers6: Vec::new(),
            warning_message: None,
            tracker_id: None,
        }
    }

    /// Parses a bencoded HTTP tracker response body.
    ///
    /// # Errors
    ///
    /// - [`TrackerError::Failure`] if the body carries a `failure reason`
    /// - [`TrackerError::MalformedResponse`] if the body is not a dictionary,
    ///   or `peers` is absent or malformed
    pub fn from_bencode(body: &[u8]) -> Result<Self, TrackerError> {
        let value = decode(body).map_err(|e| TrackerError::MalformedResponse(e.to_string()))?;
        let dict = value
            .as_dict()
            .ok_or_else(|| TrackerError::MalformedResponse("expected dict".into()))?;

        if let Some(failure) = dict.get(b"failure reason") {
            let reason = failure
                .as_bytes()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            return Err(TrackerError::Failure(reason));
        }

        let interval = get_u32(dict, b"interval")?
            .unwrap_or(TRACKER_ANNOUNCE_INTERVAL.as_secs() as u32);

        let mut response = AnnounceResponse::new(interval);
        response.min_interval = get_u32(dict, b"min interval")?;
        response.complete = get_u32(dict, b"complete")?;
        response.incomplete = get_u32(dict, b"incomplete")?;

        response.warning_message = dict
            .get(b"warning message")
            .and_then(|v| v.as_str())
            .map(String::from);

        response.tracker_id = dict
            .get(b"tracker id")
            .and_then(|v| v.as_str())
            .map(String::from);

        response.peers = match dict.get(b"peers") {
            Some(Value::Bytes(bytes)) => parse_compact_peers(bytes)?,
            Some(Value::List(list)) => parse_peer_list(list)?,
            Some(_) => {
                return Err(TrackerError::MalformedResponse(
                    "peers has unexpected type".into(),
                ))
            }
            None => return Err(TrackerError::MalformedResponse("missing peers".into())),
        };

        if let Some(peers6) = dict.get(b"peers6").and_then(|v| v.as_bytes()) {
            response.peers6 = parse_compact_peers6(peers6)?;
        }

        Ok(response)
    }

    /// Delay until the next regular announce, honoring `min interval`.
    pub fn reannounce_after(&self) -> Duration {
        let secs = self.interval.max(self.min_interval.unwrap_or(0));
        Duration::from_secs(secs as u64)
    }

    pub fn all_peers(&self) -> impl Iterator<Item = &SocketAddr> {
        self.peers.iter().chain(self.peers6.iter())
    }
}

fn get_u32(dict: &Dict, key: &[u8]) -> Result<Option<u32>, TrackerError> {
    match dict.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                TrackerError::MalformedResponse(format!(
                    "invalid {}",
                    String::from_utf8_lossy(key)
                ))
            }),
    }
}

fn parse_peer_list(list: &[Value]) -> Result<Vec<SocketAddr>, TrackerError> {
    list.iter()
        .map(|peer| {
            let dict = peer
                .as_dict()
                .ok_or_else(|| TrackerError::MalformedResponse("peer is not a dict".into()))?;
            let ip: IpAddr = dict
                .get(b"ip")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| TrackerError::MalformedResponse("invalid peer ip".into()))?;
            let port = dict
                .get(b"port")
                .and_then(|v| v.as_integer())
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| TrackerError::MalformedResponse("invalid peer port".into()))?;
            Ok(SocketAddr::new(ip, port))
        })
        .collect()
}

/// Decodes the compact IPv4 peer format: 4 bytes of address followed by a
/// big-endian port, per peer.
pub fn parse_compact_peers(data: &[u8]) -> Result<Vec<SocketAddr>, TrackerError> {
    if data.len() % 6 != 0 {
        return Err(TrackerError::MalformedResponse(format!(
            "compact peers length {} not a multiple of 6",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(6)
        .map(|b| {
            let ip = Ipv4Addr::new(b[0], b[1], b[2], b[3]);
            SocketAddr::new(IpAddr::V4(ip), u16::from_be_bytes([b[4], b[5]]))
        })
        .collect())
}

/// Decodes the compact IPv6 peer format (BEP-7): 16 + 2 bytes per peer.
pub fn parse_compact_peers6(data: &[u8]) -> Result<Vec<SocketAddr>, TrackerError> {
    if data.len() % 18 != 0 {
        return Err(TrackerError::MalformedResponse(format!(
            "compact peers6 length {} not a multiple of 18",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(18)
        .map(|b| {
            let mut ip = [0u8; 16];
            ip.copy_from_slice(&b[..16]);
            SocketAddr::new(
                IpAddr::V6(Ipv6Addr::from(ip)),
                u16::from_be_bytes([b[16], b[17]]),
            )
        })
        .collect())
}
