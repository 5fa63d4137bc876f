//! Peer addresses and board identifiers.
//!
//! A board identifier is `host:port:name`, where `host:port` is the address of
//! the peer that owns the board. The name is everything after the second `:`,
//! so it may itself contain colons; the host may not.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::codec::{WireError, ID_SEPARATOR};

/// Network address of a peer, as advertised in board identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// WebSocket URL for connecting to this peer.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{ID_SEPARATOR}{}", self.host, self.port)
    }
}

impl FromStr for PeerAddr {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(ID_SEPARATOR)
            .ok_or_else(|| WireError::malformed(format!("peer address without port: {s:?}")))?;
        if host.is_empty() {
            return Err(WireError::malformed(format!("peer address without host: {s:?}")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| WireError::malformed(format!("invalid port in {s:?}")))?;
        Ok(Self::new(host, port))
    }
}

/// Globally unique board identifier: owning peer plus board name.
///
/// Immutable once created. Ordering is by owner, then name, which is the
/// order front ends list boards in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoardId {
    owner: PeerAddr,
    name: String,
}

impl BoardId {
    pub fn new(owner: PeerAddr, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
        }
    }

    /// Address of the peer holding the authoritative copy.
    pub fn owner(&self) -> &PeerAddr {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{ID_SEPARATOR}{}", self.owner, self.name)
    }
}

impl FromStr for BoardId {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ID_SEPARATOR);
        let (Some(host), Some(port), Some(name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(WireError::malformed(format!(
                "board id must be peer:port:name, got {s:?}"
            )));
        };
        if host.is_empty() || name.is_empty() {
            return Err(WireError::malformed(format!("empty field in board id {s:?}")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| WireError::malformed(format!("invalid port in board id {s:?}")))?;
        Ok(Self::new(PeerAddr::new(host, port), name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_board_id_display() {
        let id = BoardId::new(PeerAddr::new("10.0.0.7", 8111), "board1700000000000");
        assert_eq!(id.to_string(), "10.0.0.7:8111:board1700000000000");
    }

    #[test]
    fn test_board_id_parse() {
        let id: BoardId = "localhost:3200:sketch".parse().unwrap();
        assert_eq!(id.owner(), &PeerAddr::new("localhost", 3200));
        assert_eq!(id.name(), "sketch");
    }

    #[test]
    fn test_board_id_name_keeps_colons() {
        let id: BoardId = "h:1:a:b".parse().unwrap();
        assert_eq!(id.name(), "a:b");
        assert_eq!(id.to_string(), "h:1:a:b");
    }

    #[test]
    fn test_board_id_rejects_bad_port() {
        assert!("host:notaport:b".parse::<BoardId>().is_err());
        assert!("host:70000:b".parse::<BoardId>().is_err());
    }

    #[test]
    fn test_board_id_rejects_missing_fields() {
        assert!("host:1".parse::<BoardId>().is_err());
        assert!(":1:b".parse::<BoardId>().is_err());
        assert!("h:1:".parse::<BoardId>().is_err());
        assert!("".parse::<BoardId>().is_err());
    }

    #[test]
    fn test_peer_addr_parse() {
        let addr: PeerAddr = "127.0.0.1:9090".parse().unwrap();
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!(addr.port, 9090);
        assert_eq!(addr.ws_url(), "ws://127.0.0.1:9090");
        assert!("nohost".parse::<PeerAddr>().is_err());
        assert!(":12".parse::<PeerAddr>().is_err());
    }

    #[test]
    fn test_board_ids_sort_by_owner_then_name() {
        let mut ids: Vec<BoardId> = ["b:2:x", "a:9:z", "a:9:c"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["a:9:c", "a:9:z", "b:2:x"]);
    }
}
