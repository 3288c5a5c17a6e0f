//! Peer endpoints and the compact peer format.
//!
//! Trackers answer announces with a compact binary peer list of 6-byte
//! entries:
//!
//! ```text
//! <IP: 4 bytes><Port: 2 bytes>
//! ```
//!
//! Both fields are big-endian. The same encoding appears in HTTP tracker
//! responses (the `peers` string) and after the fixed header of a UDP
//! announce response.

use std::fmt;
use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{Error, Result};

const PEER_SIZE: usize = 6;

/// A remote endpoint we may download from. Two peers are the same peer
/// exactly when their address and port match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Peer {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.ip), self.port)
    }
}

impl From<SocketAddrV4> for Peer {
    fn from(addr: SocketAddrV4) -> Peer {
        Peer {
            ip: *addr.ip(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Parse a compact peer list.
///
/// The input must be a whole number of 6-byte entries; anything else is a
/// malformed tracker response.
pub fn unmarshal_compact(buf: &[u8]) -> Result<Vec<Peer>> {
    if buf.len() % PEER_SIZE != 0 {
        return Err(Error::TrackerProtocol(format!(
            "compact peer list has length {}, not a multiple of {}",
            buf.len(),
            PEER_SIZE
        )));
    }

    let mut peers = Vec::with_capacity(buf.len() / PEER_SIZE);
    for entry in buf.chunks_exact(PEER_SIZE) {
        let ip = Ipv4Addr::new(entry[0], entry[1], entry[2], entry[3]);
        let port = Cursor::new(&entry[4..6]).read_u16::<BigEndian>()?;
        peers.push(Peer { ip, port });
    }

    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmarshal_two_peers() {
        let buf = [192, 168, 1, 1, 0x1A, 0xE1, 10, 0, 0, 1, 0, 80];
        let peers = unmarshal_compact(&buf).unwrap();

        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].ip, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(peers[0].port, 6881);
        assert_eq!(peers[1].ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(peers[1].port, 80);
    }

    #[test]
    fn unmarshal_empty_list() {
        assert!(unmarshal_compact(&[]).unwrap().is_empty());
    }

    #[test]
    fn unmarshal_rejects_truncated_entry() {
        let buf = [192, 168, 1, 1, 0x1A];
        let err = unmarshal_compact(&buf).unwrap_err();
        assert!(matches!(err, Error::TrackerProtocol(_)));
    }

    #[test]
    fn equality_is_by_endpoint() {
        let a = Peer {
            ip: Ipv4Addr::new(1, 2, 3, 4),
            port: 6881,
        };
        let b = Peer {
            ip: Ipv4Addr::new(1, 2, 3, 4),
            port: 6881,
        };
        let c = Peer {
            ip: Ipv4Addr::new(1, 2, 3, 4),
            port: 6882,
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
