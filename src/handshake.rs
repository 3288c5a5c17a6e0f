//! The BitTorrent handshake.
//!
//! The handshake is a fixed 68-byte exchange sent in both directions
//! immediately after the TCP connection opens:
//!
//! ```text
//! <pstrlen><pstr><reserved><info_hash><peer_id>
//! ```
//!
//! - pstrlen: 1 byte, always 19
//! - pstr: the 19 bytes of "BitTorrent protocol"
//! - reserved: 8 zero bytes (extension bits, none supported here)
//! - info_hash: 20 bytes identifying the torrent
//! - peer_id: 20 bytes identifying the sender
//!
//! The infohash echoed by the remote side must match ours, otherwise we
//! are talking to a peer from a different swarm. The remote peer ID is
//! accepted without comparison.

use std::io::Read;

use crate::error::{Error, Result};

const PROTOCOL_ID: &[u8; 19] = b"BitTorrent protocol";

/// Length of a serialized handshake in bytes.
pub const HANDSHAKE_LEN: usize = 68;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Handshake {
        Handshake { info_hash, peer_id }
    }

    /// Serialize into the fixed 68-byte wire layout.
    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL_ID.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL_ID);
        // bytes 20..28 stay zero (reserved)
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Read one handshake off the wire.
    ///
    /// Rejects any protocol string length other than 19 before consuming
    /// the rest of the message.
    pub fn read(r: &mut impl Read) -> Result<Handshake> {
        let mut pstrlen = [0u8; 1];
        r.read_exact(&mut pstrlen)?;
        if pstrlen[0] as usize != PROTOCOL_ID.len() {
            return Err(Error::HandshakeMismatch(format!(
                "protocol string length should be 19 but is {}",
                pstrlen[0]
            )));
        }

        let mut buf = [0u8; HANDSHAKE_LEN - 1];
        r.read_exact(&mut buf)?;

        let mut info_hash = [0u8; 20];
        let mut peer_id = [0u8; 20];
        info_hash.copy_from_slice(&buf[27..47]);
        peer_id.copy_from_slice(&buf[47..67]);

        Ok(Handshake { info_hash, peer_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> Handshake {
        let mut info_hash = [0u8; 20];
        for (i, b) in info_hash.iter_mut().enumerate() {
            *b = i as u8 + 1;
        }
        Handshake::new(info_hash, *b"-ABC-0123456789abcde")
    }

    #[test]
    fn encode_layout() {
        let handshake = sample();
        let buf = handshake.encode();

        assert_eq!(buf.len(), HANDSHAKE_LEN);
        assert_eq!(&buf[0..20], b"\x13BitTorrent protocol");
        assert_eq!(&buf[20..28], &[0u8; 8]);
        assert_eq!(&buf[28..48], &handshake.info_hash);
        assert_eq!(&buf[48..68], &handshake.peer_id);
    }

    #[test]
    fn round_trip() {
        let handshake = sample();
        let buf = handshake.encode();
        let decoded = Handshake::read(&mut Cursor::new(&buf[..])).unwrap();
        assert_eq!(decoded, handshake);
    }

    #[test]
    fn rejects_wrong_pstrlen() {
        let mut buf = sample().encode();
        buf[0] = 18;
        let err = Handshake::read(&mut Cursor::new(&buf[..])).unwrap_err();
        assert!(matches!(err, Error::HandshakeMismatch(_)));
    }

    #[test]
    fn truncated_handshake_is_io_error() {
        let buf = sample().encode();
        let err = Handshake::read(&mut Cursor::new(&buf[..40])).unwrap_err();
        assert!(matches!(err, Error::PeerIo(_)));
    }
}
