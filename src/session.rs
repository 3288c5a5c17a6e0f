//! Peer sessions.
//!
//! A [`PeerSession`] owns the TCP connection to one remote peer and the
//! per-peer protocol state: whether the remote side has choked us and
//! which pieces it advertises. Establishing a session runs the fixed
//! opening sequence of the peer wire protocol:
//!
//! 1. TCP connect (5 second timeout)
//! 2. Handshake exchange, validating the echoed infohash (5 seconds)
//! 3. Receive the peer's bitfield, which must be its first message
//!    (5 seconds)
//!
//! Each session is owned by exactly one worker thread, so the protocol
//! state lives in plain fields. A session ends by being dropped, on any
//! error or when the download finishes.

use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

use crate::bitfield::Bitfield;
use crate::error::{Error, Result};
use crate::handshake::Handshake;
use crate::message::Message;
use crate::peer::Peer;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const OPENING_TIMEOUT: Duration = Duration::from_secs(5);

/// A live connection to one remote peer.
pub struct PeerSession {
    peer: Peer,
    conn: TcpStream,
    /// Whether the remote side currently refuses our requests.
    pub choked: bool,
    /// Pieces the remote side advertises.
    pub bitfield: Bitfield,
}

impl PeerSession {
    /// Connect to a peer and run the opening sequence.
    ///
    /// On success the session is ready for the download loop: handshake
    /// verified, bitfield stored, deadlines cleared.
    pub fn connect(peer: Peer, info_hash: [u8; 20], peer_id: [u8; 20]) -> Result<PeerSession> {
        let conn = TcpStream::connect_timeout(&peer.addr(), CONNECT_TIMEOUT)?;

        let mut session = PeerSession {
            peer,
            conn,
            choked: true,
            bitfield: Bitfield::default(),
        };

        session.set_deadline(Some(OPENING_TIMEOUT))?;
        session.exchange_handshake(info_hash, peer_id)?;
        session.bitfield = session.receive_bitfield()?;
        session.set_deadline(None)?;

        debug!("peer {}: session established", session.peer);
        Ok(session)
    }

    /// Apply a read and write timeout to the connection, or lift it with
    /// `None`. Expiry surfaces as an I/O error from the blocked call.
    pub fn set_deadline(&self, timeout: Option<Duration>) -> Result<()> {
        self.conn.set_read_timeout(timeout)?;
        self.conn.set_write_timeout(timeout)?;
        Ok(())
    }

    fn exchange_handshake(&mut self, info_hash: [u8; 20], peer_id: [u8; 20]) -> Result<()> {
        let request = Handshake::new(info_hash, peer_id);
        self.conn.write_all(&request.encode())?;

        let response = Handshake::read(&mut self.conn)?;
        if response.info_hash != info_hash {
            return Err(Error::HandshakeMismatch(format!(
                "peer {} answered for a different infohash",
                self.peer
            )));
        }

        Ok(())
    }

    /// The first frame after the handshake must be the peer's bitfield;
    /// a keep-alive or anything else fails the session.
    fn receive_bitfield(&mut self) -> Result<Bitfield> {
        match self.read_message()? {
            Some(Message::Bitfield(bits)) => Ok(Bitfield::new(bits)),
            Some(other) => Err(Error::ProtocolViolation(format!(
                "expected bitfield but got {}",
                other.kind()
            ))),
            None => Err(Error::ProtocolViolation(
                "expected bitfield but got keep-alive".to_string(),
            )),
        }
    }

    /// Send one message, logging it for traffic traces.
    pub fn send(&mut self, message: &Message) -> Result<()> {
        trace!("peer {}: send {}", self.peer, message.kind());
        self.conn.write_all(&message.encode())?;
        Ok(())
    }

    /// Read one frame; `None` is a keep-alive or an unknown message.
    pub fn read_message(&mut self) -> Result<Option<Message>> {
        Message::read(&mut self.conn)
    }
}
