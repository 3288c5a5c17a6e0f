//! Error types for the client.
//!
//! Each variant maps to one disposition in the download pipeline:
//!
//! - `MetainfoInvalid` and `ConfigInvalid` are fatal and abort the program.
//! - `TrackerUnreachable` and `TrackerProtocol` skip the failing tracker;
//!   the announce loop moves on to the next one.
//! - `HandshakeMismatch` drops the peer before any work is assigned.
//! - `ProtocolViolation` and `PeerIo` drop the peer and re-queue the piece
//!   it was downloading.
//! - `IntegrityFailure` re-queues the piece but keeps the peer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The torrent file could not be decoded, or its fields are inconsistent.
    #[error("invalid metainfo: {0}")]
    MetainfoInvalid(String),

    /// The configuration leaves the client with no way to discover peers.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A tracker could not be reached (DNS, connect, timeout).
    #[error("tracker unreachable: {0}")]
    TrackerUnreachable(String),

    /// A tracker answered with something other than a valid response.
    #[error("tracker protocol error: {0}")]
    TrackerProtocol(String),

    /// The peer handshake did not identify the torrent we are downloading.
    #[error("handshake mismatch: {0}")]
    HandshakeMismatch(String),

    /// A peer sent a frame that violates the wire protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A completed piece did not hash to the value in the metainfo.
    #[error("piece {0} failed integrity check")]
    IntegrityFailure(u32),

    /// Read or write failure on a peer connection, including expired deadlines.
    #[error("peer i/o: {0}")]
    PeerIo(#[from] std::io::Error),
}
