//! Peer wire messages.
//!
//! Every message after the handshake shares one frame format:
//!
//! ```text
//! <length prefix><message ID><payload>
//! ```
//!
//! - Length prefix: 4 bytes (big-endian u32), counting the ID and payload
//! - Message ID: 1 byte
//! - Payload: `length - 1` bytes
//!
//! A frame of length zero carries no ID and no payload; it is a keep-alive,
//! surfaced to callers as `None`.
//!
//! | ID | Message | Payload |
//! |----|---------|---------|
//! | 0 | choke | none |
//! | 1 | unchoke | none |
//! | 2 | interested | none |
//! | 3 | not interested | none |
//! | 4 | have | piece index (u32) |
//! | 5 | bitfield | availability bits |
//! | 6 | request | index, begin, length (u32 each) |
//! | 7 | piece | index, begin (u32 each), then block bytes |
//! | 8 | cancel | index, begin, length (u32 each) |
//!
//! IDs outside this table come from extensions we do not speak; they are
//! logged and dropped. `cancel` is decoded for completeness but this client
//! never sends one.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{Error, Result};

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;

/// The wire encoding of a keep-alive: a length prefix of zero.
#[allow(dead_code)]
pub const KEEPALIVE_FRAME: [u8; 4] = [0; 4];

// A frame longer than this is garbage: the largest legitimate frames are
// piece frames (16 KiB block + 9 bytes) and bitfields of very large torrents.
const MAX_FRAME_LEN: usize = 256 * 1024;

/// A decoded peer wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    pub fn id(&self) -> u8 {
        match self {
            Message::Choke => ID_CHOKE,
            Message::Unchoke => ID_UNCHOKE,
            Message::Interested => ID_INTERESTED,
            Message::NotInterested => ID_NOT_INTERESTED,
            Message::Have(_) => ID_HAVE,
            Message::Bitfield(_) => ID_BITFIELD,
            Message::Request { .. } => ID_REQUEST,
            Message::Piece { .. } => ID_PIECE,
            Message::Cancel { .. } => ID_CANCEL,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Choke => "choke",
            Message::Unchoke => "unchoke",
            Message::Interested => "interested",
            Message::NotInterested => "not interested",
            Message::Have(_) => "have",
            Message::Bitfield(_) => "bitfield",
            Message::Request { .. } => "request",
            Message::Piece { .. } => "piece",
            Message::Cancel { .. } => "cancel",
        }
    }

    /// Serialize into a complete frame, length prefix included.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload: Vec<u8> = Vec::new();
        match self {
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => {}
            Message::Have(index) => payload.extend_from_slice(&index.to_be_bytes()),
            Message::Bitfield(bits) => payload.extend_from_slice(bits),
            Message::Request {
                index,
                begin,
                length,
            }
            | Message::Cancel {
                index,
                begin,
                length,
            } => {
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(&length.to_be_bytes());
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                payload.extend_from_slice(&index.to_be_bytes());
                payload.extend_from_slice(&begin.to_be_bytes());
                payload.extend_from_slice(block);
            }
        }

        let mut frame = Vec::with_capacity(4 + 1 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32 + 1).to_be_bytes());
        frame.push(self.id());
        frame.extend_from_slice(&payload);
        frame
    }

    /// Read one frame off the wire.
    ///
    /// Returns `Ok(None)` for keep-alives and for messages with IDs we do
    /// not understand.
    pub fn read(r: &mut impl Read) -> Result<Option<Message>> {
        let length = r.read_u32::<BigEndian>()? as usize;

        // keep-alive
        if length == 0 {
            return Ok(None);
        }
        if length > MAX_FRAME_LEN {
            return Err(Error::ProtocolViolation(format!(
                "frame of {length} bytes exceeds the {MAX_FRAME_LEN} byte limit"
            )));
        }

        let mut buf = vec![0u8; length];
        r.read_exact(&mut buf)?;

        Message::decode(buf[0], &buf[1..])
    }

    fn decode(id: u8, payload: &[u8]) -> Result<Option<Message>> {
        let message = match id {
            ID_CHOKE => Message::Choke,
            ID_UNCHOKE => Message::Unchoke,
            ID_INTERESTED => Message::Interested,
            ID_NOT_INTERESTED => Message::NotInterested,
            ID_HAVE => {
                if payload.len() != 4 {
                    return Err(Error::ProtocolViolation(format!(
                        "have payload should be 4 bytes but is {}",
                        payload.len()
                    )));
                }
                Message::Have(read_u32_at(payload, 0))
            }
            ID_BITFIELD => Message::Bitfield(payload.to_vec()),
            ID_REQUEST | ID_CANCEL => {
                if payload.len() != 12 {
                    return Err(Error::ProtocolViolation(format!(
                        "request payload should be 12 bytes but is {}",
                        payload.len()
                    )));
                }
                let index = read_u32_at(payload, 0);
                let begin = read_u32_at(payload, 4);
                let length = read_u32_at(payload, 8);
                if id == ID_REQUEST {
                    Message::Request {
                        index,
                        begin,
                        length,
                    }
                } else {
                    Message::Cancel {
                        index,
                        begin,
                        length,
                    }
                }
            }
            ID_PIECE => {
                if payload.len() < 8 {
                    return Err(Error::ProtocolViolation(format!(
                        "piece payload too short: {} < 8",
                        payload.len()
                    )));
                }
                Message::Piece {
                    index: read_u32_at(payload, 0),
                    begin: read_u32_at(payload, 4),
                    block: payload[8..].to_vec(),
                }
            }
            other => {
                debug!("ignoring message with unknown id {}", other);
                return Ok(None);
            }
        };

        Ok(Some(message))
    }
}

fn read_u32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(message: Message) {
        let frame = message.encode();
        let decoded = Message::read(&mut Cursor::new(&frame)).unwrap();
        assert_eq!(decoded, Some(message));
    }

    #[test]
    fn request_encodes_to_known_bytes() {
        let message = Message::Request {
            index: 5,
            begin: 1024,
            length: 16384,
        };
        assert_eq!(
            message.encode(),
            b"\x00\x00\x00\x0D\x06\x00\x00\x00\x05\x00\x00\x04\x00\x00\x00\x40\x00".to_vec()
        );
    }

    #[test]
    fn every_variant_round_trips() {
        round_trip(Message::Choke);
        round_trip(Message::Unchoke);
        round_trip(Message::Interested);
        round_trip(Message::NotInterested);
        round_trip(Message::Have(42));
        round_trip(Message::Bitfield(vec![0xDE, 0xAD]));
        round_trip(Message::Request {
            index: 1,
            begin: 2,
            length: 3,
        });
        round_trip(Message::Piece {
            index: 7,
            begin: 16384,
            block: vec![0xAB; 100],
        });
        round_trip(Message::Cancel {
            index: 1,
            begin: 2,
            length: 3,
        });
    }

    #[test]
    fn keepalive_frame_is_four_zero_bytes() {
        assert_eq!(KEEPALIVE_FRAME, [0, 0, 0, 0]);
        let decoded = Message::read(&mut Cursor::new(&KEEPALIVE_FRAME)).unwrap();
        assert_eq!(decoded, None);
    }

    #[test]
    fn have_decodes_index() {
        let decoded = Message::decode(4, b"\x00\x00\x00\x2A").unwrap();
        assert_eq!(decoded, Some(Message::Have(42)));
    }

    #[test]
    fn have_with_wrong_payload_length_is_an_error() {
        let err = Message::decode(4, b"\x00\x00\x2A").unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[test]
    fn short_piece_payload_is_an_error() {
        let err = Message::decode(7, b"\x00\x00\x00\x01\x00\x00\x00").unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[test]
    fn unknown_id_is_ignored() {
        let decoded = Message::decode(20, b"\x00\x01\x02").unwrap();
        assert_eq!(decoded, None);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let frame = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let err = Message::read(&mut Cursor::new(&frame)).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }
}
