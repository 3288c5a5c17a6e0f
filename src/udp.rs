//! BEP-15 UDP tracker protocol.
//!
//! Announcing over UDP takes two request/response rounds on one connected
//! socket, both covered by a single 5 second deadline:
//!
//! 1. **Connect** (16-byte request, 16-byte response): proves to the
//!    tracker that we can receive at our source address and yields a
//!    connection ID for the second round.
//! 2. **Announce** (98-byte request, response of at least 20 bytes): the
//!    actual announce, answered with the re-announce interval, swarm
//!    counts and a compact peer list.
//!
//! Connect request layout:
//!
//! ```text
//! [0:8]  protocol id 0x41727101980
//! [8:12] action 0
//! [12:16] transaction id
//! ```
//!
//! Announce request layout:
//!
//! ```text
//! [0:8]   connection id     [56:64] downloaded 0
//! [8:12]  action 1          [64:72] left
//! [12:16] transaction id    [72:80] uploaded 0
//! [16:36] infohash          [80:84] event 0
//! [36:56] peer id           [84:88] ip 0
//!                           [88:92] key
//!                           [92:96] num_want -1
//!                           [96:98] port 0
//! ```
//!
//! `num_want` is a signed -1 ("give me the default amount"), written as
//! 0xFFFFFFFF on the wire. Responses echo our transaction ID; a mismatch
//! or an unexpected action fails the exchange.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{Error, Result};
use crate::peer::{unmarshal_compact, Peer};

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;

/// Size of a serialized connect request.
pub const CONNECT_LEN: usize = 16;
/// Size of a serialized announce request.
pub const ANNOUNCE_LEN: usize = 98;

// Both rounds must finish within this window.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

struct ConnectRequest {
    transaction_id: u32,
}

impl ConnectRequest {
    fn new() -> ConnectRequest {
        ConnectRequest {
            transaction_id: rand::thread_rng().gen(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CONNECT_LEN);
        buf.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
        buf.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
        buf.extend_from_slice(&self.transaction_id.to_be_bytes());
        buf
    }
}

#[derive(Debug)]
struct ConnectResponse {
    action: u32,
    transaction_id: u32,
    connection_id: u64,
}

impl ConnectResponse {
    fn parse(buf: &[u8]) -> Result<ConnectResponse> {
        if buf.len() < CONNECT_LEN {
            return Err(Error::TrackerProtocol(format!(
                "connect response has {} bytes, expected {}",
                buf.len(),
                CONNECT_LEN
            )));
        }

        Ok(ConnectResponse {
            action: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            transaction_id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            connection_id: u64::from_be_bytes([
                buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
            ]),
        })
    }
}

struct AnnounceRequest {
    connection_id: u64,
    transaction_id: u32,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    left: u64,
    key: u32,
}

impl AnnounceRequest {
    fn new(connection_id: u64, info_hash: [u8; 20], peer_id: [u8; 20], left: u64) -> AnnounceRequest {
        let mut rng = rand::thread_rng();
        AnnounceRequest {
            connection_id,
            transaction_id: rng.gen(),
            info_hash,
            peer_id,
            left,
            key: rng.gen(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ANNOUNCE_LEN);
        buf.extend_from_slice(&self.connection_id.to_be_bytes());
        buf.extend_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
        buf.extend_from_slice(&self.transaction_id.to_be_bytes());
        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);
        buf.extend_from_slice(&0u64.to_be_bytes()); // downloaded
        buf.extend_from_slice(&self.left.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes()); // uploaded
        buf.extend_from_slice(&0u32.to_be_bytes()); // event
        buf.extend_from_slice(&0u32.to_be_bytes()); // ip (default: sender address)
        buf.extend_from_slice(&self.key.to_be_bytes());
        buf.extend_from_slice(&(-1i32).to_be_bytes()); // num_want
        buf.extend_from_slice(&0u16.to_be_bytes()); // port
        buf
    }
}

#[derive(Debug)]
struct AnnounceResponse {
    action: u32,
    transaction_id: u32,
    interval: u32,
    peers: Vec<Peer>,
}

impl AnnounceResponse {
    fn parse(buf: &[u8]) -> Result<AnnounceResponse> {
        if buf.len() < 20 {
            return Err(Error::TrackerProtocol(format!(
                "announce response has {} bytes, expected at least 20",
                buf.len()
            )));
        }

        Ok(AnnounceResponse {
            action: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            transaction_id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            interval: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            // leechers [12:16] and seeders [16:20] are not interesting here
            peers: unmarshal_compact(&buf[20..])?,
        })
    }
}

/// Run a full two-round announce against a UDP tracker.
///
/// `addr` is a `host:port` pair; resolution happens as part of the socket
/// connect. Returns the discovered peers and the tracker's re-announce
/// interval in seconds.
pub fn announce(
    addr: &str,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    left: u64,
) -> Result<(Vec<Peer>, u64)> {
    let deadline = Instant::now() + EXCHANGE_TIMEOUT;

    let socket = UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| Error::TrackerUnreachable(format!("could not bind udp socket: {e}")))?;
    socket
        .connect(addr)
        .map_err(|e| Error::TrackerUnreachable(format!("could not reach {addr}: {e}")))?;
    socket
        .set_write_timeout(Some(EXCHANGE_TIMEOUT))
        .map_err(|e| Error::TrackerUnreachable(e.to_string()))?;

    let connect = ConnectRequest::new();
    let response = exchange(&socket, &connect.encode(), deadline)?;
    let response = ConnectResponse::parse(&response)?;
    if response.transaction_id != connect.transaction_id {
        return Err(Error::TrackerProtocol(format!(
            "expected transaction id {} but received {}",
            connect.transaction_id, response.transaction_id
        )));
    }
    if response.action != ACTION_CONNECT {
        return Err(Error::TrackerProtocol(format!(
            "expected action {ACTION_CONNECT} (connect) but received {}",
            response.action
        )));
    }

    let announce = AnnounceRequest::new(response.connection_id, info_hash, peer_id, left);
    let response = exchange(&socket, &announce.encode(), deadline)?;
    let response = AnnounceResponse::parse(&response)?;
    if response.transaction_id != announce.transaction_id {
        return Err(Error::TrackerProtocol(format!(
            "expected transaction id {} but received {}",
            announce.transaction_id, response.transaction_id
        )));
    }
    if response.action != ACTION_ANNOUNCE {
        return Err(Error::TrackerProtocol(format!(
            "expected action {ACTION_ANNOUNCE} (announce) but received {}",
            response.action
        )));
    }

    Ok((response.peers, response.interval as u64))
}

/// One request/response round, reading with whatever remains of the
/// overall deadline. Returns the bytes actually received.
fn exchange(socket: &UdpSocket, request: &[u8], deadline: Instant) -> Result<Vec<u8>> {
    socket
        .send(request)
        .map_err(|e| Error::TrackerUnreachable(format!("udp send failed: {e}")))?;

    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(Error::TrackerUnreachable("announce deadline expired".to_string()));
    }
    socket
        .set_read_timeout(Some(remaining))
        .map_err(|e| Error::TrackerUnreachable(e.to_string()))?;

    let mut buf = vec![0u8; 2048];
    let size = socket
        .recv(&mut buf)
        .map_err(|e| Error::TrackerUnreachable(format!("udp receive failed: {e}")))?;
    buf.truncate(size);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::thread;

    #[test]
    fn connect_request_layout() {
        let request = ConnectRequest::new();
        let buf = request.encode();

        assert_eq!(buf.len(), CONNECT_LEN);
        assert_eq!(&buf[0..8], &PROTOCOL_ID.to_be_bytes());
        assert_eq!(&buf[8..12], &[0, 0, 0, 0]);
        assert_eq!(&buf[12..16], &request.transaction_id.to_be_bytes());
    }

    #[test]
    fn announce_request_layout() {
        let info_hash = [0x11u8; 20];
        let peer_id = [0x22u8; 20];
        let request = AnnounceRequest::new(0x0123456789ABCDEF, info_hash, peer_id, 4096);
        let buf = request.encode();

        assert_eq!(buf.len(), ANNOUNCE_LEN);
        assert_eq!(&buf[0..8], &0x0123456789ABCDEFu64.to_be_bytes());
        assert_eq!(&buf[8..12], &[0, 0, 0, 1]);
        assert_eq!(&buf[12..16], &request.transaction_id.to_be_bytes());
        assert_eq!(&buf[16..36], &info_hash);
        assert_eq!(&buf[36..56], &peer_id);
        assert_eq!(&buf[56..64], &[0; 8]); // downloaded
        assert_eq!(&buf[64..72], &4096u64.to_be_bytes());
        assert_eq!(&buf[72..80], &[0; 8]); // uploaded
        assert_eq!(&buf[80..84], &[0; 4]); // event
        assert_eq!(&buf[84..88], &[0; 4]); // ip
        assert_eq!(&buf[88..92], &request.key.to_be_bytes());
        assert_eq!(&buf[92..96], &[0xFF; 4]); // num_want = -1
        assert_eq!(&buf[96..98], &[0, 0]); // port
    }

    #[test]
    fn short_responses_are_rejected() {
        assert!(matches!(
            ConnectResponse::parse(&[0; 15]).unwrap_err(),
            Error::TrackerProtocol(_)
        ));
        assert!(matches!(
            AnnounceResponse::parse(&[0; 19]).unwrap_err(),
            Error::TrackerProtocol(_)
        ));
    }

    /// Happy path against a scripted tracker: connect, announce, one peer.
    #[test]
    fn announce_against_mock_tracker() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 1024];

            let (n, client) = server.recv_from(&mut buf).unwrap();
            assert_eq!(n, CONNECT_LEN);
            assert_eq!(&buf[0..8], &PROTOCOL_ID.to_be_bytes());
            assert_eq!(&buf[8..12], &[0, 0, 0, 0]);

            let mut reply = Vec::new();
            reply.extend_from_slice(&[0, 0, 0, 0]);
            reply.extend_from_slice(&buf[12..16]);
            reply.extend_from_slice(&0xC0C0C0C0C0C0C0C0u64.to_be_bytes());
            server.send_to(&reply, client).unwrap();

            let (n, client) = server.recv_from(&mut buf).unwrap();
            assert_eq!(n, ANNOUNCE_LEN);
            assert_eq!(&buf[0..8], &0xC0C0C0C0C0C0C0C0u64.to_be_bytes());
            assert_eq!(&buf[8..12], &[0, 0, 0, 1]);
            assert_eq!(&buf[16..36], &[0x42u8; 20]);
            assert_eq!(&buf[92..96], &[0xFF; 4]);

            let mut reply = Vec::new();
            reply.extend_from_slice(&[0, 0, 0, 1]);
            reply.extend_from_slice(&buf[12..16]);
            reply.extend_from_slice(&1800u32.to_be_bytes());
            reply.extend_from_slice(&3u32.to_be_bytes()); // leechers
            reply.extend_from_slice(&7u32.to_be_bytes()); // seeders
            reply.extend_from_slice(&[192, 168, 1, 2, 0x1A, 0xE1]);
            server.send_to(&reply, client).unwrap();
        });

        let (peers, interval) =
            announce(&addr.to_string(), [0x42; 20], [0x43; 20], 1000).unwrap();

        assert_eq!(interval, 1800);
        assert_eq!(
            peers,
            vec![Peer {
                ip: Ipv4Addr::new(192, 168, 1, 2),
                port: 6881,
            }]
        );

        handle.join().unwrap();
    }

    /// A tracker echoing the wrong transaction ID must be rejected.
    #[test]
    fn announce_rejects_transaction_id_mismatch() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 1024];
            let (_, client) = server.recv_from(&mut buf).unwrap();

            let tid = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
            let mut reply = Vec::new();
            reply.extend_from_slice(&[0, 0, 0, 0]);
            reply.extend_from_slice(&tid.wrapping_add(1).to_be_bytes());
            reply.extend_from_slice(&[0; 8]);
            server.send_to(&reply, client).unwrap();
        });

        let err = announce(&addr.to_string(), [0x42; 20], [0x43; 20], 1000).unwrap_err();
        assert!(matches!(err, Error::TrackerProtocol(_)));

        handle.join().unwrap();
    }
}
