//! Tracker peer discovery.
//!
//! The announce loop walks the torrent's tracker list in order and asks
//! each tracker for peers, dispatching on the URL scheme: plain HTTP(S)
//! GET announces, or the BEP-15 UDP protocol from [`crate::udp`]. The
//! first tracker that answers wins the round; it moves to the front of
//! the list, its peers go out on the peers channel, and the loop sleeps
//! for the interval the tracker asked for before announcing again. The
//! loop runs for the lifetime of the process.
//!
//! Every tracker failure is non-fatal: log it, try the next one.

use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use serde::Deserialize;
use serde_bytes::ByteBuf;
use url::Url;

use crate::error::{Error, Result};
use crate::peer::{unmarshal_compact, Peer};
use crate::udp;

const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bencoded body of an HTTP tracker response. `peers` is the compact
/// 6-bytes-per-peer string, `interval` the seconds until the next announce.
#[derive(Debug, Deserialize)]
struct HttpTrackerResponse {
    interval: u64,
    peers: ByteBuf,
}

/// Start the announce loop on its own thread.
pub fn spawn_announce_loop(
    trackers: Vec<String>,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    left: u64,
    peers_tx: Sender<Peer>,
) {
    thread::spawn(move || announce_loop(trackers, info_hash, peer_id, left, peers_tx));
}

fn announce_loop(
    mut trackers: Vec<String>,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    left: u64,
    peers_tx: Sender<Peer>,
) {
    let mut interval: u64 = 1;
    loop {
        if let Some((peers, next_interval)) =
            announce_round(&mut trackers, info_hash, peer_id, left)
        {
            info!(
                "tracker announced {} peers, next announce in {}s",
                peers.len(),
                next_interval
            );
            for peer in peers {
                if peers_tx.send(peer).is_err() {
                    return;
                }
            }
            // A zero interval from a misbehaving tracker would spin.
            interval = next_interval.max(1);
        }

        thread::sleep(Duration::from_secs(interval));
    }
}

/// Try each tracker in order; the first success moves to the front of the
/// list so the next round re-announces to the same tracker.
fn announce_round(
    trackers: &mut Vec<String>,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    left: u64,
) -> Option<(Vec<Peer>, u64)> {
    for i in 0..trackers.len() {
        match announce_one(&trackers[i], info_hash, peer_id, left) {
            Ok(response) => {
                let current = trackers.remove(i);
                trackers.insert(0, current);
                return Some(response);
            }
            Err(e) => debug!("tracker {}: {}", trackers[i], e),
        }
    }
    None
}

fn announce_one(
    announce: &str,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    left: u64,
) -> Result<(Vec<Peer>, u64)> {
    let url = Url::parse(announce)
        .map_err(|e| Error::TrackerUnreachable(format!("invalid announce url: {e}")))?;

    match url.scheme() {
        "http" | "https" => http_announce(announce, info_hash, peer_id, left),
        "udp" => {
            let host = url
                .host_str()
                .ok_or_else(|| Error::TrackerUnreachable("announce url has no host".to_string()))?;
            let port = url
                .port()
                .ok_or_else(|| Error::TrackerUnreachable("announce url has no port".to_string()))?;
            udp::announce(&format!("{host}:{port}"), info_hash, peer_id, left)
        }
        other => Err(Error::TrackerUnreachable(format!(
            "unsupported announce scheme {other}"
        ))),
    }
}

fn http_announce(
    announce: &str,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    left: u64,
) -> Result<(Vec<Peer>, u64)> {
    let url = build_announce_url(announce, &info_hash, &peer_id, left);

    let client = reqwest::blocking::Client::builder()
        .timeout(ANNOUNCE_TIMEOUT)
        .build()
        .map_err(|e| Error::TrackerUnreachable(e.to_string()))?;

    let body = client
        .get(&url)
        .send()
        .and_then(|response| response.bytes())
        .map_err(|e| Error::TrackerUnreachable(e.to_string()))?;

    let response: HttpTrackerResponse = serde_bencode::de::from_bytes(&body)
        .map_err(|e| Error::TrackerProtocol(format!("could not decode tracker response: {e}")))?;

    let peers = unmarshal_compact(&response.peers)?;
    Ok((peers, response.interval))
}

/// Append the announce query string, percent-encoding the two raw binary
/// parameters by hand; stock form encoders mangle arbitrary bytes.
fn build_announce_url(announce: &str, info_hash: &[u8], peer_id: &[u8], left: u64) -> String {
    let query = format!(
        "info_hash={}&peer_id={}&port=0&uploaded=0&downloaded=0&compact=1&left={}",
        percent_encode_binary(info_hash),
        percent_encode_binary(peer_id),
        left
    );

    let mut url = announce.to_string();
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(&query);
    url
}

/// Encode every byte as %XX.
fn percent_encode_binary(data: &[u8]) -> String {
    const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";
    let mut encoded = String::with_capacity(data.len() * 3);

    for &byte in data {
        encoded.push('%');
        encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        encoded.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
    }

    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_params_are_percent_encoded() {
        assert_eq!(percent_encode_binary(&[0x00, 0x1A, 0xFF]), "%00%1A%FF");
    }

    #[test]
    fn announce_url_carries_the_required_params() {
        let info_hash = [0x01u8; 20];
        let peer_id = [0x61u8; 20];
        let url = build_announce_url("http://tracker.example/announce", &info_hash, &peer_id, 12345);

        assert!(url.starts_with("http://tracker.example/announce?"));
        assert!(url.contains(&format!("info_hash={}", "%01".repeat(20))));
        assert!(url.contains(&format!("peer_id={}", "%61".repeat(20))));
        assert!(url.contains("port=0"));
        assert!(url.contains("uploaded=0"));
        assert!(url.contains("downloaded=0"));
        assert!(url.contains("compact=1"));
        assert!(url.contains("left=12345"));
    }

    #[test]
    fn announce_url_extends_an_existing_query() {
        let url = build_announce_url("http://tracker.example/announce?key=1", &[0u8; 20], &[0u8; 20], 1);
        assert!(url.starts_with("http://tracker.example/announce?key=1&info_hash="));
    }

    #[test]
    fn unsupported_scheme_is_skipped_as_unreachable() {
        let err = announce_one("wss://tracker.example/announce", [0; 20], [0; 20], 1).unwrap_err();
        assert!(matches!(err, Error::TrackerUnreachable(_)));
    }

    #[test]
    fn udp_url_without_port_is_rejected() {
        let err = announce_one("udp://tracker.example", [0; 20], [0; 20], 1).unwrap_err();
        assert!(matches!(err, Error::TrackerUnreachable(_)));
    }
}
