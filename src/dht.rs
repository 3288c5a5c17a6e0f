//! DHT peer discovery.
//!
//! A thin façade over the `mainline` DHT crate: bootstrap a client node,
//! then periodically look up peers announcing our infohash and forward
//! every endpoint into the shared peers channel. All routing, transactions
//! and node bookkeeping stay inside the library; this module owns no DHT
//! protocol logic.
//!
//! The DHT is one of two independent discovery sources. If it cannot
//! start, the download carries on with tracker peers alone.

use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use mainline::{Dht, Id};

use crate::peer::Peer;

// Pause between successive get_peers sweeps.
const LOOKUP_INTERVAL: Duration = Duration::from_secs(5);

/// Start a background thread that keeps querying the DHT for peers on
/// `info_hash`, forwarding them to `peers_tx` until the receiving side
/// hangs up.
pub fn spawn_peer_search(info_hash: [u8; 20], peers_tx: Sender<Peer>) {
    thread::spawn(move || {
        let dht = match Dht::client() {
            Ok(dht) => dht,
            Err(e) => {
                warn!("dht unavailable, relying on trackers: {e}");
                return;
            }
        };

        info!("dht bootstrapped, searching for peers");

        loop {
            for addrs in dht.get_peers(Id::from(info_hash)) {
                for addr in addrs {
                    if peers_tx.send(Peer::from(addr)).is_err() {
                        return;
                    }
                }
            }
            thread::sleep(LOOKUP_INTERVAL);
        }
    });
}
