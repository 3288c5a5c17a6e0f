//! Download supervision.
//!
//! [`Torrent`] wires the whole pipeline together and owns the three
//! shared channels:
//!
//! 1. **Peers stream**: unbounded; the tracker loop and the DHT search
//!    both produce endpoints, the dispatch thread consumes them.
//! 2. **Work queue**: bounded at the piece count; seeded once with every
//!    piece task, drained by workers, refilled by workers whose attempt
//!    failed. The capacity equals the total number of tasks, so a
//!    re-queue never blocks.
//! 3. **Assembly stream**: workers produce verified pieces, the
//!    supervisor copies each one into the output buffer at
//!    `index * piece_length`.
//!
//! The supervisor does not track individual workers. A worker that dies
//! re-queues its own task first, and fresh peers keep arriving, so the
//! queue drains eventually. When the last piece lands, dropping the
//! shutdown channel's sender tells every idle worker and the dispatcher
//! to exit; workers mid-piece notice after finishing their attempt.
//! Discovery loops run until the process exits.

use std::collections::HashSet;
use std::thread;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::config::Config;
use crate::dht;
use crate::metainfo::Metainfo;
use crate::peer::Peer;
use crate::piece::{PieceResult, PieceTask};
use crate::tracker;
use crate::worker::Worker;

/// A torrent being downloaded.
pub struct Torrent {
    metainfo: Metainfo,
    config: Config,
    peer_id: [u8; 20],
}

impl Torrent {
    /// Wrap a parsed metainfo for downloading. Generates this client's
    /// peer ID, fixed for the lifetime of the download.
    pub fn new(metainfo: Metainfo, config: Config) -> Torrent {
        Torrent {
            metainfo,
            config,
            peer_id: generate_peer_id(),
        }
    }

    /// Download the complete payload into memory.
    ///
    /// Blocks until every piece has been received and verified, then
    /// returns the assembled buffer of `total_length` bytes.
    pub fn download(&self) -> Result<Vec<u8>> {
        let piece_count = self.metainfo.piece_count();

        let (work_tx, work_rx) = bounded::<PieceTask>(piece_count);
        let (result_tx, result_rx) = unbounded::<PieceResult>();
        let (peers_tx, peers_rx) = unbounded::<Peer>();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        // Seed the queue with one task per piece.
        for (index, hash) in self.metainfo.piece_hashes.iter().enumerate() {
            let index = index as u32;
            let task = PieceTask {
                index,
                hash: *hash,
                length: self.metainfo.piece_size(index),
            };
            if work_tx.send(task).is_err() {
                return Err(anyhow!("could not seed the work queue"));
            }
        }

        self.start_discovery(peers_tx);
        self.start_dispatch(peers_rx, &work_tx, &work_rx, &result_tx, &shutdown_rx);

        // Assemble pieces as they arrive.
        let progress = self.progress_bar(piece_count);
        let mut output: Vec<u8> = vec![0; self.metainfo.total_length as usize];
        let mut completed = 0;
        while completed < piece_count {
            let result = result_rx
                .recv()
                .map_err(|_| anyhow!("assembly stream closed before the download finished"))?;

            let begin = self.metainfo.piece_offset(result.index) as usize;
            output[begin..begin + result.data.len()].copy_from_slice(&result.data);

            completed += 1;
            if let Some(bar) = &progress {
                bar.inc(1);
            }
        }

        if let Some(bar) = &progress {
            bar.finish();
        }

        // Closing the shutdown channel releases every waiting worker.
        drop(shutdown_tx);

        info!("download complete ({piece_count} pieces)");
        Ok(output)
    }

    /// Launch the configured peer discovery sources. Both feed the same
    /// channel; either alone is sufficient.
    fn start_discovery(&self, peers_tx: Sender<Peer>) {
        if self.config.use_trackers {
            if self.metainfo.trackers.is_empty() {
                warn!("torrent lists no trackers");
            } else {
                tracker::spawn_announce_loop(
                    self.metainfo.trackers.clone(),
                    self.metainfo.info_hash,
                    self.peer_id,
                    self.metainfo.total_length,
                    peers_tx.clone(),
                );
            }
        }

        if self.config.use_dht {
            dht::spawn_peer_search(self.metainfo.info_hash, peers_tx.clone());
        }
    }

    /// Launch the dispatch thread: one worker per newly seen endpoint.
    /// Trackers and the DHT re-report the same peers forever, so spawns
    /// are deduplicated by endpoint.
    fn start_dispatch(
        &self,
        peers_rx: Receiver<Peer>,
        work_tx: &Sender<PieceTask>,
        work_rx: &Receiver<PieceTask>,
        result_tx: &Sender<PieceResult>,
        shutdown_rx: &Receiver<()>,
    ) {
        let info_hash = self.metainfo.info_hash;
        let peer_id = self.peer_id;
        let work_tx = work_tx.clone();
        let work_rx = work_rx.clone();
        let result_tx = result_tx.clone();
        let shutdown_rx = shutdown_rx.clone();

        thread::spawn(move || {
            let mut seen: HashSet<Peer> = HashSet::new();
            loop {
                let peer = select! {
                    recv(peers_rx) -> peer => match peer {
                        Ok(peer) => peer,
                        Err(_) => return,
                    },
                    recv(shutdown_rx) -> _ => return,
                };

                if !seen.insert(peer) {
                    continue;
                }
                debug!("discovered peer {peer}");

                let worker = Worker::new(
                    peer,
                    info_hash,
                    peer_id,
                    work_tx.clone(),
                    work_rx.clone(),
                    result_tx.clone(),
                    shutdown_rx.clone(),
                );
                thread::spawn(move || worker.run());
            }
        });
    }

    fn progress_bar(&self, piece_count: usize) -> Option<ProgressBar> {
        if !self.config.show_progress {
            return None;
        }

        let bar = ProgressBar::new(piece_count as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {pos}/{len} pieces [{bar:40.cyan/blue}] {percent}% {elapsed}")
                .unwrap()
                .progress_chars("#>-"),
        );
        Some(bar)
    }
}

/// Generate the 20-byte peer ID for this process: random alphanumeric
/// characters, drawn once at startup.
fn generate_peer_id() -> [u8; 20] {
    let mut rng = rand::thread_rng();
    let mut id = [0u8; 20];
    for byte in id.iter_mut() {
        *byte = rng.sample(Alphanumeric);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_is_alphanumeric() {
        let id = generate_peer_id();
        assert_eq!(id.len(), 20);
        assert!(id.iter().all(|b| b.is_ascii_alphanumeric()));
    }

    #[test]
    fn peer_ids_differ_between_clients() {
        assert_ne!(generate_peer_id(), generate_peer_id());
    }
}
