//! Per-peer download workers.
//!
//! Every discovered peer gets one worker thread. A worker connects,
//! establishes a session, then pulls piece tasks from the shared work
//! queue until the queue shuts down or the peer fails. For each task it
//! drives the piece download loop: pipelined block requests, bounded at
//! five outstanding requests, with the piece reassembled in memory and
//! hash-checked before it is reported back.
//!
//! Failure policy, from the task's point of view:
//!
//! - peer lacks the piece: task goes back to the queue, worker moves on
//! - hash mismatch: task goes back, the session is kept (the mismatch may
//!   be transient)
//! - I/O or protocol failure: task goes back and the worker exits,
//!   dropping the peer
//!
//! The worker re-queues its own task on every failure path, so the
//! supervisor never needs to track which worker holds which piece.

use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::peer::Peer;
use crate::piece::{PieceAttempt, PieceResult, PieceTask};
use crate::session::PeerSession;

// Maximum number of unanswered block requests on one session.
pub const MAX_PIPELINE: u32 = 5;

// Block size for piece requests; the final block of a piece may be smaller.
pub const MAX_BLOCK_SIZE: u32 = 16384;

// One whole-piece attempt must finish within this window.
const PIECE_DEADLINE: Duration = Duration::from_secs(30);

/// Downloads pieces from a single peer.
pub struct Worker {
    peer: Peer,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    work_tx: Sender<PieceTask>,
    work_rx: Receiver<PieceTask>,
    result_tx: Sender<PieceResult>,
    shutdown_rx: Receiver<()>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peer: Peer,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        work_tx: Sender<PieceTask>,
        work_rx: Receiver<PieceTask>,
        result_tx: Sender<PieceResult>,
        shutdown_rx: Receiver<()>,
    ) -> Worker {
        Worker {
            peer,
            info_hash,
            peer_id,
            work_tx,
            work_rx,
            result_tx,
            shutdown_rx,
        }
    }

    /// Run until the peer fails or the download completes. Consumes the
    /// worker; meant to be spawned on its own thread.
    pub fn run(self) {
        let mut session = match PeerSession::connect(self.peer, self.info_hash, self.peer_id) {
            Ok(session) => session,
            Err(e) => {
                debug!("peer {}: {}", self.peer, e);
                return;
            }
        };

        // Advertise willingness in both directions. We never actually
        // serve data, but peers expect the exchange.
        if session.send(&Message::Unchoke).is_err() {
            return;
        }
        if session.send(&Message::Interested).is_err() {
            return;
        }

        info!("peer {}: downloading", self.peer);

        loop {
            let task = select! {
                recv(self.work_rx) -> task => match task {
                    Ok(task) => task,
                    Err(_) => return,
                },
                recv(self.shutdown_rx) -> _ => return,
            };

            if !session.bitfield.has(task.index) {
                self.requeue(task);
                continue;
            }

            let data = match self.download_piece(&mut session, &task) {
                Ok(data) => data,
                Err(e) => {
                    debug!("peer {}: piece {}: {}", self.peer, task.index, e);
                    self.requeue(task);
                    return;
                }
            };

            if let Err(e) = verify_integrity(&task, &data) {
                warn!("peer {}: {}", self.peer, e);
                self.requeue(task);
                continue;
            }

            debug!("peer {}: piece {} verified", self.peer, task.index);

            // Best effort; a dead socket will fail the next piece anyway.
            if let Err(e) = session.send(&Message::Have(task.index)) {
                debug!("peer {}: could not send have: {}", self.peer, e);
            }

            let result = PieceResult {
                index: task.index,
                data,
            };
            if self.result_tx.send(result).is_err() {
                return;
            }
        }
    }

    fn requeue(&self, task: PieceTask) {
        if self.work_tx.send(task).is_err() {
            error!("peer {}: could not return piece to the work queue", self.peer);
        }
    }

    /// Download one piece over an established session.
    ///
    /// Keeps up to [`MAX_PIPELINE`] block requests in flight while
    /// unchoked; while choked it still reads messages so unchoke and have
    /// notifications arrive. The whole attempt runs under one 30 second
    /// connection deadline, lifted again on success.
    fn download_piece(&self, session: &mut PeerSession, task: &PieceTask) -> Result<Vec<u8>> {
        session.set_deadline(Some(PIECE_DEADLINE))?;

        let mut attempt = PieceAttempt::new(task);
        while !attempt.is_complete() {
            if !session.choked {
                while attempt.in_flight < MAX_PIPELINE && attempt.requested < task.length {
                    let block_size = MAX_BLOCK_SIZE.min(task.length - attempt.requested);

                    session.send(&Message::Request {
                        index: task.index,
                        begin: attempt.requested,
                        length: block_size,
                    })?;
                    attempt.in_flight += 1;
                    attempt.requested += block_size;
                }
            }

            match session.read_message()? {
                None => {}
                Some(Message::Choke) => session.choked = true,
                Some(Message::Unchoke) => session.choked = false,
                Some(Message::Have(index)) => session.bitfield.set(index),
                Some(Message::Piece {
                    index,
                    begin,
                    block,
                }) => {
                    attempt.absorb(index, begin, &block)?;
                }
                Some(other) => {
                    trace!("peer {}: ignoring {}", self.peer, other.kind());
                }
            }
        }

        session.set_deadline(None)?;
        Ok(attempt.into_data())
    }
}

/// Check a completed piece against its expected hash.
fn verify_integrity(task: &PieceTask, data: &[u8]) -> Result<()> {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let hash: [u8; 20] = hasher.finalize().into();

    if hash != task.hash {
        return Err(Error::IntegrityFailure(task.index));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_matching_hash() {
        let data = vec![0x5A; 4096];
        let mut hasher = Sha1::new();
        hasher.update(&data);

        let task = PieceTask {
            index: 0,
            hash: hasher.finalize().into(),
            length: data.len() as u32,
        };

        assert!(verify_integrity(&task, &data).is_ok());
    }

    #[test]
    fn verify_rejects_corrupted_piece() {
        let data = vec![0x5A; 4096];
        let mut hasher = Sha1::new();
        hasher.update(&data);

        let task = PieceTask {
            index: 9,
            hash: hasher.finalize().into(),
            length: data.len() as u32,
        };

        let mut corrupted = data;
        corrupted[100] ^= 0xFF;

        let err = verify_integrity(&task, &corrupted).unwrap_err();
        assert!(matches!(err, Error::IntegrityFailure(9)));
    }
}
