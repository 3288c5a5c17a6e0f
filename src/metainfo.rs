//! Metainfo (.torrent) parsing.
//!
//! A torrent file is a bencoded dictionary:
//!
//! - **announce**: tracker URL
//! - **announce-list**: optional tiers of tracker URLs
//! - **info**: piece length, concatenated 20-byte SHA-1 piece hashes, the
//!   payload name, and either a single `length` or a `files` list
//!
//! The infohash identifying the torrent is the SHA-1 of the bencoded
//! `info` dictionary. Re-encoding with serde_bencode reproduces the
//! on-disk bytes because bencode dictionaries are key-sorted; the optional
//! fields below (`private`, `source`, `files`, `path.utf-8`) are carried
//! so that torrents containing them re-encode byte-exactly too.

use serde::{Deserialize, Serialize};
use serde_bencode::{de, ser};
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

const SHA1_LEN: usize = 20;

/// Everything the downloader needs to know about a torrent, immutable
/// after parsing.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// Tracker URLs, one per tier, in tier order.
    pub trackers: Vec<String>,
    /// SHA-1 of the bencoded info dictionary.
    pub info_hash: [u8; 20],
    /// One SHA-1 per piece, in piece order.
    pub piece_hashes: Vec<[u8; 20]>,
    /// Size of every piece except possibly the last.
    pub piece_length: u32,
    /// Total payload size in bytes.
    pub total_length: u64,
    /// Suggested output filename.
    pub name: String,
}

#[derive(Deserialize)]
struct BencodeTorrent {
    #[serde(default)]
    announce: String,
    #[serde(rename = "announce-list", default)]
    announce_list: Vec<Vec<String>>,
    info: BencodeInfo,
}

#[derive(Deserialize, Serialize)]
struct BencodeInfo {
    #[serde(rename = "piece length")]
    piece_length: u32,
    pieces: ByteBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    private: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    files: Option<Vec<BencodeFile>>,
}

#[derive(Deserialize, Serialize)]
struct BencodeFile {
    length: u64,
    path: Vec<String>,
    #[serde(
        rename = "path.utf-8",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    path_utf8: Option<Vec<String>>,
}

impl BencodeInfo {
    /// Hash the bencoded info dictionary to identify the torrent.
    fn hash(&self) -> Result<[u8; 20]> {
        let buf = ser::to_bytes(self)
            .map_err(|e| Error::MetainfoInvalid(format!("could not encode info dictionary: {e}")))?;

        let mut hasher = Sha1::new();
        hasher.update(&buf);
        Ok(hasher.finalize().into())
    }

    /// Split the concatenated piece hashes into 20-byte chunks.
    fn split_piece_hashes(&self) -> Result<Vec<[u8; 20]>> {
        if self.pieces.len() % SHA1_LEN != 0 {
            return Err(Error::MetainfoInvalid(format!(
                "pieces has length {}, not a multiple of {}",
                self.pieces.len(),
                SHA1_LEN
            )));
        }

        let mut hashes = Vec::with_capacity(self.pieces.len() / SHA1_LEN);
        for chunk in self.pieces.chunks_exact(SHA1_LEN) {
            let mut hash = [0u8; SHA1_LEN];
            hash.copy_from_slice(chunk);
            hashes.push(hash);
        }

        Ok(hashes)
    }

    /// Payload size: the single file's length, or the sum over the file list.
    fn total_length(&self) -> Result<u64> {
        if let Some(files) = &self.files {
            return Ok(files.iter().map(|f| f.length).sum());
        }

        self.length
            .ok_or_else(|| Error::MetainfoInvalid("info has neither length nor files".to_string()))
    }
}

impl Metainfo {
    /// Parse the raw bytes of a .torrent file.
    pub fn parse(buf: &[u8]) -> Result<Metainfo> {
        let bencode: BencodeTorrent = de::from_bytes(buf)
            .map_err(|e| Error::MetainfoInvalid(format!("could not decode torrent: {e}")))?;

        let info_hash = bencode.info.hash()?;
        let piece_hashes = bencode.info.split_piece_hashes()?;
        let total_length = bencode.info.total_length()?;
        let trackers = flatten_tiers(&bencode);

        Ok(Metainfo {
            trackers,
            info_hash,
            piece_hashes,
            piece_length: bencode.info.piece_length,
            total_length,
            name: bencode.info.name,
        })
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Byte offset of piece `index` in the assembled payload.
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length as u64
    }

    /// Size of piece `index`; only the last piece may fall short of
    /// `piece_length`.
    pub fn piece_size(&self, index: u32) -> u32 {
        let begin = self.piece_offset(index);
        let end = (begin + self.piece_length as u64).min(self.total_length);
        (end - begin) as u32
    }
}

/// Flatten the announce tiers: the first URL of each tier, in tier order,
/// falling back to the single announce URL. A torrent may name no tracker
/// at all and still be downloadable over the DHT.
fn flatten_tiers(bencode: &BencodeTorrent) -> Vec<String> {
    if !bencode.announce_list.is_empty() {
        return bencode
            .announce_list
            .iter()
            .filter_map(|tier| tier.first().cloned())
            .collect();
    }

    if bencode.announce.is_empty() {
        return Vec::new();
    }
    vec![bencode.announce.clone()]
}
