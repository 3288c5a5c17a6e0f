//! # Riptide
//!
//! A command-line leeching BitTorrent client.
//!
//! Riptide parses a metainfo file, discovers peers through the torrent's
//! trackers (HTTP(S) and BEP-15 UDP) and the mainline DHT, downloads all
//! pieces from many peers in parallel with per-piece SHA-1 verification,
//! and writes the assembled payload to a single output file. It never
//! uploads.
//!
//! ## Usage
//!
//! ```bash
//! riptide <input.torrent> <output.file>
//! riptide --no-dht <input.torrent> <output.file>
//! ```
//!
//! ## Architecture
//!
//! - **Main thread**: parses arguments, loads the torrent, assembles
//!   finished pieces into the output buffer
//! - **Discovery threads**: tracker announce loop and DHT search, both
//!   feeding one peers channel
//! - **Worker threads**: one per discovered peer, pulling piece tasks
//!   from a shared queue and re-queueing them on failure

#[macro_use]
extern crate log;

mod bitfield;
mod config;
mod dht;
mod error;
mod handshake;
mod message;
mod metainfo;
mod peer;
mod piece;
mod session;
mod torrent;
mod tracker;
mod udp;
mod worker;

use std::fs;

use anyhow::{Context, Result};
use clap::Parser;

use config::Config;
use metainfo::Metainfo;
use torrent::Torrent;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A command-line leeching BitTorrent client, written in Rust."
)]
struct Args {
    /// Path to the .torrent file
    torrent: String,

    /// Path of the output file
    output: String,

    /// Disable tracker peer discovery
    #[arg(long)]
    no_trackers: bool,

    /// Disable DHT peer discovery
    #[arg(long)]
    no_dht: bool,

    /// Do not draw the progress bar
    #[arg(long)]
    quiet: bool,
}

fn run(args: Args) -> Result<()> {
    let config = Config::new(!args.no_trackers, !args.no_dht, !args.quiet)?;

    let buf = fs::read(&args.torrent)
        .with_context(|| format!("could not read torrent file '{}'", args.torrent))?;
    let metainfo = Metainfo::parse(&buf)?;

    println!(
        "Downloading {:?} ({} pieces)",
        metainfo.name,
        metainfo.piece_count()
    );

    let torrent = Torrent::new(metainfo, config);
    let data = torrent.download()?;

    fs::write(&args.output, &data)
        .with_context(|| format!("could not write output file '{}'", args.output))?;

    println!("Saved in {:?}.", args.output);
    Ok(())
}

fn main() {
    // Initialize logger
    pretty_env_logger::init_timed();

    // Parse arguments
    let args = Args::parse();

    // Run program, eventually exit failure
    if let Err(error) = run(args) {
        eprintln!("Error: {:#}", error);
        std::process::exit(1);
    }

    // Exit success
    std::process::exit(0);
}
