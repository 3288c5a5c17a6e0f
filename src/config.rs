//! Process-wide configuration.
//!
//! Peer discovery runs over trackers and the DHT independently; either can
//! be switched off, but not both, since the client would then never learn
//! about a single peer.

use crate::error::{Error, Result};

/// Runtime switches, fixed before the download starts.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Announce to the torrent's trackers and consume their peer lists.
    pub use_trackers: bool,
    /// Look up peers for the infohash in the mainline DHT.
    pub use_dht: bool,
    /// Draw a progress bar while downloading.
    pub show_progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            use_trackers: true,
            use_dht: true,
            show_progress: true,
        }
    }
}

impl Config {
    /// Build a configuration, rejecting one with every discovery source disabled.
    pub fn new(use_trackers: bool, use_dht: bool, show_progress: bool) -> Result<Config> {
        if !use_trackers && !use_dht {
            return Err(Error::ConfigInvalid(
                "enable tracker or dht peer discovery".to_string(),
            ));
        }

        Ok(Config {
            use_trackers,
            use_dht,
            show_progress,
        })
    }
}
