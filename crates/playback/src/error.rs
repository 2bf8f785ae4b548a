use std::path::PathBuf;

use rp_common::DemuxError;
use thiserror::Error;

/// Recoverable playback failures. Contract violations panic instead.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("failed to open capture: {0}")]
    Open(#[from] DemuxError),

    #[error("failed to spawn playback thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),
}
