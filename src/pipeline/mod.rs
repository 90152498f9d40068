pub mod barrier;
pub mod channel;
pub mod download;
pub mod process;
pub mod runner;

pub use barrier::{CompletionBarrier, DownloadOutcome, ProcessOutcome, SegmentOutcome, StageBarrier};
pub use channel::{create_channel, Receiver, Sender, SharedReceiver};
pub use download::{ReadyUnit, UNIT_SUFFIX};
pub use runner::{Clock, Orchestrator, PipelineSettings, SystemClock, TickReport};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during pipeline operation
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read unit: {0}")]
    Read(#[from] std::io::Error),

    #[error("event output queue closed")]
    OutputClosed,
}

impl PipelineError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
