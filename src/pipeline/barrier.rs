use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// How the download stage resolved one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Stored as a ready unit and queued for processing
    Ready,
    /// The provider had no records for the range
    NoData,
    /// Gave up after retries
    Failed,
    /// Not attempted because shutdown was requested
    Skipped,
}

/// How the processing stage resolved one ready unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Every line was read (malformed lines excluded)
    Processed,
    /// The unit could not be opened or read to the end
    Failed,
    /// Not attempted because shutdown was requested
    Abandoned,
}

/// Final disposition of a segment once both stages have spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    Processed,
    NoData,
    DownloadFailed,
    ProcessFailed,
    Skipped,
    /// Still in flight when the tick stopped waiting
    Pending,
}

impl SegmentOutcome {
    /// Whether the segment's range can be considered handled
    pub fn is_covered(self) -> bool {
        matches!(self, Self::Processed | Self::NoData)
    }
}

#[derive(Debug, Clone, Copy)]
struct StageState {
    expected: Option<usize>,
    arrived: usize,
}

impl StageState {
    fn is_complete(&self) -> bool {
        self.expected.is_some_and(|expected| self.arrived >= expected)
    }
}

/// Countdown that completes once `expected` arrivals have been recorded.
///
/// The expected count may be supplied later with [`seal`](Self::seal); an
/// unsealed barrier never completes.
#[derive(Debug)]
pub struct StageBarrier {
    state: watch::Sender<StageState>,
}

impl StageBarrier {
    pub fn new(expected: usize) -> Self {
        Self::with_expected(Some(expected))
    }

    pub fn unsealed() -> Self {
        Self::with_expected(None)
    }

    fn with_expected(expected: Option<usize>) -> Self {
        let (state, _) = watch::channel(StageState {
            expected,
            arrived: 0,
        });
        Self { state }
    }

    pub fn seal(&self, expected: usize) {
        self.state.send_modify(|s| s.expected = Some(expected));
    }

    pub fn arrive(&self) {
        self.state.send_modify(|s| s.arrived += 1);
    }

    pub fn arrived(&self) -> usize {
        self.state.borrow().arrived
    }

    pub fn is_complete(&self) -> bool {
        self.state.borrow().is_complete()
    }

    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // the sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(StageState::is_complete).await;
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct LedgerEntry {
    download: Option<DownloadOutcome>,
    process: Option<ProcessOutcome>,
}

impl LedgerEntry {
    fn outcome(&self) -> SegmentOutcome {
        match (self.download, self.process) {
            (None, _) => SegmentOutcome::Pending,
            (Some(DownloadOutcome::NoData), _) => SegmentOutcome::NoData,
            (Some(DownloadOutcome::Failed), _) => SegmentOutcome::DownloadFailed,
            (Some(DownloadOutcome::Skipped), _) => SegmentOutcome::Skipped,
            (Some(DownloadOutcome::Ready), None) => SegmentOutcome::Pending,
            (Some(DownloadOutcome::Ready), Some(ProcessOutcome::Processed)) => {
                SegmentOutcome::Processed
            }
            (Some(DownloadOutcome::Ready), Some(ProcessOutcome::Failed)) => {
                SegmentOutcome::ProcessFailed
            }
            (Some(DownloadOutcome::Ready), Some(ProcessOutcome::Abandoned)) => {
                SegmentOutcome::Skipped
            }
        }
    }
}

/// Two-stage completion tracking for one tick.
///
/// The download stage expects one outcome per segment. Once it completes the
/// processing stage is sealed with the number of segments that produced a
/// ready unit, and completes when each of those has a processing outcome.
/// A per-segment ledger rejects a second outcome for the same stage so no
/// segment is counted twice.
#[derive(Debug)]
pub struct CompletionBarrier {
    download: StageBarrier,
    processing: StageBarrier,
    ledger: Mutex<Vec<LedgerEntry>>,
}

impl CompletionBarrier {
    pub fn new(segment_count: usize) -> Self {
        Self {
            download: StageBarrier::new(segment_count),
            processing: StageBarrier::unsealed(),
            ledger: Mutex::new(vec![LedgerEntry::default(); segment_count]),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Vec<LedgerEntry>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn segment_count(&self) -> usize {
        self.ledger().len()
    }

    /// Record the download stage's outcome. Returns `false`, changing
    /// nothing, if the segment is unknown or already resolved.
    pub fn record_download(&self, index: usize, outcome: DownloadOutcome) -> bool {
        {
            let mut ledger = self.ledger();
            match ledger.get_mut(index) {
                Some(entry) if entry.download.is_none() => entry.download = Some(outcome),
                _ => {
                    tracing::warn!(segment = index, ?outcome, "Ignoring duplicate download outcome");
                    return false;
                }
            }
        }
        self.download.arrive();
        true
    }

    /// Record the processing stage's outcome for a segment whose download
    /// produced a ready unit.
    pub fn record_process(&self, index: usize, outcome: ProcessOutcome) -> bool {
        {
            let mut ledger = self.ledger();
            match ledger.get_mut(index) {
                Some(entry)
                    if entry.download == Some(DownloadOutcome::Ready) && entry.process.is_none() =>
                {
                    entry.process = Some(outcome)
                }
                _ => {
                    tracing::warn!(segment = index, ?outcome, "Ignoring unexpected process outcome");
                    return false;
                }
            }
        }
        self.processing.arrive();
        true
    }

    pub async fn downloads_done(&self) {
        self.download.wait().await
    }

    /// Fix the processing stage's expected count from the ready units
    /// recorded so far. Returns that count.
    pub fn seal_processing(&self) -> usize {
        let ready = self
            .ledger()
            .iter()
            .filter(|e| e.download == Some(DownloadOutcome::Ready))
            .count();
        self.processing.seal(ready);
        ready
    }

    pub async fn processing_done(&self) {
        self.processing.wait().await
    }

    pub fn is_complete(&self) -> bool {
        self.download.is_complete() && self.processing.is_complete()
    }

    /// Per-segment disposition, in segment order
    pub fn outcomes(&self) -> Vec<SegmentOutcome> {
        self.ledger().iter().map(LedgerEntry::outcome).collect()
    }
}
