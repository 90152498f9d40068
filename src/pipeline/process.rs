use super::barrier::{CompletionBarrier, ProcessOutcome};
use super::channel::{Sender, SharedReceiver};
use super::download::{remove_unit, ReadyUnit};
use super::PipelineError;
use crate::normalize::{NormalizedEvent, Normalizer, RawRecord};
use flate2::bufread::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub struct ProcessContext {
    pub normalizer: Arc<dyn Normalizer>,
    pub delete_after_processing: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UnitStats {
    pub events: u64,
    pub malformed: u64,
}

/// Consume ready units until the queue is closed and drained.
pub async fn run_processing_worker(
    worker_id: usize,
    ctx: Arc<ProcessContext>,
    units: SharedReceiver<ReadyUnit>,
    events: Sender<NormalizedEvent>,
    barrier: Arc<CompletionBarrier>,
    shutdown: watch::Receiver<bool>,
) {
    while let Some(unit) = units.recv().await {
        let index = unit.segment.index;
        if *shutdown.borrow() {
            // the tick deletes the file once every worker has stopped
            debug!(worker = worker_id, segment = index, "Shutdown requested, abandoning unit");
            barrier.record_process(index, ProcessOutcome::Abandoned);
            continue;
        }

        info!(worker = worker_id, segment = index, file = %unit.file_name(), "Processing unit");
        let started = Instant::now();

        let result = {
            let normalizer = ctx.normalizer.clone();
            let events = events.clone();
            let unit = unit.clone();
            tokio::task::spawn_blocking(move || process_unit(&unit, normalizer.as_ref(), &events))
                .await
        };

        let outcome = match result {
            Ok(Ok(stats)) => {
                info!(
                    worker = worker_id,
                    segment = index,
                    events = stats.events,
                    malformed = stats.malformed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Unit processed"
                );
                ProcessOutcome::Processed
            }
            Ok(Err(e)) => {
                error!(worker = worker_id, segment = index, error = %e, "Unit processing failed");
                ProcessOutcome::Failed
            }
            Err(e) => {
                error!(worker = worker_id, segment = index, error = %e, "Unit processing task failed");
                ProcessOutcome::Failed
            }
        };

        if outcome == ProcessOutcome::Failed || ctx.delete_after_processing {
            remove_unit(&unit.path).await;
        }
        barrier.record_process(index, outcome);
    }

    debug!(worker = worker_id, "Processing worker finished");
}

/// Read one unit line by line, pushing a normalized event for every line
/// that parses as a JSON object. Blocks on the output queue when it is full.
pub fn process_unit(
    unit: &ReadyUnit,
    normalizer: &dyn Normalizer,
    events: &Sender<NormalizedEvent>,
) -> Result<UnitStats, PipelineError> {
    let log_file = unit.file_name();
    let reader = open_unit(&unit.path)?;
    let mut stats = UnitStats::default();

    for line in reader.split(b'\n') {
        let line = line?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<RawRecord>(&line) {
            Ok(raw) => {
                let event = normalizer.normalize(&raw).with_log_file(log_file.as_str());
                events
                    .blocking_send(event)
                    .map_err(|_| PipelineError::OutputClosed)?;
                stats.events += 1;
            }
            Err(e) => {
                stats.malformed += 1;
                debug!(file = %log_file, error = %e, "Skipping malformed line");
            }
        }
    }

    Ok(stats)
}

/// Open a unit, decompressing when it starts with the gzip magic bytes
fn open_unit(path: &Path) -> Result<Box<dyn BufRead>, PipelineError> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let is_gzip = reader
        .fill_buf()
        .map_err(|e| PipelineError::io(path, e))?
        .starts_with(&GZIP_MAGIC);

    if is_gzip {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}
