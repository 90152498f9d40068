use super::barrier::{CompletionBarrier, DownloadOutcome, ProcessOutcome};
use super::channel::{Sender, SharedReceiver};
use crate::source::{LogSource, RetryPolicy, SourceError};
use crate::window::Segment;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Suffix of files holding downloaded segments
pub const UNIT_SUFFIX: &str = ".log.gz";

/// A downloaded segment waiting to be processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyUnit {
    pub segment: Segment,
    pub path: PathBuf,
}

impl ReadyUnit {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// `{tmp_dir}/{zone}-{start}-{end}.log.gz`, using the requested range
pub fn unit_path(tmp_dir: &Path, zone: &str, segment: &Segment) -> PathBuf {
    let (start, end) = segment.request_range();
    tmp_dir.join(format!("{zone}-{start}-{end}{UNIT_SUFFIX}"))
}

pub struct DownloadContext {
    pub source: Arc<dyn LogSource>,
    pub zone: String,
    pub tmp_dir: PathBuf,
    pub retry: RetryPolicy,
}

/// Pull segments until the queue is closed and drained.
///
/// Every dequeued segment gets exactly one download outcome. A ready unit is
/// recorded before it becomes visible to processing workers, using a
/// reserved slot so the processing queue cannot close in between.
pub async fn run_download_worker(
    worker_id: usize,
    ctx: Arc<DownloadContext>,
    segments: SharedReceiver<Segment>,
    ready: Sender<ReadyUnit>,
    barrier: Arc<CompletionBarrier>,
    shutdown: watch::Receiver<bool>,
) {
    while let Some(segment) = segments.recv().await {
        if *shutdown.borrow() {
            debug!(worker = worker_id, segment = segment.index, "Shutdown requested, skipping segment");
            barrier.record_download(segment.index, DownloadOutcome::Skipped);
            continue;
        }

        let (start, end) = segment.request_range();
        info!(
            worker = worker_id,
            segment = segment.index,
            start = start,
            end = end,
            "Downloading segment"
        );
        let started = Instant::now();

        match download_segment(&ctx, &segment).await {
            Ok((unit, bytes)) => {
                info!(
                    worker = worker_id,
                    segment = segment.index,
                    bytes = bytes,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Segment downloaded"
                );
                match ready.reserve().await {
                    Ok(permit) => {
                        barrier.record_download(segment.index, DownloadOutcome::Ready);
                        permit.send(unit);
                    }
                    Err(_) => {
                        // processing side is gone; the tick is being torn down
                        warn!(segment = segment.index, "Processing queue closed, dropping unit");
                        remove_unit(&unit.path).await;
                        barrier.record_download(segment.index, DownloadOutcome::Ready);
                        barrier.record_process(segment.index, ProcessOutcome::Abandoned);
                    }
                }
            }
            Err(SourceError::NoData) => {
                info!(segment = segment.index, start = start, end = end, "No data for segment");
                barrier.record_download(segment.index, DownloadOutcome::NoData);
            }
            Err(e) => {
                error!(
                    segment = segment.index,
                    start = start,
                    end = end,
                    error = %e,
                    "Segment download failed, dropping segment"
                );
                barrier.record_download(segment.index, DownloadOutcome::Failed);
            }
        }
    }

    debug!(worker = worker_id, "Download worker finished");
}

async fn download_segment(
    ctx: &DownloadContext,
    segment: &Segment,
) -> Result<(ReadyUnit, u64), SourceError> {
    let (start, end) = segment.request_range();
    let path = unit_path(&ctx.tmp_dir, &ctx.zone, segment);
    let label = segment.index.to_string();

    let source = ctx.source.as_ref();
    let zone = ctx.zone.as_str();
    let target = path.as_path();
    let bytes = ctx
        .retry
        .run(&label, move || async move {
            let mut stream = source.fetch(zone, start, end).await?;
            store_stream(&mut stream, target).await
        })
        .await?;

    Ok((
        ReadyUnit {
            segment: *segment,
            path,
        },
        bytes,
    ))
}

/// Copy a response body to `path`. An empty body is reported as
/// [`SourceError::NoData`] and leaves no file behind.
async fn store_stream(
    stream: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
    path: &Path,
) -> Result<u64, SourceError> {
    let mut file = tokio::fs::File::create(path).await?;
    let copied = tokio::io::copy(stream, &mut file).await;
    let flushed = file.flush().await;
    drop(file);

    match (copied, flushed) {
        (Ok(0), Ok(())) => {
            remove_unit(path).await;
            Err(SourceError::NoData)
        }
        (Ok(n), Ok(())) => Ok(n),
        (Err(e), _) | (_, Err(e)) => {
            remove_unit(path).await;
            Err(SourceError::Io(e))
        }
    }
}

pub(crate) async fn remove_unit(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Could not delete unit file");
        }
    }
}
