/// End-to-end tests for one orchestrator tick against in-memory collaborators:
/// a scripted log source, a collecting sink and a disk checkpoint.
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use logpull::config::types::AdvancePolicy;
use logpull::normalize::{CloudflareNormalizer, NormalizedEvent};
use logpull::pipeline::{Clock, Orchestrator, PipelineSettings, SegmentOutcome};
use logpull::sink::{Sink, SinkError};
use logpull::source::{ByteStream, LogSource, RetryPolicy, SourceError};
use logpull::storage::{CheckpointStore, DiskStorage, Storage, StorageError};
use logpull::window::{TimeWindow, WindowPlanner};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

const NOW: i64 = 1_700_000_000;
const PERIOD: Duration = Duration::from_secs(300);
const SAFETY_LAG: Duration = Duration::from_secs(1800);

struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        NOW
    }
}

#[derive(Clone, Copy)]
enum Reply {
    Gzip,
    Plain,
    Empty,
    Status(u16),
    /// Fails with a server error this many times, then succeeds
    Flaky(u32),
    Hang,
}

/// Serves one record per requested second; the reply kind is chosen per
/// segment start, defaulting to gzip.
#[derive(Default)]
struct ScriptedSource {
    replies: HashMap<i64, Reply>,
    attempts: Mutex<HashMap<i64, u32>>,
    calls: AtomicU32,
}

impl ScriptedSource {
    fn with(replies: &[(i64, Reply)]) -> Self {
        Self {
            replies: replies.iter().copied().collect(),
            ..Default::default()
        }
    }

    fn attempts(&self, start: i64) -> u32 {
        self.attempts.lock().unwrap().get(&start).copied().unwrap_or(0)
    }
}

fn records(start: i64, end: i64) -> Vec<u8> {
    (start..=end)
        .map(|ts| {
            format!(
                "{{\"timestamp\":{},\"rayId\":\"ray-{ts}\",\"clientRequest\":{{\"httpHost\":\"example.com\",\"unknownField\":1}}}}\n",
                ts * 1_000_000_000
            )
        })
        .collect::<String>()
        .into_bytes()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

#[async_trait]
impl LogSource for ScriptedSource {
    async fn fetch(&self, _zone: &str, start: i64, end: i64) -> Result<ByteStream, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(start).or_insert(0);
            *entry += 1;
            *entry
        };

        let body = match self.replies.get(&start).copied().unwrap_or(Reply::Gzip) {
            Reply::Gzip => gzip(&records(start, end)),
            Reply::Plain => records(start, end),
            Reply::Empty => Vec::new(),
            Reply::Status(status) => {
                return Err(SourceError::Status {
                    status,
                    body: "rejected".to_string(),
                })
            }
            Reply::Flaky(failures) if attempt <= failures => {
                return Err(SourceError::Status {
                    status: 503,
                    body: "busy".to_string(),
                })
            }
            Reply::Flaky(_) => gzip(&records(start, end)),
            Reply::Hang => std::future::pending().await,
        };
        Ok(Box::new(std::io::Cursor::new(body)))
    }
}

#[derive(Clone, Default)]
struct CollectingSink {
    events: Arc<Mutex<Vec<NormalizedEvent>>>,
    fail: bool,
}

impl CollectingSink {
    fn ray_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.fields.get("rayId").and_then(|v| v.as_str()).map(String::from))
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl Sink for CollectingSink {
    async fn publish(&mut self, event: &NormalizedEvent) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Io(std::io::Error::other("downstream unavailable")));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Disk storage whose writes can be made to fail, standing in for a
/// process killed before its checkpoint reached the backend.
struct UnreliableStorage {
    inner: DiskStorage,
    fail_writes: AtomicBool,
}

#[async_trait]
impl Storage for UnreliableStorage {
    fn location(&self) -> String {
        self.inner.location()
    }

    async fn read_checkpoint(&self) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.read_checkpoint().await
    }

    async fn write_checkpoint(&self, bytes: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::ObjectStore("connection reset".to_string()));
        }
        self.inner.write_checkpoint(bytes).await
    }
}

fn settings(tmp_dir: &Path, advance: AdvancePolicy) -> PipelineSettings {
    PipelineSettings {
        zone: "zone".to_string(),
        tmp_dir: tmp_dir.to_path_buf(),
        max_segment: Duration::from_secs(120),
        download_workers: 4,
        processing_workers: 3,
        output_buffer: 16,
        delete_after_processing: true,
        tick_timeout: None,
        advance,
        retry: RetryPolicy::none(),
    }
}

fn orchestrator(
    settings: PipelineSettings,
    checkpoint: Arc<CheckpointStore>,
    source: Arc<ScriptedSource>,
    sink: CollectingSink,
    shutdown: watch::Receiver<bool>,
) -> Orchestrator {
    Orchestrator::new(
        settings,
        WindowPlanner::new(PERIOD, SAFETY_LAG),
        checkpoint,
        source,
        Arc::new(CloudflareNormalizer::new()),
        Box::new(sink),
        shutdown,
    )
    .with_clock(Arc::new(FixedClock))
}

async fn disk_checkpoint(dir: &Path) -> Arc<CheckpointStore> {
    let storage = Arc::new(DiskStorage::new(dir, "logpull", "zone"));
    Arc::new(CheckpointStore::open(storage).await.unwrap())
}

fn expected_rays(start: i64, end: i64) -> Vec<String> {
    let mut ids: Vec<String> = (start..=end).map(|ts| format!("ray-{ts}")).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_first_run_tick_covers_window_and_persists_checkpoint() {
    let dir = TempDir::new().unwrap();
    let checkpoint = disk_checkpoint(dir.path()).await;
    // first window is [1_699_997_900, 1_699_998_200]; mix gzip, plain and empty bodies
    let source = Arc::new(ScriptedSource::with(&[
        (1_699_998_020, Reply::Plain),
        (1_699_998_140, Reply::Empty),
    ]));
    let sink = CollectingSink::default();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut orchestrator = orchestrator(
        settings(&dir.path().join("units"), AdvancePolicy::Contiguous),
        checkpoint.clone(),
        source.clone(),
        sink.clone(),
        shutdown_rx,
    );

    let report = orchestrator.run_once().await.unwrap();
    assert_eq!(report.window, TimeWindow::new(1_699_997_900, 1_699_998_200));
    assert_eq!(
        report.outcomes,
        vec![
            SegmentOutcome::Processed,
            SegmentOutcome::Processed,
            SegmentOutcome::NoData
        ]
    );
    assert_eq!(report.advanced_to, Some(1_699_998_200));
    assert!(report.saved);

    // the empty segment [1_699_998_140, 1_699_998_200] contributes nothing
    assert_eq!(report.events, 240);
    assert_eq!(sink.ray_ids(), expected_rays(1_699_997_900, 1_699_998_139));

    let events = sink.events.lock().unwrap();
    let event = &events[0];
    assert_eq!(event.record_type, "cloudflare");
    assert!(event
        .log_file
        .as_deref()
        .is_some_and(|name| name.starts_with("zone-") && name.ends_with(".log.gz")));
    assert_eq!(event.fields["clientRequest"]["httpHost"], "example.com");
    assert!(event.fields["clientRequest"].get("unknownField").is_none());
    drop(events);

    let stored: serde_json::Value = serde_json::from_slice(
        &std::fs::read(dir.path().join("logpull-zone.state")).unwrap(),
    )
    .unwrap();
    assert_eq!(stored["last_start_ts"], 1_699_997_900);
    assert_eq!(stored["last_end_ts"], 1_699_998_200);
    assert_eq!(stored["last_count"], 240);
    assert_eq!(stored["last_request_ts"], NOW);

    let leftover = std::fs::read_dir(dir.path().join("units")).unwrap().count();
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn test_failed_segment_is_refetched_next_tick() {
    let dir = TempDir::new().unwrap();
    let checkpoint = disk_checkpoint(dir.path()).await;
    checkpoint.advance(0, 999, 0).unwrap();

    let source = Arc::new(ScriptedSource::with(&[(1120, Reply::Status(403))]));
    let sink = CollectingSink::default();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut orchestrator = orchestrator(
        settings(&dir.path().join("units"), AdvancePolicy::Contiguous),
        checkpoint.clone(),
        source.clone(),
        sink.clone(),
        shutdown_rx,
    );

    let first = orchestrator.run_once().await.unwrap();
    assert_eq!(first.window, TimeWindow::new(1000, 1300));
    assert_eq!(first.outcomes[1], SegmentOutcome::DownloadFailed);
    assert_eq!(checkpoint.last_end_ts(), 1119);

    // the next window starts at the failed segment, so nothing is lost
    let second = orchestrator.run_once().await.unwrap();
    assert_eq!(second.window.start, 1120);
    assert_eq!(source.attempts(1120), 2);
}

#[tokio::test]
async fn test_transient_errors_retried_before_giving_up() {
    let dir = TempDir::new().unwrap();
    let checkpoint = disk_checkpoint(dir.path()).await;
    checkpoint.advance(0, 999, 0).unwrap();

    let source = Arc::new(ScriptedSource::with(&[
        (1000, Reply::Flaky(2)),
        (1120, Reply::Flaky(5)),
    ]));
    let sink = CollectingSink::default();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut settings = settings(&dir.path().join("units"), AdvancePolicy::Contiguous);
    settings.retry = RetryPolicy::new(2, Duration::from_millis(1));
    let mut orchestrator = orchestrator(
        settings,
        checkpoint.clone(),
        source.clone(),
        sink.clone(),
        shutdown_rx,
    );

    let report = orchestrator.run_once().await.unwrap();
    assert_eq!(
        report.outcomes,
        vec![
            SegmentOutcome::Processed,
            SegmentOutcome::DownloadFailed,
            SegmentOutcome::Processed
        ]
    );
    assert_eq!(source.attempts(1000), 3);
    assert_eq!(source.attempts(1120), 3);
    assert_eq!(report.advanced_to, Some(1119));
}

#[tokio::test]
async fn test_crash_before_save_replays_window() {
    let dir = TempDir::new().unwrap();
    let state_dir = dir.path().join("state");
    let storage = Arc::new(UnreliableStorage {
        inner: DiskStorage::new(&state_dir, "logpull", "zone"),
        fail_writes: AtomicBool::new(false),
    });
    let checkpoint = Arc::new(CheckpointStore::open(storage.clone()).await.unwrap());
    checkpoint.advance(0, 999, 0).unwrap();
    checkpoint.save().await.unwrap();

    // every event is published but the checkpoint never reaches the backend
    storage.fail_writes.store(true, Ordering::SeqCst);
    let first_sink = CollectingSink::default();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut first = orchestrator(
        settings(&dir.path().join("units"), AdvancePolicy::Contiguous),
        checkpoint,
        Arc::new(ScriptedSource::default()),
        first_sink.clone(),
        shutdown_rx.clone(),
    );
    let report = first.run_once().await.unwrap();
    assert!(!report.saved);
    assert_eq!(first_sink.ray_ids(), expected_rays(1000, 1300));
    drop(first);

    // restart from what is actually stored
    let restarted = disk_checkpoint(&state_dir).await;
    assert_eq!(restarted.last_end_ts(), 999);
    let second_sink = CollectingSink::default();
    let mut second = orchestrator(
        settings(&dir.path().join("units"), AdvancePolicy::Contiguous),
        restarted.clone(),
        Arc::new(ScriptedSource::default()),
        second_sink.clone(),
        shutdown_rx,
    );
    let replay = second.run_once().await.unwrap();

    assert_eq!(replay.window, report.window);
    assert_eq!(second_sink.ray_ids(), first_sink.ray_ids());
    assert!(replay.saved);
    assert_eq!(restarted.last_end_ts(), 1300);
}

#[tokio::test]
async fn test_sink_failure_leaves_checkpoint_in_place() {
    let dir = TempDir::new().unwrap();
    let checkpoint = disk_checkpoint(dir.path()).await;
    checkpoint.advance(0, 999, 0).unwrap();

    let sink = CollectingSink {
        fail: true,
        ..Default::default()
    };
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut orchestrator = orchestrator(
        settings(&dir.path().join("units"), AdvancePolicy::Window),
        checkpoint.clone(),
        Arc::new(ScriptedSource::default()),
        sink,
        shutdown_rx,
    );

    let report = orchestrator.run_once().await.unwrap();
    assert_eq!(report.outcomes, vec![SegmentOutcome::Processed; 3]);
    assert_eq!(report.events, 0);
    assert_eq!(report.advanced_to, None);
    assert_eq!(checkpoint.last_end_ts(), 999);
}

#[tokio::test]
async fn test_tick_timeout_keeps_only_finished_prefix() {
    let dir = TempDir::new().unwrap();
    let checkpoint = disk_checkpoint(dir.path()).await;
    checkpoint.advance(0, 999, 0).unwrap();

    let source = Arc::new(ScriptedSource::with(&[(1120, Reply::Hang)]));
    let sink = CollectingSink::default();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut settings = settings(&dir.path().join("units"), AdvancePolicy::Contiguous);
    settings.tick_timeout = Some(Duration::from_secs(2));
    let mut orchestrator = orchestrator(
        settings,
        checkpoint.clone(),
        source,
        sink.clone(),
        shutdown_rx,
    );

    let report = orchestrator.run_once().await.unwrap();
    assert!(report.timed_out);
    assert_eq!(report.outcomes[0], SegmentOutcome::Processed);
    assert_eq!(report.outcomes[1], SegmentOutcome::Pending);
    assert_eq!(report.advanced_to, Some(1119));

    let rays: HashSet<String> = sink.ray_ids().into_iter().collect();
    assert!(expected_rays(1000, 1119).iter().all(|r| rays.contains(r)));
}

#[tokio::test]
async fn test_run_with_shutdown_requested_saves_and_returns() {
    let dir = TempDir::new().unwrap();
    let checkpoint = disk_checkpoint(dir.path()).await;
    let source = Arc::new(ScriptedSource::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(true);
    let mut orchestrator = orchestrator(
        settings(&dir.path().join("units"), AdvancePolicy::Contiguous),
        checkpoint.clone(),
        source.clone(),
        CollectingSink::default(),
        shutdown_rx,
    );

    orchestrator.run().await.unwrap();
    drop(shutdown_tx);

    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    // the first-run window was pinned so the next start retries it
    assert_eq!(checkpoint.last_end_ts(), 1_699_997_899);
    let stored = std::fs::read_to_string(dir.path().join("logpull-zone.state")).unwrap();
    assert!(stored.contains("1699997899"));
}
