use super::barrier::{CompletionBarrier, SegmentOutcome};
use super::channel::{create_channel, SharedReceiver};
use super::download::{remove_unit, run_download_worker, unit_path, DownloadContext, UNIT_SUFFIX};
use super::process::{run_processing_worker, ProcessContext};
use super::PipelineError;
use crate::config::types::{AdvancePolicy, Config};
use crate::normalize::{NormalizedEvent, Normalizer};
use crate::sink::{Sink, SinkError};
use crate::source::{LogSource, RetryPolicy};
use crate::storage::CheckpointStore;
use crate::window::{segment_window, Segment, StartupAction, TimeWindow, WindowPlanner};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Source of "now" in Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Per-process tunables of the pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub zone: String,
    pub tmp_dir: PathBuf,
    pub max_segment: Duration,
    pub download_workers: usize,
    pub processing_workers: usize,
    pub output_buffer: usize,
    pub delete_after_processing: bool,
    pub tick_timeout: Option<Duration>,
    pub advance: AdvancePolicy,
    pub retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            zone: config.source.zone_tag.clone(),
            tmp_dir: config.workers.tmp_dir.clone(),
            max_segment: config.schedule.max_segment,
            download_workers: config.workers.download,
            processing_workers: config.workers.processing,
            output_buffer: config.workers.output_buffer,
            delete_after_processing: config.workers.delete_after_processing,
            tick_timeout: config.schedule.tick_timeout,
            advance: config.checkpoint.advance,
            retry: RetryPolicy::from_config(&config.source),
        }
    }
}

/// Summary of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub window: TimeWindow,
    pub segments: Vec<Segment>,
    pub outcomes: Vec<SegmentOutcome>,
    /// Events accepted by the sink
    pub events: u64,
    /// New `last_end_ts`, if the checkpoint moved
    pub advanced_to: Option<i64>,
    pub saved: bool,
    pub timed_out: bool,
}

impl TickReport {
    pub fn count(&self, outcome: SegmentOutcome) -> usize {
        self.outcomes.iter().filter(|o| **o == outcome).count()
    }
}

/// Runs the fetch, process and publish cycle once per period.
pub struct Orchestrator {
    settings: PipelineSettings,
    planner: WindowPlanner,
    checkpoint: Arc<CheckpointStore>,
    source: Arc<dyn LogSource>,
    normalizer: Arc<dyn Normalizer>,
    // only reached through `get_mut`; the lock keeps the orchestrator `Sync`
    sink: Mutex<Box<dyn Sink>>,
    clock: Arc<dyn Clock>,
    shutdown: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        settings: PipelineSettings,
        planner: WindowPlanner,
        checkpoint: Arc<CheckpointStore>,
        source: Arc<dyn LogSource>,
        normalizer: Arc<dyn Normalizer>,
        sink: Box<dyn Sink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            settings,
            planner,
            checkpoint,
            source,
            normalizer,
            sink: Mutex::new(sink),
            clock: Arc::new(SystemClock),
            shutdown,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn checkpoint(&self) -> &Arc<CheckpointStore> {
        &self.checkpoint
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Create the unit directory and delete units left behind by an
    /// interrupted run. Their ranges were never checkpointed, so they will
    /// be fetched again.
    pub async fn prepare(&self) -> Result<usize, PipelineError> {
        let dir = &self.settings.tmp_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PipelineError::io(dir, e))?;

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| PipelineError::io(dir, e))?;
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::io(dir, e))?
        {
            let path = entry.path();
            let is_unit = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(UNIT_SUFFIX));
            if !is_unit {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Could not delete leftover unit"),
            }
        }

        if removed > 0 {
            info!(count = removed, dir = %dir.display(), "Deleted leftover units from a previous run");
        }
        Ok(removed)
    }

    /// Run until shutdown is requested, then save the checkpoint one last time.
    pub async fn run(&mut self) -> Result<(), PipelineError> {
        self.prepare().await?;

        let now = self.clock.now();
        match self.planner.startup_action(now, &self.checkpoint.snapshot()) {
            StartupAction::FirstRun(window) => {
                info!(window = %window, "No checkpoint found, starting first run");
                self.run_tick(window).await;
            }
            StartupAction::CatchUp(window) => {
                info!(
                    window = %window,
                    last_end_ts = self.checkpoint.last_end_ts(),
                    "Checkpoint is stale, catching up"
                );
                self.run_tick(window).await;
            }
            StartupAction::Wait(delay) => {
                info!(
                    delay_secs = delay.as_secs(),
                    last_end_ts = self.checkpoint.last_end_ts(),
                    "Checkpoint is recent, waiting for the next window"
                );
                if self.sleep_or_shutdown(delay).await {
                    self.run_scheduled_tick().await;
                }
            }
        }

        let period = self.planner.period();
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown.clone();

        while !self.shutdown_requested() {
            let tick = tokio::select! {
                _ = interval.tick() => true,
                _ = shutdown.wait_for(|stop| *stop) => false,
            };
            if !tick {
                break;
            }
            self.run_scheduled_tick().await;
        }

        info!("Shutdown requested, saving checkpoint");
        if let Err(e) = self.checkpoint.save().await {
            error!(location = %self.checkpoint.location(), error = %e, "Final checkpoint save failed");
        }
        Ok(())
    }

    /// Run exactly one regular tick.
    pub async fn run_once(&mut self) -> Result<TickReport, PipelineError> {
        self.prepare().await?;
        let window = self
            .planner
            .next_window(self.clock.now(), &self.checkpoint.snapshot());
        Ok(self.run_tick(window).await)
    }

    async fn run_scheduled_tick(&mut self) -> TickReport {
        let window = self
            .planner
            .next_window(self.clock.now(), &self.checkpoint.snapshot());
        self.run_tick(window).await
    }

    /// Returns `false` if shutdown was requested before `delay` elapsed.
    async fn sleep_or_shutdown(&self, delay: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow_and_update() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = shutdown.wait_for(|stop| *stop) => false,
        }
    }

    /// Fetch, process and publish one window, then advance and save the
    /// checkpoint according to what was actually handled.
    pub async fn run_tick(&mut self, window: TimeWindow) -> TickReport {
        let started = Instant::now();
        self.checkpoint.update_last_request_ts(self.clock.now());

        if let Err(e) = tokio::fs::create_dir_all(&self.settings.tmp_dir).await {
            warn!(dir = %self.settings.tmp_dir.display(), error = %e, "Could not create unit directory");
        }

        let segments = segment_window(&window, self.settings.max_segment);
        let barrier = Arc::new(CompletionBarrier::new(segments.len()));
        info!(
            window_start = window.start,
            window_end = window.end,
            segments = segments.len(),
            "Tick started"
        );

        let (segment_tx, segment_rx) = create_channel(segments.len());
        for segment in &segments {
            // capacity equals the segment count, so this never waits
            if segment_tx.send(*segment).await.is_err() {
                break;
            }
        }
        drop(segment_tx);
        let segment_rx = SharedReceiver::new(segment_rx);

        let (ready_tx, ready_rx) = create_channel(segments.len());
        let ready_rx = SharedReceiver::new(ready_rx);
        let (event_tx, mut event_rx) = create_channel::<NormalizedEvent>(self.settings.output_buffer);

        let mut workers = JoinSet::new();
        let download_ctx = Arc::new(DownloadContext {
            source: self.source.clone(),
            zone: self.settings.zone.clone(),
            tmp_dir: self.settings.tmp_dir.clone(),
            retry: self.settings.retry,
        });
        for worker_id in 0..self.settings.download_workers.max(1) {
            workers.spawn(run_download_worker(
                worker_id,
                download_ctx.clone(),
                segment_rx.clone(),
                ready_tx.clone(),
                barrier.clone(),
                self.shutdown.clone(),
            ));
        }

        let process_ctx = Arc::new(ProcessContext {
            normalizer: self.normalizer.clone(),
            delete_after_processing: self.settings.delete_after_processing,
        });
        for worker_id in 0..self.settings.processing_workers.max(1) {
            workers.spawn(run_processing_worker(
                worker_id,
                process_ctx.clone(),
                ready_rx.clone(),
                event_tx.clone(),
                barrier.clone(),
                self.shutdown.clone(),
            ));
        }
        drop(ready_tx);
        drop(event_tx);

        {
            let barrier = barrier.clone();
            let ready_rx = ready_rx.clone();
            workers.spawn(async move {
                barrier.downloads_done().await;
                let expected = barrier.seal_processing();
                debug!(ready_units = expected, "Download stage complete");
                ready_rx.close();
            });
        }
        drop(ready_rx);

        let mut drain = EventDrain::new(self.sink.get_mut().as_mut());
        let completion = async {
            while let Some(event) = event_rx.recv().await {
                drain.publish(event).await;
            }
            barrier.processing_done().await;
        };
        let timed_out = match self.settings.tick_timeout {
            Some(limit) => tokio::time::timeout(limit, completion).await.is_err(),
            None => {
                completion.await;
                false
            }
        };

        if timed_out {
            warn!(
                window_start = window.start,
                window_end = window.end,
                "Tick timed out, aborting workers"
            );
            workers.abort_all();
            // blocked readers fail their next send instead of refilling the queue
            event_rx.close();
        }
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    error!(error = %e, "Pipeline task failed");
                }
            }
        }

        // every processed unit has already queued all of its events
        let outcomes = barrier.outcomes();
        Self::remove_unfinished_units(&self.settings, &segments, &outcomes).await;
        while let Ok(event) = event_rx.try_recv() {
            drain.publish(event).await;
        }
        drain.finish().await;
        let (events, sink_error) = (drain.published, drain.error);

        let advanced_to = self.advance_checkpoint(&window, &segments, &outcomes, events, sink_error.is_some());

        let saved = match self.checkpoint.save().await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    location = %self.checkpoint.location(),
                    error = %e,
                    "Checkpoint save failed, the window may be reprocessed after a restart"
                );
                false
            }
        };

        let report = TickReport {
            window,
            segments,
            outcomes,
            events,
            advanced_to,
            saved,
            timed_out,
        };
        info!(
            window_start = window.start,
            window_end = window.end,
            processed = report.count(SegmentOutcome::Processed),
            no_data = report.count(SegmentOutcome::NoData),
            download_failed = report.count(SegmentOutcome::DownloadFailed),
            process_failed = report.count(SegmentOutcome::ProcessFailed),
            skipped = report.count(SegmentOutcome::Skipped),
            events = events,
            last_end_ts = self.checkpoint.last_end_ts(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tick finished"
        );
        report
    }

    /// Delete the units of segments that never reached a processing outcome.
    ///
    /// Aborting a worker does not stop its blocking reader, so the worker's
    /// own cleanup never runs for these.
    async fn remove_unfinished_units(settings: &PipelineSettings, segments: &[Segment], outcomes: &[SegmentOutcome]) {
        for (segment, outcome) in segments.iter().zip(outcomes) {
            if matches!(outcome, SegmentOutcome::Pending | SegmentOutcome::Skipped) {
                remove_unit(&unit_path(&settings.tmp_dir, &settings.zone, segment)).await;
            }
        }
    }

    fn advance_checkpoint(
        &self,
        window: &TimeWindow,
        segments: &[Segment],
        outcomes: &[SegmentOutcome],
        events: u64,
        sink_failed: bool,
    ) -> Option<i64> {
        let target = if sink_failed {
            warn!("Sink failed during the tick, checkpoint not advanced");
            None
        } else {
            advance_target(self.settings.advance, window, segments, outcomes)
        };

        if let Some(end) = target {
            return match self.checkpoint.advance(window.start, end, events) {
                Ok(checkpoint) => Some(checkpoint.last_end_ts),
                Err(e) => {
                    error!(error = %e, "Checkpoint not advanced");
                    None
                }
            };
        }

        if self.checkpoint.snapshot().is_fresh() {
            // keep retrying this window instead of sliding forward with the clock
            let pin = window.start - 1;
            if let Err(e) = self.checkpoint.advance(pin, pin, 0) {
                error!(error = %e, "Could not pin first-run checkpoint");
            } else {
                info!(last_end_ts = pin, "Nothing covered on first run, checkpoint pinned to window start");
            }
        } else {
            warn!(
                window_start = window.start,
                last_end_ts = self.checkpoint.last_end_ts(),
                "First segment not covered, checkpoint unchanged"
            );
        }
        None
    }
}

/// End of the range the checkpoint may move to after a tick, if any.
///
/// `Contiguous` stops at the first segment that was not processed or empty;
/// `Window` always covers the whole window.
pub fn advance_target(
    policy: AdvancePolicy,
    window: &TimeWindow,
    segments: &[Segment],
    outcomes: &[SegmentOutcome],
) -> Option<i64> {
    match policy {
        AdvancePolicy::Window => Some(window.end),
        AdvancePolicy::Contiguous => segments
            .iter()
            .zip(outcomes)
            .take_while(|(_, outcome)| outcome.is_covered())
            .last()
            .map(|(segment, _)| segment.request_range().1),
    }
}

/// Forwards events to the sink, discarding the rest of the tick after the
/// first sink error so workers are never left blocked on a full queue.
struct EventDrain<'a> {
    sink: &'a mut dyn Sink,
    published: u64,
    error: Option<SinkError>,
}

impl<'a> EventDrain<'a> {
    fn new(sink: &'a mut dyn Sink) -> Self {
        Self {
            sink,
            published: 0,
            error: None,
        }
    }

    async fn publish(&mut self, event: NormalizedEvent) {
        if self.error.is_some() {
            return;
        }
        match self.sink.publish(&event).await {
            Ok(()) => self.published += 1,
            Err(e) => {
                error!(error = %e, "Sink rejected event, discarding the rest of this tick");
                self.error = Some(e);
            }
        }
    }

    async fn finish(&mut self) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.sink.flush().await {
            error!(error = %e, "Sink flush failed");
            self.error = Some(e);
        }
    }
}
