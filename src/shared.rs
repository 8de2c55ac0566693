//! Thread-safe session handle
//!
//! Sensor callbacks, the UI and the sync path can all touch the session from
//! different threads. Every operation takes one lock, so commands are
//! serialized and each one sees the state left by the previous one. Side
//! effects run after the lock is released: snapshots and summaries go onto
//! the sync queue, and summaries are handed to a [`SummaryWriter`] whose
//! worker thread does the disk I/O.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};
use crate::models::{SessionStatus, WorkoutSummary};
use crate::session::{
    AdvanceOutcome, CancelOutcome, Sample, SampleDisposition, SegmentOutcome, SessionView,
    WorkoutSession,
};
use crate::shadow::ShadowReference;
use crate::sync::{SyncChannel, SyncSnapshot};

/// Receives the final summary exactly once per workout
pub trait SummarySink: Send + Sync {
    fn persist(&self, summary: &WorkoutSummary) -> Result<()>;
}

/// Writes each summary to `<dir>/<workout_id>.json`
#[derive(Debug, Clone)]
pub struct JsonSummaryStore {
    dir: PathBuf,
}

impl JsonSummaryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, summary: &WorkoutSummary) -> PathBuf {
        self.dir.join(format!("{}.json", summary.workout_id))
    }

    pub fn load(path: &Path) -> Result<WorkoutSummary> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl SummarySink for JsonSummaryStore {
    fn persist(&self, summary: &WorkoutSummary) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(summary);
        let json = serde_json::to_string_pretty(summary)?;
        fs::write(&path, json)?;
        info!(path = %path.display(), "Summary saved");
        Ok(())
    }
}

/// What the writer thread did before it exited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub persisted: usize,
    pub failed: usize,
}

/// Non-blocking hand-off of finished summaries to a [`SummarySink`]
///
/// `submit` only enqueues. A dedicated thread drains the queue into the sink
/// and exits once every handle is dropped.
#[derive(Debug, Clone)]
pub struct SummaryWriter {
    tx: mpsc::UnboundedSender<WorkoutSummary>,
}

impl SummaryWriter {
    pub fn spawn(sink: Arc<dyn SummarySink>) -> Result<(Self, JoinHandle<WriterStats>)> {
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkoutSummary>();
        let handle = thread::Builder::new()
            .name("summary-writer".to_string())
            .spawn(move || {
                let mut stats = WriterStats::default();
                while let Some(summary) = rx.blocking_recv() {
                    match sink.persist(&summary) {
                        Ok(()) => stats.persisted += 1,
                        Err(e) => {
                            stats.failed += 1;
                            error!(
                                workout_id = %summary.workout_id,
                                error = %e,
                                "Failed to persist workout summary"
                            );
                        }
                    }
                }
                debug!(
                    persisted = stats.persisted,
                    failed = stats.failed,
                    "Summary writer stopped"
                );
                stats
            })?;
        Ok((Self { tx }, handle))
    }

    pub fn submit(&self, summary: WorkoutSummary) -> Result<()> {
        self.tx
            .send(summary)
            .map_err(|_| EngineError::Persistence("summary writer has stopped".to_string()))
    }
}

/// Cloneable handle to one workout session
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<WorkoutSession>>,
    publisher: Option<SyncChannel>,
    writer: Option<SummaryWriter>,
}

/// Side effects collected under the lock, run after it is released
struct Effects {
    snapshot: Option<SyncSnapshot>,
    summary: Option<WorkoutSummary>,
}

impl SharedSession {
    pub fn new(session: WorkoutSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
            publisher: None,
            writer: None,
        }
    }

    /// Publish a snapshot to the peer after every accepted mutation
    pub fn with_publisher(mut self, channel: SyncChannel) -> Self {
        self.publisher = Some(channel);
        self
    }

    /// Hand the final summary to `writer` exactly once
    pub fn with_writer(mut self, writer: SummaryWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Run a read-only closure against the session
    pub fn read<R>(&self, f: impl FnOnce(&WorkoutSession) -> R) -> R {
        f(&self.lock())
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status()
    }

    pub fn view(&self, now: DateTime<Utc>) -> SessionView {
        self.lock().view(now)
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.lock().snapshot()
    }

    pub fn tick(&self, now: DateTime<Utc>) -> Result<u64> {
        self.mutate(|s| s.tick(now), |_| None)
    }

    pub fn record_sample(&self, sample: Sample) -> Result<SampleDisposition> {
        self.mutate(|s| s.record_sample(sample), |_| None)
    }

    pub fn pause(&self, now: DateTime<Utc>) -> Result<()> {
        self.mutate(|s| s.pause(now), |_| None)
    }

    pub fn resume(&self, now: DateTime<Utc>) -> Result<()> {
        self.mutate(|s| s.resume(now), |_| None)
    }

    pub fn complete_current_segment(&self, now: DateTime<Utc>) -> Result<SegmentOutcome> {
        self.mutate(
            |s| s.complete_current_segment(now),
            |outcome| match outcome {
                SegmentOutcome::WorkoutCompleted(summary) => Some(summary.clone()),
                _ => None,
            },
        )
    }

    pub fn start_next_segment(
        &self,
        shadow: Option<ShadowReference>,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome> {
        self.mutate(|s| s.start_next_segment(shadow, now), |_| None)
    }

    pub fn cancel(&self, now: DateTime<Utc>) -> Result<CancelOutcome> {
        self.mutate(
            |s| s.cancel(now),
            |outcome| match outcome {
                CancelOutcome::Cancelled { partial } => partial.clone(),
                CancelOutcome::Ignored => None,
            },
        )
    }

    fn lock(&self) -> MutexGuard<'_, WorkoutSession> {
        // A panic mid-operation leaves no half-applied state worth refusing.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut WorkoutSession) -> Result<T>,
        summary_of: impl FnOnce(&T) -> Option<WorkoutSummary>,
    ) -> Result<T> {
        let (result, effects) = {
            let mut session = self.lock();
            let before = session.sequence();
            let result = op(&mut *session)?;
            let snapshot = (session.sequence() != before).then(|| session.snapshot());
            let summary = summary_of(&result);
            (result, Effects { snapshot, summary })
        };
        self.dispatch(effects);
        Ok(result)
    }

    fn dispatch(&self, effects: Effects) {
        if let (Some(channel), Some(snapshot)) = (&self.publisher, effects.snapshot) {
            if let Err(e) = channel.publish(snapshot) {
                warn!(error = %e, "Snapshot not published");
            }
        }

        let summary = match effects.summary {
            Some(summary) => summary,
            None => return,
        };
        if let Some(writer) = &self.writer {
            if let Err(e) = writer.submit(summary.clone()) {
                error!(
                    workout_id = %summary.workout_id,
                    error = %e,
                    "Workout summary not queued for persistence"
                );
            }
        }
        if let Some(channel) = &self.publisher {
            if let Err(e) = channel.publish(summary) {
                warn!(error = %e, "Summary not published");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanBuilder;
    use crate::session::SessionSettings;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use std::time::{Duration as StdDuration, Instant};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingSink {
        summaries: Mutex<Vec<WorkoutSummary>>,
    }

    impl SummarySink for CountingSink {
        fn persist(&self, summary: &WorkoutSummary) -> Result<()> {
            self.summaries.lock().unwrap().push(summary.clone());
            Ok(())
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 7, 30, 0).unwrap() + Duration::seconds(secs)
    }

    fn shared() -> SharedSession {
        let plan = PlanBuilder::new()
            .run(Decimal::from(1000))
            .rest(60)
            .build()
            .unwrap();
        SharedSession::new(
            WorkoutSession::begin(plan, None, t(0), SessionSettings::default()).unwrap(),
        )
    }

    #[test]
    fn test_concurrent_samples_all_counted() {
        let session = shared();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let session = session.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        session.record_sample(Sample::Reps(1)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let reps = session.read(|s| s.live_metrics().unwrap().reps);
        assert_eq!(reps, 200);
    }

    /// Sink that takes a while, like a slow disk
    struct SlowSink {
        delay: StdDuration,
        inner: CountingSink,
    }

    impl SummarySink for SlowSink {
        fn persist(&self, summary: &WorkoutSummary) -> Result<()> {
            thread::sleep(self.delay);
            self.inner.persist(summary)
        }
    }

    #[test]
    fn test_racing_complete_and_cancel_hand_off_once() {
        let sink = Arc::new(CountingSink::default());
        let (writer, worker) = SummaryWriter::spawn(sink.clone()).unwrap();
        let session = shared().with_writer(writer);
        session.complete_current_segment(t(300)).unwrap();
        session.start_next_segment(None, t(300)).unwrap();

        let a = session.clone();
        let b = session.clone();
        let complete = thread::spawn(move || a.complete_current_segment(t(360)).unwrap());
        let cancel = thread::spawn(move || b.cancel(t(360)).unwrap());
        let completed = complete.join().unwrap();
        let cancelled = cancel.join().unwrap();

        // Whichever ran second was a no-op.
        match (completed, cancelled) {
            (SegmentOutcome::WorkoutCompleted(_), CancelOutcome::Ignored) => {
                assert_eq!(session.status(), SessionStatus::Completed);
            }
            (SegmentOutcome::Ignored, CancelOutcome::Cancelled { partial }) => {
                assert!(partial.is_some());
                assert_eq!(session.status(), SessionStatus::Cancelled);
            }
            other => panic!("Unexpected race outcome: {:?}", other),
        }

        drop(session);
        let stats = worker.join().unwrap();
        assert_eq!(stats.persisted, 1);
        assert_eq!(sink.summaries.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_completion_does_not_wait_for_sink() {
        let sink = Arc::new(SlowSink {
            delay: StdDuration::from_millis(400),
            inner: CountingSink::default(),
        });
        let (writer, worker) = SummaryWriter::spawn(sink.clone()).unwrap();
        let session = shared().with_writer(writer);
        session.complete_current_segment(t(240)).unwrap();
        session.start_next_segment(None, t(240)).unwrap();

        let started = Instant::now();
        let outcome = session.complete_current_segment(t(300)).unwrap();
        assert!(started.elapsed() < StdDuration::from_millis(200));
        assert!(matches!(outcome, SegmentOutcome::WorkoutCompleted(_)));

        drop(session);
        assert_eq!(worker.join().unwrap().persisted, 1);
        assert_eq!(sink.inner.summaries.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_writer_counts_failures() {
        struct FailingSink;
        impl SummarySink for FailingSink {
            fn persist(&self, _summary: &WorkoutSummary) -> Result<()> {
                Err(EngineError::Persistence("disk full".to_string()))
            }
        }

        let (writer, worker) = SummaryWriter::spawn(Arc::new(FailingSink)).unwrap();
        let session = shared().with_writer(writer);
        session.complete_current_segment(t(10)).unwrap();
        session.cancel(t(20)).unwrap();

        drop(session);
        assert_eq!(
            worker.join().unwrap(),
            WriterStats {
                persisted: 0,
                failed: 1
            }
        );
    }

    #[test]
    fn test_invalid_transition_surfaces_error() {
        let session = shared();
        assert!(session.resume(t(1)).is_err());
        assert_eq!(session.status(), SessionStatus::Active);
    }

    #[test]
    fn test_json_store_writes_summary() {
        let dir = TempDir::new().unwrap();
        let store = JsonSummaryStore::new(dir.path());
        let (writer, worker) = SummaryWriter::spawn(Arc::new(store.clone())).unwrap();
        let session = shared().with_writer(writer);

        session.complete_current_segment(t(240)).unwrap();
        session.start_next_segment(None, t(240)).unwrap();
        let summary = match session.complete_current_segment(t(300)).unwrap() {
            SegmentOutcome::WorkoutCompleted(summary) => summary,
            other => panic!("Expected completion, got {:?}", other),
        };

        drop(session);
        worker.join().unwrap();
        let loaded = JsonSummaryStore::load(&store.path_for(&summary)).unwrap();
        assert_eq!(loaded, summary);
    }
}
