//! Workout session state machine
//!
//! The session drives a user through an ordered plan of segments. It is a
//! wall-clock-based state machine with no internal threads or timers: the
//! caller passes its clock reading to every timing operation and is
//! responsible for calling `tick()` periodically.
//!
//! ## State Transitions
//!
//! ```text
//! NotStarted -> Active <-> Paused
//!               Active -> Transitioning -> Active (next segment) -> ... -> Completed
//!               any non-terminal state -> Cancelled
//! ```
//!
//! Every accepted mutation bumps a local sequence number. Sequence order, not
//! wall-clock order, is authoritative: a tick whose timestamp does not advance
//! past the clock anchor is a no-op, so duration never runs backwards.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{Segment, SegmentKind, SegmentMetrics, SessionStatus, WorkoutSummary};
use crate::plan::validate_plan;
use crate::recorder::{SampleBounds, SampleOutcome, SampleRejection, SegmentMetricsRecorder};
use crate::shadow::{ShadowComparator, ShadowComparison, ShadowReference, UnavailableReason};
use crate::summary::{aggregate, CompromiseThresholds};
use crate::sync::SyncSnapshot;

/// A live sensor reading routed to the active segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sample {
    /// Heart rate in bpm
    HeartRate(u16),
    /// Distance covered since the previous distance sample, meters
    Distance(Decimal),
    /// Repetitions completed since the previous rep sample
    Reps(u32),
    /// Calories burned since the previous calorie sample
    Calories(u32),
}

/// What happened to a sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleDisposition {
    Accepted,
    /// Outside plausible bounds; tallied, not applied
    Rejected(SampleRejection),
    /// Session was not active; dropped without error
    Discarded,
}

impl From<SampleOutcome> for SampleDisposition {
    fn from(outcome: SampleOutcome) -> Self {
        match outcome {
            SampleOutcome::Accepted => SampleDisposition::Accepted,
            SampleOutcome::Rejected(reason) => SampleDisposition::Rejected(reason),
        }
    }
}

/// Result of completing the active segment
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    /// Segment frozen; waiting for `start_next_segment`
    Transitioning { completed: usize },
    /// Final segment frozen; the workout is complete
    WorkoutCompleted(WorkoutSummary),
    /// Session had already reached a terminal state
    Ignored,
}

/// Result of advancing to the next segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Started { index: usize },
    Ignored,
}

/// Result of cancelling a session
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// Partial summary present when at least one segment was frozen
    Cancelled { partial: Option<WorkoutSummary> },
    Ignored,
}

/// Tunables the session needs from configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub thresholds: CompromiseThresholds,
    pub sample_bounds: SampleBounds,
}

/// Read-only state for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub workout_id: Uuid,
    pub status: SessionStatus,
    pub segment_index: usize,
    pub total_segments: usize,
    pub segment_kind: Option<SegmentKind>,
    pub segment_name: Option<String>,
    pub active_elapsed_ms: u64,
    pub total_elapsed_ms: u64,
    pub shadow: ShadowComparison,
    pub sequence: u64,
}

/// Core workout state machine
#[derive(Debug, Clone)]
pub struct WorkoutSession {
    workout_id: Uuid,
    segments: Vec<Segment>,
    index: usize,
    status: SessionStatus,
    frozen: Vec<SegmentMetrics>,
    recorder: Option<SegmentMetricsRecorder>,
    /// Wall-clock point the running duration was last flushed to
    clock_anchor: Option<DateTime<Utc>>,
    /// Anchor at the moment of pausing; resume never re-anchors before it
    paused_at: Option<DateTime<Utc>>,
    shadow: Option<ShadowReference>,
    sequence: u64,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    settings: SessionSettings,
    summary: Option<WorkoutSummary>,
}

impl WorkoutSession {
    /// Start a workout on `plan`, with segment 0 active and its clock running
    pub fn begin(
        plan: Vec<Segment>,
        shadow: Option<ShadowReference>,
        now: DateTime<Utc>,
        settings: SessionSettings,
    ) -> Result<Self> {
        Self::begin_with_id(Uuid::new_v4(), plan, shadow, now, settings)
    }

    pub fn begin_with_id(
        workout_id: Uuid,
        plan: Vec<Segment>,
        shadow: Option<ShadowReference>,
        now: DateTime<Utc>,
        settings: SessionSettings,
    ) -> Result<Self> {
        validate_plan(&plan)?;

        let recorder = SegmentMetricsRecorder::new(plan[0].id, 0, settings.sample_bounds.clone());
        info!(
            workout_id = %workout_id,
            segments = plan.len(),
            "Workout started"
        );

        Ok(Self {
            workout_id,
            segments: plan,
            index: 0,
            status: SessionStatus::Active,
            frozen: Vec::new(),
            recorder: Some(recorder),
            clock_anchor: Some(now),
            paused_at: None,
            shadow,
            sequence: 1,
            started_at: now,
            ended_at: None,
            settings,
            summary: None,
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn workout_id(&self) -> Uuid {
        self.workout_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Segment the recorder is bound to, if any
    pub fn current_segment(&self) -> Option<&Segment> {
        self.recorder.as_ref()?;
        self.segments.get(self.index)
    }

    pub fn frozen_metrics(&self) -> &[SegmentMetrics] {
        &self.frozen
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn shadow_reference(&self) -> Option<&ShadowReference> {
        self.shadow.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Summary produced at completion, or the partial one from cancellation
    pub fn summary(&self) -> Option<&WorkoutSummary> {
        self.summary.as_ref()
    }

    /// Live metrics of the active segment
    pub fn live_metrics(&self) -> Option<SegmentMetrics> {
        self.recorder.as_ref().map(|r| r.snapshot())
    }

    /// Active segment duration as of the last tick
    pub fn active_elapsed_ms(&self) -> u64 {
        self.recorder.as_ref().map(|r| r.duration_ms()).unwrap_or(0)
    }

    /// Active segment duration projected to `now`, without mutating
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        let pending = match (self.status, self.clock_anchor) {
            (SessionStatus::Active, Some(anchor)) => {
                (now - anchor).num_milliseconds().max(0) as u64
            }
            _ => 0,
        };
        self.active_elapsed_ms() + pending
    }

    /// Frozen durations plus the active segment's running duration
    pub fn total_elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        let frozen: u64 = self.frozen.iter().map(|m| m.duration_ms).sum();
        frozen + self.elapsed_at(now)
    }

    pub fn shadow_comparison(&self, now: DateTime<Utc>) -> ShadowComparison {
        match (self.current_segment(), &self.recorder) {
            (Some(segment), Some(recorder)) => ShadowComparator::compare(
                segment,
                self.elapsed_at(now),
                recorder.distance_m(),
                self.shadow.as_ref(),
            ),
            _ => ShadowComparison::Unavailable(UnavailableReason::NoReference),
        }
    }

    pub fn view(&self, now: DateTime<Utc>) -> SessionView {
        let segment = self.current_segment();
        SessionView {
            workout_id: self.workout_id,
            status: self.status,
            segment_index: self.index,
            total_segments: self.segments.len(),
            segment_kind: segment.map(|s| s.kind.clone()),
            segment_name: segment.map(|s| s.display_name()),
            active_elapsed_ms: self.elapsed_at(now),
            total_elapsed_ms: self.total_elapsed_ms(now),
            shadow: self.shadow_comparison(now),
            sequence: self.sequence,
        }
    }

    /// Compact state for the peer device
    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            workout_id: self.workout_id,
            sequence: self.sequence,
            status: self.status,
            segment_index: self.index,
            active_elapsed_ms: self.active_elapsed_ms(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Advance the active segment's running duration to `now`
    ///
    /// Does nothing unless the session is active. Never transitions segments.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<u64> {
        if self.status == SessionStatus::Active && self.flush_elapsed(now)? {
            self.bump();
        }
        Ok(self.active_elapsed_ms())
    }

    /// Route a live sample into the active segment's recorder
    pub fn record_sample(&mut self, sample: Sample) -> Result<SampleDisposition> {
        if self.status != SessionStatus::Active {
            debug!(
                workout_id = %self.workout_id,
                status = %self.status,
                sample = ?sample,
                "Discarding sample outside active segment"
            );
            return Ok(SampleDisposition::Discarded);
        }

        let ordinal = self.index;
        let recorder = self
            .recorder
            .as_mut()
            .ok_or(EngineError::AlreadyFrozen { ordinal })?;
        let outcome = match sample {
            Sample::HeartRate(bpm) => recorder.add_heart_rate_sample(bpm)?,
            Sample::Distance(delta) => recorder.add_distance(delta)?,
            Sample::Reps(n) => recorder.add_reps(n)?,
            Sample::Calories(n) => recorder.add_calories(n)?,
        };
        self.bump();
        Ok(outcome.into())
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != SessionStatus::Active {
            return Err(self.invalid("pause"));
        }
        self.flush_elapsed(now)?;
        self.paused_at = self.clock_anchor.take();
        self.status = SessionStatus::Paused;
        self.bump();
        info!(
            workout_id = %self.workout_id,
            segment = self.index,
            elapsed_ms = self.active_elapsed_ms(),
            "Workout paused"
        );
        Ok(())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != SessionStatus::Paused {
            return Err(self.invalid("resume"));
        }
        let anchor = match self.paused_at.take() {
            Some(paused_at) => now.max(paused_at),
            None => now,
        };
        self.clock_anchor = Some(anchor);
        self.status = SessionStatus::Active;
        self.bump();
        info!(workout_id = %self.workout_id, segment = self.index, "Workout resumed");
        Ok(())
    }

    /// Freeze the active segment and move to `Transitioning`, or to
    /// `Completed` when it was the last segment of the plan
    pub fn complete_current_segment(&mut self, now: DateTime<Utc>) -> Result<SegmentOutcome> {
        if self.status.is_terminal() {
            debug!(workout_id = %self.workout_id, status = %self.status, "Complete ignored");
            return Ok(SegmentOutcome::Ignored);
        }
        if self.status != SessionStatus::Active {
            return Err(self.invalid("complete segment"));
        }

        self.flush_elapsed(now)?;
        let ordinal = self.index;
        let metrics = self
            .recorder
            .as_mut()
            .ok_or(EngineError::AlreadyFrozen { ordinal })?
            .freeze()?;
        self.recorder = None;
        self.clock_anchor = None;
        self.shadow = None;
        self.frozen.push(metrics);
        let last = ordinal + 1 >= self.segments.len();
        self.status = if last {
            SessionStatus::Completed
        } else {
            SessionStatus::Transitioning
        };
        self.bump();

        info!(
            workout_id = %self.workout_id,
            segment = ordinal,
            duration_ms = self.frozen[ordinal].duration_ms,
            "Segment completed"
        );

        if last {
            self.ended_at = Some(now);
            let summary = self.build_summary();
            self.summary = Some(summary.clone());
            info!(
                workout_id = %self.workout_id,
                total_time_ms = summary.total_time_ms,
                "Workout completed"
            );
            return Ok(SegmentOutcome::WorkoutCompleted(summary));
        }

        Ok(SegmentOutcome::Transitioning { completed: ordinal })
    }

    /// Activate the next segment with a fresh clock
    pub fn start_next_segment(
        &mut self,
        shadow: Option<ShadowReference>,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome> {
        match self.status {
            SessionStatus::Completed => return Err(EngineError::NoMoreSegments),
            SessionStatus::Cancelled => return Ok(AdvanceOutcome::Ignored),
            SessionStatus::Transitioning => {}
            _ => return Err(self.invalid("start next segment")),
        }

        let next = self.index + 1;
        let segment = self.segments.get(next).ok_or(EngineError::NoMoreSegments)?;
        self.recorder = Some(SegmentMetricsRecorder::new(
            segment.id,
            next,
            self.settings.sample_bounds.clone(),
        ));
        self.index = next;
        self.clock_anchor = Some(now);
        self.shadow = shadow;
        self.status = SessionStatus::Active;
        self.bump();

        info!(
            workout_id = %self.workout_id,
            segment = next,
            kind = %self.segments[next].kind,
            "Segment started"
        );
        Ok(AdvanceOutcome::Started { index: next })
    }

    /// Stop the workout; the active segment's metrics are discarded
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<CancelOutcome> {
        if self.status.is_terminal() {
            debug!(workout_id = %self.workout_id, status = %self.status, "Cancel ignored");
            return Ok(CancelOutcome::Ignored);
        }

        let discarded = self.recorder.take().map(|r| r.duration_ms()).unwrap_or(0);
        self.clock_anchor = None;
        self.paused_at = None;
        self.shadow = None;
        self.status = SessionStatus::Cancelled;
        self.ended_at = Some(now);
        self.bump();

        let partial = if self.frozen.is_empty() {
            None
        } else {
            let summary = self.build_summary();
            self.summary = Some(summary.clone());
            Some(summary)
        };

        info!(
            workout_id = %self.workout_id,
            segments_kept = self.frozen.len(),
            discarded_ms = discarded,
            "Workout cancelled"
        );
        Ok(CancelOutcome::Cancelled { partial })
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Move the clock anchor to `now`, crediting the elapsed time.
    /// Returns whether any time was added.
    fn flush_elapsed(&mut self, now: DateTime<Utc>) -> Result<bool> {
        let anchor = match self.clock_anchor {
            Some(anchor) => anchor,
            None => return Ok(false),
        };
        let delta_ms = (now - anchor).num_milliseconds();
        if delta_ms <= 0 {
            debug!(
                workout_id = %self.workout_id,
                delta_ms,
                "Clock did not advance; tick ignored"
            );
            return Ok(false);
        }
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.add_duration(delta_ms)?;
        }
        // Carry sub-millisecond remainder forward instead of dropping it.
        self.clock_anchor = Some(anchor + chrono::Duration::milliseconds(delta_ms));
        Ok(true)
    }

    fn build_summary(&self) -> WorkoutSummary {
        aggregate(
            self.workout_id,
            self.status,
            &self.frozen,
            &self.segments,
            &self.settings.thresholds,
        )
    }

    fn invalid(&self, operation: &'static str) -> EngineError {
        debug!(
            workout_id = %self.workout_id,
            operation,
            status = %self.status,
            "Rejected transition"
        );
        EngineError::InvalidTransition {
            operation,
            status: self.status,
        }
    }

    fn bump(&mut self) {
        self.sequence += 1;
        debug_assert!(
            self.status != SessionStatus::Active || self.frozen.len() == self.index,
            "every prior segment must have exactly one frozen record"
        );
    }
}
