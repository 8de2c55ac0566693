//! Receiving side of the peer link
//!
//! The mirror holds the same plan as the authoritative device and tracks the
//! newest snapshot it has seen. Snapshots can arrive late, twice, or out of
//! order; only a strictly newer sequence is applied, so any delivery order
//! converges on the sender's latest state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::models::{Segment, SessionStatus, WorkoutSummary};
use crate::sync::channel::SyncTransport;
use crate::sync::snapshot::{SyncPayload, SyncSnapshot};

/// Result of applying one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Sequence not newer than the last applied one
    Stale,
    /// Snapshot belongs to a different workout
    ForeignWorkout,
}

/// Result of receiving one summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryReceipt {
    /// First delivery for this workout
    Stored,
    /// Redelivery of a summary already stored
    Duplicate,
    /// Different content for a workout that already has a summary; first one kept
    Conflict,
}

/// What a decoded frame did to the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorEvent {
    Snapshot(ApplyOutcome),
    Summary(SummaryReceipt),
}

#[derive(Debug, Clone)]
struct StoredSummary {
    fingerprint: String,
    summary: WorkoutSummary,
}

/// Idempotent store for summaries delivered at-least-once
#[derive(Debug, Clone, Default)]
pub struct SummaryInbox {
    entries: HashMap<Uuid, StoredSummary>,
}

impl SummaryInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn receive(&mut self, summary: WorkoutSummary) -> Result<SummaryReceipt> {
        let fingerprint = summary.fingerprint()?;
        if let Some(existing) = self.entries.get(&summary.workout_id) {
            if existing.fingerprint == fingerprint {
                debug!(workout_id = %summary.workout_id, "Duplicate summary dropped");
                return Ok(SummaryReceipt::Duplicate);
            }
            warn!(
                workout_id = %summary.workout_id,
                stored = %existing.fingerprint,
                received = %fingerprint,
                "Conflicting summary for workout; keeping the first"
            );
            return Ok(SummaryReceipt::Conflict);
        }

        info!(
            workout_id = %summary.workout_id,
            status = %summary.status,
            "Summary stored"
        );
        self.entries
            .insert(summary.workout_id, StoredSummary { fingerprint, summary });
        Ok(SummaryReceipt::Stored)
    }

    pub fn get(&self, workout_id: &Uuid) -> Option<&WorkoutSummary> {
        self.entries.get(workout_id).map(|stored| &stored.summary)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read-only replica of a session running on the peer device
#[derive(Debug, Clone)]
pub struct SessionMirror {
    workout_id: Uuid,
    plan: Vec<Segment>,
    latest: Option<SyncSnapshot>,
    inbox: SummaryInbox,
}

impl SessionMirror {
    pub fn new(workout_id: Uuid, plan: Vec<Segment>) -> Self {
        Self {
            workout_id,
            plan,
            latest: None,
            inbox: SummaryInbox::new(),
        }
    }

    pub fn workout_id(&self) -> Uuid {
        self.workout_id
    }

    pub fn latest(&self) -> Option<&SyncSnapshot> {
        self.latest.as_ref()
    }

    /// Last applied sequence, 0 before any snapshot
    pub fn sequence(&self) -> u64 {
        self.latest.map(|s| s.sequence).unwrap_or(0)
    }

    /// Mirrored status; a received summary is final even if the closing
    /// snapshot never arrived
    pub fn status(&self) -> SessionStatus {
        if let Some(summary) = self.summary() {
            return summary.status;
        }
        self.latest
            .map(|s| s.status)
            .unwrap_or(SessionStatus::NotStarted)
    }

    pub fn current_segment(&self) -> Option<&Segment> {
        self.latest.and_then(|s| self.plan.get(s.segment_index))
    }

    pub fn active_elapsed_ms(&self) -> u64 {
        self.latest.map(|s| s.active_elapsed_ms).unwrap_or(0)
    }

    pub fn summary(&self) -> Option<&WorkoutSummary> {
        self.inbox.get(&self.workout_id)
    }

    pub fn apply(&mut self, snapshot: SyncSnapshot) -> ApplyOutcome {
        if snapshot.workout_id != self.workout_id {
            warn!(
                expected = %self.workout_id,
                received = %snapshot.workout_id,
                "Snapshot for another workout ignored"
            );
            return ApplyOutcome::ForeignWorkout;
        }
        if let Some(latest) = &self.latest {
            if !snapshot.supersedes(latest) {
                debug!(
                    applied = latest.sequence,
                    received = snapshot.sequence,
                    "Stale snapshot dropped"
                );
                return ApplyOutcome::Stale;
            }
        }
        if snapshot.segment_index >= self.plan.len() {
            warn!(
                segment = snapshot.segment_index,
                plan_len = self.plan.len(),
                "Snapshot points past the mirrored plan"
            );
        }
        self.latest = Some(snapshot);
        ApplyOutcome::Applied
    }

    pub fn receive_summary(&mut self, summary: WorkoutSummary) -> Result<SummaryReceipt> {
        self.inbox.receive(summary)
    }

    pub fn receive(&mut self, payload: SyncPayload) -> Result<MirrorEvent> {
        match payload {
            SyncPayload::Snapshot(snapshot) => Ok(MirrorEvent::Snapshot(self.apply(snapshot))),
            SyncPayload::Summary(summary) => {
                Ok(MirrorEvent::Summary(self.receive_summary(summary)?))
            }
        }
    }

    /// Decode and apply one frame off the link
    pub fn receive_frame(&mut self, frame: &[u8]) -> Result<MirrorEvent> {
        let payload = SyncPayload::decode(frame)?;
        self.receive(payload)
    }
}

/// Link that hands frames straight to a mirror in the same process
///
/// Stands in for the radio link when both ends run locally, as in the CLI's
/// synced replay.
#[derive(Debug, Clone)]
pub struct MirrorLink {
    mirror: Arc<Mutex<SessionMirror>>,
}

impl MirrorLink {
    pub fn new(mirror: SessionMirror) -> Self {
        Self {
            mirror: Arc::new(Mutex::new(mirror)),
        }
    }

    /// Current state of the receiving side
    pub fn mirror(&self) -> SessionMirror {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, SessionMirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SyncTransport for MirrorLink {
    async fn send(&self, frame: Vec<u8>) -> std::result::Result<(), SyncError> {
        let event = self
            .lock()
            .receive_frame(&frame)
            .map_err(|e| SyncError::Decode(e.to_string()))?;
        debug!(event = ?event, "Frame delivered to local mirror");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanBuilder;
    use rust_decimal::Decimal;

    fn mirror() -> (SessionMirror, Uuid) {
        let plan = PlanBuilder::new()
            .warmup(60)
            .run(Decimal::from(1000))
            .build()
            .unwrap();
        let id = Uuid::new_v4();
        (SessionMirror::new(id, plan), id)
    }

    fn snapshot(workout_id: Uuid, sequence: u64, segment_index: usize) -> SyncSnapshot {
        SyncSnapshot {
            workout_id,
            sequence,
            status: SessionStatus::Active,
            segment_index,
            active_elapsed_ms: sequence * 1_000,
        }
    }

    fn summary(workout_id: Uuid, total_time_ms: u64) -> WorkoutSummary {
        WorkoutSummary {
            workout_id,
            status: SessionStatus::Completed,
            total_time_ms,
            run_time_ms: 0,
            station_time_ms: 0,
            other_time_ms: total_time_ms,
            segments_completed: 2,
            total_segments: 2,
            heart_rate: None,
            total_distance_m: Decimal::ZERO,
            total_reps: 0,
            total_calories: 0,
            rejected_samples: 0,
            compromised: Vec::new(),
        }
    }

    #[test]
    fn test_out_of_order_snapshots_converge() {
        let (mut mirror, id) = mirror();
        assert_eq!(mirror.apply(snapshot(id, 3, 1)), ApplyOutcome::Applied);
        assert_eq!(mirror.apply(snapshot(id, 2, 0)), ApplyOutcome::Stale);
        assert_eq!(mirror.apply(snapshot(id, 3, 1)), ApplyOutcome::Stale);

        assert_eq!(mirror.sequence(), 3);
        assert_eq!(mirror.current_segment().unwrap().ordinal, 1);
        assert_eq!(mirror.active_elapsed_ms(), 3_000);
    }

    #[test]
    fn test_foreign_snapshot_rejected() {
        let (mut mirror, _) = mirror();
        let outcome = mirror.apply(snapshot(Uuid::new_v4(), 10, 0));
        assert_eq!(outcome, ApplyOutcome::ForeignWorkout);
        assert!(mirror.latest().is_none());
        assert_eq!(mirror.status(), SessionStatus::NotStarted);
    }

    #[test]
    fn test_summary_redelivery_is_idempotent() {
        let mut inbox = SummaryInbox::new();
        let id = Uuid::new_v4();
        assert_eq!(inbox.receive(summary(id, 1_000)).unwrap(), SummaryReceipt::Stored);
        assert_eq!(inbox.receive(summary(id, 1_000)).unwrap(), SummaryReceipt::Duplicate);
        assert_eq!(inbox.receive(summary(id, 2_000)).unwrap(), SummaryReceipt::Conflict);

        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox.get(&id).unwrap().total_time_ms, 1_000);
    }

    #[test]
    fn test_summary_marks_mirror_final() {
        let (mut mirror, id) = mirror();
        mirror.apply(snapshot(id, 5, 1));
        mirror.receive_summary(summary(id, 90_000)).unwrap();
        assert_eq!(mirror.status(), SessionStatus::Completed);
    }

    #[test]
    fn test_receive_frame_decodes_and_applies() {
        let (mut mirror, id) = mirror();
        let frame = SyncPayload::from(snapshot(id, 4, 0)).encode().unwrap();
        assert_eq!(
            mirror.receive_frame(&frame).unwrap(),
            MirrorEvent::Snapshot(ApplyOutcome::Applied)
        );
        assert!(mirror.receive_frame(&[0xff, 0x01]).is_err());
        assert_eq!(mirror.sequence(), 4);
    }

    #[tokio::test]
    async fn test_mirror_link_applies_frames() {
        let (mirror, id) = mirror();
        let link = MirrorLink::new(mirror);

        let frame = SyncPayload::from(snapshot(id, 7, 1)).encode().unwrap();
        link.send(frame).await.unwrap();
        let stale = SyncPayload::from(snapshot(id, 3, 0)).encode().unwrap();
        link.send(stale).await.unwrap();
        assert!(link.send(vec![0xff]).await.is_err());

        let mirrored = link.mirror();
        assert_eq!(mirrored.sequence(), 7);
        assert_eq!(mirrored.latest().unwrap().segment_index, 1);
    }
}
