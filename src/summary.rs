//! Workout summary aggregation
//!
//! [`aggregate`] is a pure function of the frozen metrics and the plan.
//! Identical input always yields an identical summary, which is what makes
//! summary redelivery across devices idempotent.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    CompromiseReason, CompromisedSegment, Deviation, HeartRateStats, Segment, SegmentMetrics,
    SessionStatus, WorkoutSummary,
};

/// Tolerances used to flag compromised segments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompromiseThresholds {
    /// Beats per minute above the zone's upper bound before flagging
    pub heart_rate_margin_bpm: u16,

    /// Allowed deviation from target pace, seconds per km
    pub pace_tolerance_secs_per_km: u32,

    /// Also flag runs that beat the target pace by more than the tolerance
    pub flag_fast_pace: bool,
}

impl Default for CompromiseThresholds {
    fn default() -> Self {
        Self {
            heart_rate_margin_bpm: 5,
            pace_tolerance_secs_per_km: 15,
            flag_fast_pace: false,
        }
    }
}

/// Reduce frozen metrics into a workout summary
///
/// `segments` is the full plan; each metrics record is paired with the plan
/// segment at its ordinal.
pub fn aggregate(
    workout_id: Uuid,
    status: SessionStatus,
    frozen: &[SegmentMetrics],
    segments: &[Segment],
    thresholds: &CompromiseThresholds,
) -> WorkoutSummary {
    let mut total_time_ms = 0u64;
    let mut run_time_ms = 0u64;
    let mut station_time_ms = 0u64;
    let mut other_time_ms = 0u64;
    let mut total_distance_m = Decimal::ZERO;
    let mut total_reps = 0u32;
    let mut total_calories = 0u32;
    let mut rejected_samples = 0u32;
    let mut compromised = Vec::new();

    for metrics in frozen {
        let segment = segments.get(metrics.ordinal);

        total_time_ms += metrics.duration_ms;
        match segment.map(|s| &s.kind) {
            Some(kind) if kind.is_run() => run_time_ms += metrics.duration_ms,
            Some(kind) if kind.is_station() => station_time_ms += metrics.duration_ms,
            _ => other_time_ms += metrics.duration_ms,
        }

        total_distance_m += metrics.distance_m;
        total_reps = total_reps.saturating_add(metrics.reps);
        total_calories = total_calories.saturating_add(metrics.calories);
        rejected_samples = rejected_samples.saturating_add(metrics.rejected.total());

        if let Some(segment) = segment {
            compromised.extend(check_segment(segment, metrics, thresholds));
        }
    }

    let summary = WorkoutSummary {
        workout_id,
        status,
        total_time_ms,
        run_time_ms,
        station_time_ms,
        other_time_ms,
        segments_completed: frozen.len(),
        total_segments: segments.len(),
        heart_rate: combine_heart_rate(frozen),
        total_distance_m,
        total_reps,
        total_calories,
        rejected_samples,
        compromised,
    };

    debug!(
        workout_id = %workout_id,
        segments = summary.segments_completed,
        compromised = summary.compromised.len(),
        "Workout summary aggregated"
    );

    summary
}

fn check_segment(
    segment: &Segment,
    metrics: &SegmentMetrics,
    thresholds: &CompromiseThresholds,
) -> Vec<CompromisedSegment> {
    let mut flags = Vec::new();
    let flag = |reason, deviation| CompromisedSegment {
        ordinal: segment.ordinal,
        segment_id: segment.id,
        reason,
        deviation,
    };

    if let (Some(zone), Some(hr)) = (segment.targets.heart_rate_zone, metrics.heart_rate) {
        let limit = zone.max_bpm.saturating_add(thresholds.heart_rate_margin_bpm);
        if hr.avg > limit {
            flags.push(flag(
                CompromiseReason::HeartRateAboveZone,
                Deviation::Bpm(hr.avg - zone.max_bpm),
            ));
        }
    }

    if segment.kind.is_run() {
        if let (Some(target), Some(actual)) = (segment.targets.pace, metrics.pace_secs_per_km()) {
            let delta = actual - Decimal::from(target.seconds_per_km());
            let tolerance = Decimal::from(thresholds.pace_tolerance_secs_per_km);
            let seconds = delta.abs().round().to_u32().unwrap_or(u32::MAX);
            if delta > tolerance {
                flags.push(flag(
                    CompromiseReason::PaceBehindTarget,
                    Deviation::Seconds(seconds),
                ));
            } else if thresholds.flag_fast_pace && -delta > tolerance {
                flags.push(flag(
                    CompromiseReason::PaceAheadOfTarget,
                    Deviation::Seconds(seconds),
                ));
            }
        }
    }

    flags
}

/// Combine per-segment heart rate; segments without samples are left out.
fn combine_heart_rate(frozen: &[SegmentMetrics]) -> Option<HeartRateStats> {
    let mut min = u16::MAX;
    let mut max = 0u16;
    let mut sum = 0u64;
    let mut samples = 0u32;

    for hr in frozen.iter().filter_map(|m| m.heart_rate) {
        if hr.samples == 0 {
            continue;
        }
        min = min.min(hr.min);
        max = max.max(hr.max);
        sum = sum.saturating_add(hr.sum);
        samples = samples.saturating_add(hr.samples);
    }

    HeartRateStats::from_totals(min, max, sum, samples)
}

impl WorkoutSummary {
    /// SHA-256 over the canonical JSON encoding
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }

    pub fn is_partial(&self) -> bool {
        self.segments_completed < self.total_segments
    }
}
