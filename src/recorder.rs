//! Segment metrics recorder
//!
//! A mutable accumulator bound to exactly one segment's lifetime. Samples
//! outside plausible bounds are dropped and tallied rather than folded into
//! the aggregates. The recorder freezes exactly once; afterwards every call
//! fails with [`EngineError::AlreadyFrozen`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::models::{HeartRateStats, RejectionTally, SegmentMetrics};

/// Plausible physiological and physical bounds for live samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBounds {
    /// Lowest accepted heart rate in bpm
    pub min_heart_rate: u16,

    /// Highest accepted heart rate in bpm
    pub max_heart_rate: u16,

    /// Largest distance delta accepted in one sample, meters
    pub max_distance_delta_m: Decimal,

    /// Largest rep increment accepted in one sample
    pub max_rep_increment: u32,

    /// Largest calorie increment accepted in one sample
    pub max_calorie_increment: u32,
}

impl Default for SampleBounds {
    fn default() -> Self {
        Self {
            min_heart_rate: 30,
            max_heart_rate: 240,
            max_distance_delta_m: Decimal::from(500),
            max_rep_increment: 100,
            max_calorie_increment: 200,
        }
    }
}

/// Why a sample was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleRejection {
    HeartRateOutOfRange(u16),
    NegativeDistance,
    DistanceJump,
    RepBurst(u32),
    CalorieBurst(u32),
}

/// Result of feeding one sample to the recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleOutcome {
    Accepted,
    Rejected(SampleRejection),
}

impl SampleOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SampleOutcome::Accepted)
    }
}

/// Accumulates live samples for the active segment
#[derive(Debug, Clone)]
pub struct SegmentMetricsRecorder {
    segment_id: Uuid,
    ordinal: usize,
    duration_ms: u64,
    distance_m: Decimal,
    reps: u32,
    calories: u32,
    hr_min: u16,
    hr_max: u16,
    hr_sum: u64,
    hr_count: u32,
    rejected: RejectionTally,
    bounds: SampleBounds,
    frozen: bool,
}

impl SegmentMetricsRecorder {
    pub fn new(segment_id: Uuid, ordinal: usize, bounds: SampleBounds) -> Self {
        Self {
            segment_id,
            ordinal,
            duration_ms: 0,
            distance_m: Decimal::ZERO,
            reps: 0,
            calories: 0,
            hr_min: u16::MAX,
            hr_max: 0,
            hr_sum: 0,
            hr_count: 0,
            rejected: RejectionTally::default(),
            bounds,
            frozen: false,
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn distance_m(&self) -> Decimal {
        self.distance_m
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn rejected(&self) -> RejectionTally {
        self.rejected
    }

    /// Add active time. A negative delta means the caller's clock regressed.
    pub fn add_duration(&mut self, delta_ms: i64) -> Result<u64> {
        self.ensure_open()?;
        if delta_ms < 0 {
            return Err(EngineError::NegativeDuration { delta_ms });
        }
        self.duration_ms = self.duration_ms.saturating_add(delta_ms as u64);
        Ok(self.duration_ms)
    }

    pub fn add_distance(&mut self, delta_m: Decimal) -> Result<SampleOutcome> {
        self.ensure_open()?;
        if delta_m < Decimal::ZERO {
            self.rejected.distance += 1;
            return Ok(self.reject(SampleRejection::NegativeDistance));
        }
        if delta_m > self.bounds.max_distance_delta_m {
            self.rejected.distance += 1;
            return Ok(self.reject(SampleRejection::DistanceJump));
        }
        self.distance_m += delta_m;
        Ok(SampleOutcome::Accepted)
    }

    pub fn add_reps(&mut self, n: u32) -> Result<SampleOutcome> {
        self.ensure_open()?;
        if n > self.bounds.max_rep_increment {
            self.rejected.reps += 1;
            return Ok(self.reject(SampleRejection::RepBurst(n)));
        }
        self.reps = self.reps.saturating_add(n);
        Ok(SampleOutcome::Accepted)
    }

    pub fn add_heart_rate_sample(&mut self, bpm: u16) -> Result<SampleOutcome> {
        self.ensure_open()?;
        if bpm < self.bounds.min_heart_rate || bpm > self.bounds.max_heart_rate {
            self.rejected.heart_rate += 1;
            return Ok(self.reject(SampleRejection::HeartRateOutOfRange(bpm)));
        }
        self.hr_min = self.hr_min.min(bpm);
        self.hr_max = self.hr_max.max(bpm);
        self.hr_sum += u64::from(bpm);
        self.hr_count += 1;
        Ok(SampleOutcome::Accepted)
    }

    pub fn add_calories(&mut self, n: u32) -> Result<SampleOutcome> {
        self.ensure_open()?;
        if n > self.bounds.max_calorie_increment {
            self.rejected.calories += 1;
            return Ok(self.reject(SampleRejection::CalorieBurst(n)));
        }
        self.calories = self.calories.saturating_add(n);
        Ok(SampleOutcome::Accepted)
    }

    /// Current values without freezing
    pub fn snapshot(&self) -> SegmentMetrics {
        SegmentMetrics {
            segment_id: self.segment_id,
            ordinal: self.ordinal,
            duration_ms: self.duration_ms,
            distance_m: self.distance_m,
            reps: self.reps,
            calories: self.calories,
            heart_rate: self.heart_rate_stats(),
            rejected: self.rejected,
        }
    }

    /// Take the final snapshot. The recorder is unusable afterwards.
    pub fn freeze(&mut self) -> Result<SegmentMetrics> {
        self.ensure_open()?;
        self.frozen = true;
        let metrics = self.snapshot();
        debug!(
            segment = self.ordinal,
            duration_ms = metrics.duration_ms,
            rejected = metrics.rejected.total(),
            "Segment metrics frozen"
        );
        Ok(metrics)
    }

    fn heart_rate_stats(&self) -> Option<HeartRateStats> {
        HeartRateStats::from_totals(self.hr_min, self.hr_max, self.hr_sum, self.hr_count)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.frozen {
            return Err(EngineError::AlreadyFrozen {
                ordinal: self.ordinal,
            });
        }
        Ok(())
    }

    fn reject(&self, reason: SampleRejection) -> SampleOutcome {
        warn!(
            segment = self.ordinal,
            reason = ?reason,
            rejected_total = self.rejected.total(),
            "Dropped out-of-range sample"
        );
        SampleOutcome::Rejected(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn recorder() -> SegmentMetricsRecorder {
        SegmentMetricsRecorder::new(Uuid::new_v4(), 0, SampleBounds::default())
    }

    #[test]
    fn test_accumulates_samples() {
        let mut rec = recorder();
        rec.add_duration(1_500).unwrap();
        rec.add_duration(500).unwrap();
        rec.add_distance(dec!(12.5)).unwrap();
        rec.add_distance(dec!(7.5)).unwrap();
        rec.add_reps(3).unwrap();
        rec.add_calories(4).unwrap();
        for bpm in [140, 150, 161] {
            assert!(rec.add_heart_rate_sample(bpm).unwrap().is_accepted());
        }

        let metrics = rec.snapshot();
        assert_eq!(metrics.duration_ms, 2_000);
        assert_eq!(metrics.distance_m, dec!(20));
        assert_eq!(metrics.reps, 3);
        assert_eq!(metrics.calories, 4);

        let hr = metrics.heart_rate.unwrap();
        assert_eq!(hr.min, 140);
        assert_eq!(hr.max, 161);
        assert_eq!(hr.avg, 150);
        assert_eq!(hr.samples, 3);
    }

    #[test]
    fn test_out_of_range_samples_are_tallied() {
        let mut rec = recorder();
        assert_eq!(
            rec.add_heart_rate_sample(20).unwrap(),
            SampleOutcome::Rejected(SampleRejection::HeartRateOutOfRange(20))
        );
        assert!(!rec.add_heart_rate_sample(250).unwrap().is_accepted());
        assert!(!rec.add_distance(dec!(-3)).unwrap().is_accepted());
        assert!(!rec.add_distance(dec!(5000)).unwrap().is_accepted());
        assert!(!rec.add_reps(1_000).unwrap().is_accepted());

        let metrics = rec.snapshot();
        assert!(metrics.heart_rate.is_none());
        assert_eq!(metrics.distance_m, Decimal::ZERO);
        assert_eq!(metrics.reps, 0);
        assert_eq!(metrics.rejected.heart_rate, 2);
        assert_eq!(metrics.rejected.distance, 2);
        assert_eq!(metrics.rejected.reps, 1);
        assert_eq!(metrics.rejected.total(), 5);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let mut rec = recorder();
        assert!(rec.add_heart_rate_sample(30).unwrap().is_accepted());
        assert!(rec.add_heart_rate_sample(240).unwrap().is_accepted());
        assert!(rec.add_distance(dec!(500)).unwrap().is_accepted());
    }

    #[test]
    fn test_negative_duration_fails_fast() {
        let mut rec = recorder();
        rec.add_duration(1_000).unwrap();
        let err = rec.add_duration(-5).unwrap_err();
        assert!(matches!(err, EngineError::NegativeDuration { delta_ms: -5 }));
        assert_eq!(rec.duration_ms(), 1_000);
    }

    #[test]
    fn test_freeze_exactly_once() {
        let mut rec = recorder();
        rec.add_duration(42).unwrap();
        let frozen = rec.freeze().unwrap();
        assert_eq!(frozen.duration_ms, 42);
        assert!(rec.is_frozen());

        assert!(matches!(rec.freeze(), Err(EngineError::AlreadyFrozen { ordinal: 0 })));
        assert!(matches!(rec.add_duration(1), Err(EngineError::AlreadyFrozen { .. })));
        assert!(matches!(rec.add_heart_rate_sample(120), Err(EngineError::AlreadyFrozen { .. })));
        assert!(matches!(rec.add_distance(dec!(1)), Err(EngineError::AlreadyFrozen { .. })));
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_duration_never_decreases(deltas in proptest::collection::vec(0i64..10_000, 1..50)) {
            let mut rec = recorder();
            let mut previous = 0u64;
            for delta in deltas {
                let current = rec.add_duration(delta).unwrap();
                prop_assert!(current >= previous);
                previous = current;
            }
        }

        #[test]
        fn test_heart_rate_avg_within_min_max(samples in proptest::collection::vec(30u16..=240, 1..100)) {
            let mut rec = recorder();
            for bpm in &samples {
                rec.add_heart_rate_sample(*bpm).unwrap();
            }
            let hr = rec.snapshot().heart_rate.unwrap();
            prop_assert!(hr.min <= hr.avg && hr.avg <= hr.max);
            prop_assert_eq!(hr.samples as usize, samples.len());
        }
    }
}
