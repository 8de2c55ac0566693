//! Shadow runner comparison
//!
//! Compares the active segment's live progress against a reference time for
//! the same segment. Progress is distance-based when the segment has a target
//! distance, otherwise time-based against the target duration. The reference
//! is assumed to move linearly through its known total time.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Segment, TargetPace};

/// Where a reference time came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSource {
    /// The athlete's best effort on this segment
    PersonalBest,
    /// A generated target
    Suggested,
}

/// Reference effort the user races against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowReference {
    /// Time the reference takes for the whole segment, milliseconds
    pub total_time_ms: u64,
    pub source: ReferenceSource,
}

impl ShadowReference {
    pub fn personal_best(total_time_ms: u64) -> Self {
        Self {
            total_time_ms,
            source: ReferenceSource::PersonalBest,
        }
    }

    /// Reference that runs `distance_m` at exactly `pace`
    pub fn from_pace(pace: TargetPace, distance_m: Decimal) -> Self {
        Self {
            total_time_ms: pace.expected_duration_ms(distance_m),
            source: ReferenceSource::Suggested,
        }
    }
}

/// What drove the progress fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressBasis {
    Distance,
    Time,
}

/// Why no comparison could be made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    NoReference,
    NoTarget,
    EmptyReference,
}

/// Live comparison against the reference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShadowProgress {
    /// User's progress through the segment, 0.0..=1.0
    pub self_progress: f64,
    /// Reference's progress at the same elapsed time, 0.0..=1.0
    pub reference_progress: f64,
    /// Signed seconds; positive means ahead of the reference
    pub time_difference_secs: f64,
    pub basis: ProgressBasis,
}

impl ShadowProgress {
    pub fn is_ahead(&self) -> bool {
        self.time_difference_secs > 0.0
    }
}

/// Comparator output; "no data" is distinct from "exactly on pace"
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowComparison {
    Available(ShadowProgress),
    Unavailable(UnavailableReason),
}

impl ShadowComparison {
    pub fn progress(&self) -> Option<&ShadowProgress> {
        match self {
            ShadowComparison::Available(progress) => Some(progress),
            ShadowComparison::Unavailable(_) => None,
        }
    }
}

/// Shadow runner calculations
pub struct ShadowComparator;

impl ShadowComparator {
    /// Compare live progress on `segment` against `reference`
    pub fn compare(
        segment: &Segment,
        elapsed_ms: u64,
        distance_m: Decimal,
        reference: Option<&ShadowReference>,
    ) -> ShadowComparison {
        let reference = match reference {
            Some(reference) => reference,
            None => return ShadowComparison::Unavailable(UnavailableReason::NoReference),
        };
        if reference.total_time_ms == 0 {
            return ShadowComparison::Unavailable(UnavailableReason::EmptyReference);
        }

        let (self_progress, basis) = match Self::self_progress(segment, elapsed_ms, distance_m) {
            Some(progress) => progress,
            None => return ShadowComparison::Unavailable(UnavailableReason::NoTarget),
        };

        let reference_total = reference.total_time_ms as f64;
        let elapsed = elapsed_ms as f64;
        let reference_progress = clamp_fraction(elapsed / reference_total);

        // Time the reference needs to reach the user's current progress.
        let reference_time_at_self = self_progress * reference_total;
        let time_difference_secs = (reference_time_at_self - elapsed) / 1000.0;

        ShadowComparison::Available(ShadowProgress {
            self_progress,
            reference_progress,
            time_difference_secs,
            basis,
        })
    }

    fn self_progress(
        segment: &Segment,
        elapsed_ms: u64,
        distance_m: Decimal,
    ) -> Option<(f64, ProgressBasis)> {
        let targets = &segment.targets;
        if let Some(target_distance) = targets.distance_m.filter(|d| *d > Decimal::ZERO) {
            let ratio = (distance_m / target_distance).to_f64()?;
            return Some((clamp_fraction(ratio), ProgressBasis::Distance));
        }
        if let Some(target_duration) = targets.duration_ms.filter(|d| *d > 0) {
            let ratio = elapsed_ms as f64 / target_duration as f64;
            return Some((clamp_fraction(ratio), ProgressBasis::Time));
        }
        None
    }
}

fn clamp_fraction(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SegmentKind, SegmentTargets};
    use rust_decimal_macros::dec;

    fn run_segment(distance: Decimal) -> Segment {
        Segment::new(
            1,
            SegmentKind::Run,
            SegmentTargets {
                distance_m: Some(distance),
                ..Default::default()
            },
        )
    }

    fn timed_segment(duration_ms: u64) -> Segment {
        Segment::new(
            0,
            SegmentKind::Warmup,
            SegmentTargets {
                duration_ms: Some(duration_ms),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_no_reference_is_unavailable() {
        let segment = run_segment(dec!(1000));
        let result = ShadowComparator::compare(&segment, 60_000, dec!(250), None);
        assert_eq!(
            result,
            ShadowComparison::Unavailable(UnavailableReason::NoReference)
        );
        assert!(result.progress().is_none());
    }

    #[test]
    fn test_no_target_is_unavailable() {
        let segment = Segment::new(0, SegmentKind::Rest, SegmentTargets::default());
        let reference = ShadowReference::personal_best(60_000);
        let result = ShadowComparator::compare(&segment, 10_000, Decimal::ZERO, Some(&reference));
        assert_eq!(result, ShadowComparison::Unavailable(UnavailableReason::NoTarget));
    }

    #[test]
    fn test_ahead_of_reference_on_distance() {
        // Reference runs 1km in 300s; user has 500m after 120s.
        let segment = run_segment(dec!(1000));
        let reference = ShadowReference::personal_best(300_000);
        let result = ShadowComparator::compare(&segment, 120_000, dec!(500), Some(&reference));

        let progress = result.progress().unwrap();
        assert_eq!(progress.basis, ProgressBasis::Distance);
        assert!((progress.self_progress - 0.5).abs() < 1e-9);
        assert!((progress.reference_progress - 0.4).abs() < 1e-9);
        // Reference needs 150s to reach halfway, user took 120s.
        assert!((progress.time_difference_secs - 30.0).abs() < 1e-9);
        assert!(progress.is_ahead());
    }

    #[test]
    fn test_behind_reference_on_distance() {
        let segment = run_segment(dec!(1000));
        let reference = ShadowReference::personal_best(240_000);
        let result = ShadowComparator::compare(&segment, 150_000, dec!(500), Some(&reference));

        let progress = result.progress().unwrap();
        assert!((progress.time_difference_secs + 30.0).abs() < 1e-9);
        assert!(!progress.is_ahead());
    }

    #[test]
    fn test_exactly_on_pace_reports_zero() {
        let segment = run_segment(dec!(1000));
        let reference =
            ShadowReference::from_pace(TargetPace::from_seconds_per_km(300), dec!(1000));
        let result = ShadowComparator::compare(&segment, 150_000, dec!(500), Some(&reference));

        let progress = result.progress().unwrap();
        assert_eq!(progress.time_difference_secs, 0.0);
        assert_eq!(reference.source, ReferenceSource::Suggested);
    }

    #[test]
    fn test_time_basis_and_clamping() {
        let segment = timed_segment(60_000);
        let reference = ShadowReference::personal_best(50_000);
        let result = ShadowComparator::compare(&segment, 90_000, Decimal::ZERO, Some(&reference));

        let progress = result.progress().unwrap();
        assert_eq!(progress.basis, ProgressBasis::Time);
        assert_eq!(progress.self_progress, 1.0);
        assert_eq!(progress.reference_progress, 1.0);
    }

    #[test]
    fn test_distance_overshoot_clamped() {
        let segment = run_segment(dec!(1000));
        let reference = ShadowReference::personal_best(300_000);
        let result = ShadowComparator::compare(&segment, 280_000, dec!(1040), Some(&reference));
        assert_eq!(result.progress().unwrap().self_progress, 1.0);
    }

    #[test]
    fn test_empty_reference() {
        let segment = run_segment(dec!(1000));
        let reference = ShadowReference::personal_best(0);
        let result = ShadowComparator::compare(&segment, 1_000, dec!(10), Some(&reference));
        assert_eq!(
            result,
            ShadowComparison::Unavailable(UnavailableReason::EmptyReference)
        );
    }
}
