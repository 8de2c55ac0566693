use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_decimal_macros::dec;

use hybridrs::sync::{SyncPayload, SyncSnapshot};
use hybridrs::{
    aggregate, hybrid_race_plan, CompromiseThresholds, Sample, SessionSettings, SessionStatus,
    WorkoutSession,
};

/// Throughput of the hot paths a sensor host drives: ticks, samples,
/// aggregation and snapshot framing.

fn start_session() -> WorkoutSession {
    let plan = hybrid_race_plan().unwrap();
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
    WorkoutSession::begin(plan, None, start, SessionSettings::default()).unwrap()
}

fn bench_tick_and_samples(c: &mut Criterion) {
    let mut group = c.benchmark_group("Live Samples");

    for &count in &[100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("tick_plus_hr", count), &count, |b, &count| {
            b.iter(|| {
                let mut session = start_session();
                let start = session.started_at();
                for i in 1..=count {
                    session.tick(start + Duration::milliseconds(i as i64 * 250)).unwrap();
                    session.record_sample(Sample::HeartRate(140 + (i % 30) as u16)).unwrap();
                    session.record_sample(Sample::Distance(dec!(1.1))).unwrap();
                }
                black_box(session.active_elapsed_ms())
            });
        });
    }

    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut session = start_session();
    let start = session.started_at();
    let total = session.segments().len();
    for index in 0..total {
        let now = start + Duration::seconds((index as i64 + 1) * 240);
        for _ in 0..50 {
            session.record_sample(Sample::HeartRate(155)).unwrap();
        }
        session.complete_current_segment(now).unwrap();
        if index + 1 < total {
            session.start_next_segment(None, now).unwrap();
        }
    }
    let plan = session.segments().to_vec();
    let frozen = session.frozen_metrics().to_vec();
    let thresholds = CompromiseThresholds::default();

    c.bench_function("aggregate_full_race", |b| {
        b.iter(|| {
            aggregate(
                black_box(session.workout_id()),
                SessionStatus::Completed,
                black_box(&frozen),
                &plan,
                &thresholds,
            )
        })
    });
}

fn bench_snapshot_frames(c: &mut Criterion) {
    let session = start_session();
    let snapshot: SyncSnapshot = session.snapshot();

    c.bench_function("snapshot_encode_decode", |b| {
        b.iter(|| {
            let frame = SyncPayload::from(black_box(snapshot)).encode().unwrap();
            SyncPayload::decode(&frame).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_tick_and_samples,
    bench_aggregate,
    bench_snapshot_frames
);
criterion_main!(benches);
