use proptest::prelude::*;
use std::time::{Duration, Instant};
use treadmill_link::calories::{CalorieModel, Gait};
use treadmill_link::command::{encode, to_hex};
use treadmill_link::notification::{decode, Decoded, IgnoreReason, MIN_FRAME_LEN};
use treadmill_link::{MetricSample, SessionAggregator};

fn hex_string() -> impl Strategy<Value = String> {
    prop::collection::vec(any::<u8>(), 0..64).prop_map(|bytes| {
        bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>()
    })
}

/// Positive gaps in milliseconds between consecutive samples
fn gaps() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1u64..5_000, 1..40)
}

#[test]
fn hex_round_trip() {
    proptest!(|(hex in hex_string())| {
        let bytes = encode(&hex).unwrap();
        prop_assert_eq!(bytes.len(), hex.len() / 2);
        prop_assert_eq!(to_hex(&bytes), hex);
    });
}

#[test]
fn odd_length_hex_rejected() {
    proptest!(|(hex in hex_string(), extra in "[0-9a-f]")| {
        let odd = format!("{}{}", hex, extra);
        prop_assert!(encode(&odd).is_err());
    });
}

#[test]
fn short_frames_ignored() {
    proptest!(|(data in prop::collection::vec(any::<u8>(), 0..MIN_FRAME_LEN))| {
        let decoded = decode(&data, Instant::now());
        prop_assert_eq!(decoded, Decoded::Ignored(IgnoreReason::TooShort(data.len())));
    });
}

#[test]
fn non_telemetry_markers_ignored() {
    proptest!(|(
        marker in 1u8..=255,
        rest in prop::collection::vec(any::<u8>(), MIN_FRAME_LEN..64),
    )| {
        let mut data = rest;
        data[0] = marker;
        prop_assert!(decode(&data, Instant::now()).is_ignored());
    });
}

#[test]
fn calories_grow_while_moving() {
    proptest!(|(
        gaps in gaps(),
        speed in 0.2f64..20.0,
        incline in 0.0f64..10.0,
    )| {
        let mut aggregator = SessionAggregator::default();
        let mut now = Instant::now();
        aggregator.ingest(MetricSample::new(speed, incline, 0.0, now));

        let mut previous = aggregator.accumulated_calories();
        for gap in gaps {
            now += Duration::from_millis(gap);
            aggregator.ingest(MetricSample::new(speed, incline, 0.0, now));
            let current = aggregator.accumulated_calories();
            prop_assert!(current > previous, "{} -> {}", previous, current);
            previous = current;
        }
    });
}

#[test]
fn stale_samples_add_nothing() {
    proptest!(|(
        gaps in gaps(),
        back_ms in 0u64..10_000,
        speed in 0.2f64..20.0,
    )| {
        let mut aggregator = SessionAggregator::default();
        let start = Instant::now() + Duration::from_secs(60);
        let mut now = start;
        aggregator.ingest(MetricSample::new(speed, 1.0, 0.0, now));
        for gap in gaps {
            now += Duration::from_millis(gap);
            aggregator.ingest(MetricSample::new(speed, 1.0, 0.0, now));
        }

        let before = aggregator.accumulated_calories();
        let stale = now.checked_sub(Duration::from_millis(back_ms)).unwrap_or(now);
        aggregator.ingest(MetricSample::new(speed, 1.0, 0.0, stale));
        prop_assert_eq!(aggregator.accumulated_calories(), before);
    });
}

#[test]
fn walking_equation_up_to_threshold() {
    let model = CalorieModel::default();
    assert_eq!(model.gait(6.0), Gait::Walking);
    assert_eq!(model.gait(6.01), Gait::Running);

    proptest!(|(speed in 0.0f64..=6.0, incline in 0.0f64..15.0)| {
        let speed_m_min = speed * 1000.0 / 60.0;
        let grade = incline.to_radians().tan();
        let walking = 3.5 + 0.1 * speed_m_min + 1.8 * speed_m_min * grade;
        prop_assert!((model.vo2(speed, incline) - walking).abs() < 1e-9);
    });
}
