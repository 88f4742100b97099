//! Property tests for the ring invariants: strict ordering, bounded
//! size, and newest-wins deduplication under arbitrary insert orders.

use proptest::prelude::*;

use seisbus_cache::{CircularBuffer, Packet};

fn packet(start_micros: i64, marker: f64) -> Packet {
    Packet {
        network: "UU".into(),
        station: "FORK".into(),
        channel: "HHZ".into(),
        location: "01".into(),
        sampling_rate: 100.0,
        start_time_micros: start_micros,
        samples: vec![marker; 10],
    }
}

fn ring(capacity: usize) -> CircularBuffer {
    CircularBuffer::new("UU", "FORK", "HHZ", "01", capacity).unwrap()
}

proptest! {
    /// After any interleaving of inserts, the ring is strictly sorted
    /// and never exceeds its capacity.
    #[test]
    fn sorted_and_bounded(
        starts in prop::collection::vec(-50i64..50, 0..200),
        capacity in 1usize..20,
    ) {
        let mut buffer = ring(capacity);
        for (i, t) in starts.iter().enumerate() {
            buffer.add_packet(packet(*t, i as f64)).unwrap();
        }
        let retained = buffer.packets();
        prop_assert!(retained.len() <= capacity);
        for pair in retained.windows(2) {
            prop_assert!(pair[0].start_time_micros < pair[1].start_time_micros);
        }
    }

    /// N + k strictly increasing appends leave exactly the last N.
    #[test]
    fn increasing_appends_keep_the_tail(
        count in 1usize..100,
        capacity in 1usize..20,
    ) {
        let mut buffer = ring(capacity);
        for t in 0..count as i64 {
            buffer.add_packet(packet(t, t as f64)).unwrap();
        }
        let start = count.saturating_sub(capacity) as i64;
        let expected: Vec<i64> = (start..count as i64).collect();
        let retained: Vec<i64> = buffer
            .packets()
            .iter()
            .map(|p| p.start_time_micros)
            .collect();
        prop_assert_eq!(retained, expected);
    }

    /// Two inserts with the same start time leave one entry equal to
    /// the second.
    #[test]
    fn equal_start_time_dedupes(
        t in -1000i64..1000,
        others in prop::collection::vec(-1000i64..1000, 0..20),
    ) {
        let mut buffer = ring(64);
        for (i, other) in others.iter().enumerate() {
            if *other != t {
                buffer.add_packet(packet(*other, i as f64)).unwrap();
            }
        }
        buffer.add_packet(packet(t, 1.0)).unwrap();
        let before = buffer.len();
        buffer.add_packet(packet(t, 2.0)).unwrap();
        prop_assert_eq!(buffer.len(), before);

        let winner = buffer
            .packets()
            .into_iter()
            .find(|p| p.start_time_micros == t)
            .expect("entry must be present");
        prop_assert_eq!(winner.samples, vec![2.0; 10]);
    }

    /// Every range query returns a sorted subset inside (t0, t1].
    #[test]
    fn range_queries_sorted_and_windowed(
        starts in prop::collection::vec(-100i64..100, 0..100),
        t0 in -120i64..120,
        span in 1i64..120,
    ) {
        let mut buffer = ring(32);
        for (i, t) in starts.iter().enumerate() {
            buffer.add_packet(packet(*t, i as f64)).unwrap();
        }
        let t1 = t0 + span;
        let result = buffer.packets_between(t0, t1);
        for pair in result.windows(2) {
            prop_assert!(pair[0].start_time_micros < pair[1].start_time_micros);
        }
        for p in &result {
            prop_assert!(p.start_time_micros > t0);
            prop_assert!(p.start_time_micros <= t1);
        }
        // Cross-check against a brute-force filter of the ring.
        let expected: Vec<i64> = buffer
            .packets()
            .iter()
            .map(|p| p.start_time_micros)
            .filter(|t| *t > t0 && *t <= t1)
            .collect();
        let actual: Vec<i64> = result.iter().map(|p| p.start_time_micros).collect();
        prop_assert_eq!(actual, expected);
    }
}
