//! The per-sensor packet ring.
//!
//! A bounded deque of packets for one sensor key, kept strictly sorted
//! by start time. The hot path is appending the newest packet; backfill
//! into the middle shifts elements and is expected to be rare.

use std::collections::VecDeque;

use crate::error::CacheError;
use crate::packet::Packet;

/// Bounded ring of packets for one sensor, sorted by start time.
#[derive(Debug, Clone)]
pub struct CircularBuffer {
    name: String,
    packets: VecDeque<Packet>,
    capacity: usize,
}

impl CircularBuffer {
    /// Create a ring for the sensor the packet identity names.
    pub fn new(
        network: &str,
        station: &str,
        channel: &str,
        location: &str,
        capacity: usize,
    ) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::ZeroCapacity);
        }
        if network.is_empty() || station.is_empty() || channel.is_empty() || location.is_empty() {
            return Err(CacheError::InvalidPacket(
                "sensor identity component is empty".into(),
            ));
        }
        Ok(Self {
            name: crate::packet::sensor_key(network, station, channel, location),
            packets: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// The sensor key this ring holds packets for.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start time of the oldest retained packet.
    pub fn earliest_start_time(&self) -> Option<i64> {
        self.packets.front().map(|p| p.start_time_micros)
    }

    /// Insert one packet.
    ///
    /// Four cases: append when the ring is empty or the packet is
    /// newest (the hot path); silently drop a backfill older than the
    /// oldest retained packet when full; overwrite in place on an equal
    /// start time (newest wins); otherwise shift the ring to backfill.
    /// The ring never exceeds its capacity and stays strictly sorted.
    pub fn add_packet(&mut self, packet: Packet) -> Result<(), CacheError> {
        packet.validate()?;
        let key = packet.sensor_key();
        if key != self.name {
            return Err(CacheError::WrongSensor {
                packet: key,
                buffer: self.name.clone(),
            });
        }
        self.insert(packet);
        debug_assert!(
            self.packets
                .iter()
                .zip(self.packets.iter().skip(1))
                .all(|(a, b)| a.start_time_micros < b.start_time_micros),
            "ring must stay strictly sorted by start time"
        );
        debug_assert!(self.packets.len() <= self.capacity);
        Ok(())
    }

    fn insert(&mut self, packet: Packet) {
        let t0 = packet.start_time_micros;

        if self.packets.is_empty() {
            self.packets.push_back(packet);
            return;
        }

        // Most data arrives in order: new packet at the end.
        let newest = self.packets.back().expect("non-empty").start_time_micros;
        if t0 > newest {
            self.packets.push_back(packet);
            if self.packets.len() > self.capacity {
                self.packets.pop_front();
            }
            return;
        }

        // The joy of backfilling begins. Too old to keep?
        let oldest = self.packets.front().expect("non-empty").start_time_micros;
        if t0 < oldest && self.packets.len() == self.capacity {
            return;
        }

        // First entry at or after this start time.
        let index = self
            .packets
            .partition_point(|p| p.start_time_micros < t0);
        if let Some(neighbor) = self.packets.get(index) {
            if neighbor.start_time_micros == t0 {
                self.packets[index] = packet;
                return;
            }
        }
        self.packets.insert(index, packet);
        if self.packets.len() > self.capacity {
            self.packets.pop_front();
        }
    }

    /// All retained packets in start-time order.
    pub fn packets(&self) -> Vec<Packet> {
        self.packets.iter().cloned().collect()
    }

    /// Packets with start time in `(t0, t1]`, microseconds.
    ///
    /// The boundary is a strict upper bound at `t0`: a packet starting
    /// exactly at `t0` is excluded, so callers needing samples covering
    /// `t0` must widen the query. When `t1` is at or past the newest
    /// start time the range runs to the end of the ring.
    pub fn packets_between(&self, t0: i64, t1: i64) -> Vec<Packet> {
        if self.packets.is_empty() {
            return Vec::new();
        }
        let begin = self.packets.partition_point(|p| p.start_time_micros <= t0);
        if begin == self.packets.len() {
            return Vec::new();
        }
        let newest = self.packets.back().expect("non-empty").start_time_micros;
        let end = if t1 < newest {
            self.packets.partition_point(|p| p.start_time_micros <= t1)
        } else {
            self.packets.len()
        };
        if begin >= end {
            return Vec::new();
        }
        self.packets.range(begin..end).cloned().collect()
    }

    /// Packets with start time after `t0`, to the end of the ring.
    pub fn packets_from(&self, t0: i64) -> Vec<Packet> {
        self.packets_between(t0, i64::MAX)
    }
}
