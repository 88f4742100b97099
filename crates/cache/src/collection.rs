//! The capped collection: one ring per sensor key.
//!
//! Sized for thousands of sensors with thousands of packets each.
//! Synchronization is per ring; cross-sensor operations take a brief
//! collection-level lock to resolve the key, never holding it during a
//! ring operation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::CacheError;
use crate::packet::Packet;
use crate::ring::CircularBuffer;

/// Convert a query time in seconds-since-epoch to microseconds.
fn seconds_to_micros(seconds: f64) -> i64 {
    let micros = (seconds * 1_000_000.0).round();
    if micros >= i64::MAX as f64 {
        i64::MAX
    } else if micros <= i64::MIN as f64 {
        i64::MIN
    } else {
        micros as i64
    }
}

/// Mapping from sensor key to its packet ring.
pub struct CappedCollection {
    rings: Mutex<HashMap<String, Arc<Mutex<CircularBuffer>>>>,
    max_packets: usize,
}

impl CappedCollection {
    /// Create a collection whose rings each hold up to `max_packets`.
    pub fn new(max_packets: usize) -> Result<Self, CacheError> {
        if max_packets == 0 {
            return Err(CacheError::ZeroCapacity);
        }
        Ok(Self {
            rings: Mutex::new(HashMap::new()),
            max_packets,
        })
    }

    /// Insert one packet, creating the sensor's ring on first sight.
    pub fn add_packet(&self, packet: Packet) -> Result<(), CacheError> {
        packet.validate()?;
        let key = packet.sensor_key();
        let ring = {
            let mut rings = self.rings.lock().expect("collection poisoned");
            match rings.get(&key) {
                Some(ring) => ring.clone(),
                None => {
                    debug!(sensor = %key, "adding sensor ring");
                    let ring = Arc::new(Mutex::new(CircularBuffer::new(
                        &packet.network,
                        &packet.station,
                        &packet.channel,
                        &packet.location,
                        self.max_packets,
                    )?));
                    rings.insert(key.clone(), ring.clone());
                    ring
                }
            }
        };
        let result = ring.lock().expect("ring poisoned").add_packet(packet);
        result
    }

    /// True if the sensor has a ring.
    pub fn have_sensor(&self, key: &str) -> bool {
        self.rings
            .lock()
            .expect("collection poisoned")
            .contains_key(key)
    }

    /// The currently populated sensor keys.
    pub fn sensor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .rings
            .lock()
            .expect("collection poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Packets for `key` with start time in `(t0, t1]`, both in
    /// seconds since the epoch. `None` when the sensor is unknown.
    ///
    /// The window must satisfy `t0 < t1`; the start boundary is
    /// exclusive (see [`CircularBuffer::packets_between`]).
    pub fn get_packets(
        &self,
        key: &str,
        t0_seconds: f64,
        t1_seconds: f64,
    ) -> Result<Option<Vec<Packet>>, CacheError> {
        if t0_seconds >= t1_seconds {
            return Err(CacheError::InvalidWindow {
                start: t0_seconds,
                end: t1_seconds,
            });
        }
        let Some(ring) = self.ring(key) else {
            return Ok(None);
        };
        let packets = ring
            .lock()
            .expect("ring poisoned")
            .packets_between(seconds_to_micros(t0_seconds), seconds_to_micros(t1_seconds));
        Ok(Some(packets))
    }

    /// Packets for `key` from `t0` (exclusive, seconds) to the newest.
    pub fn get_packets_from(
        &self,
        key: &str,
        t0_seconds: f64,
    ) -> Result<Option<Vec<Packet>>, CacheError> {
        let Some(ring) = self.ring(key) else {
            return Ok(None);
        };
        let packets = ring
            .lock()
            .expect("ring poisoned")
            .packets_from(seconds_to_micros(t0_seconds));
        Ok(Some(packets))
    }

    /// Number of packets for one sensor, `None` when unknown.
    pub fn packet_count(&self, key: &str) -> Option<usize> {
        self.ring(key)
            .map(|ring| ring.lock().expect("ring poisoned").len())
    }

    /// Total packets across every sensor.
    pub fn total_packets(&self) -> usize {
        let rings: Vec<_> = {
            self.rings
                .lock()
                .expect("collection poisoned")
                .values()
                .cloned()
                .collect()
        };
        rings
            .iter()
            .map(|ring| ring.lock().expect("ring poisoned").len())
            .sum()
    }

    fn ring(&self, key: &str) -> Option<Arc<Mutex<CircularBuffer>>> {
        self.rings
            .lock()
            .expect("collection poisoned")
            .get(key)
            .cloned()
    }
}
