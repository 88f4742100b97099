//! Waveform packets and sensor identities.

use serde::{Deserialize, Serialize};

use seisbus_fabric::MessageFormat;

use crate::error::CacheError;

/// One waveform packet from a single sensor channel.
///
/// Start time is in microseconds since the epoch; the end time is
/// derived from the sample count and rate. A packet missing any part of
/// its sensor identity, its sampling rate, or its samples is invalid
/// and rejected by the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    #[serde(rename = "Network")]
    pub network: String,
    #[serde(rename = "Station")]
    pub station: String,
    #[serde(rename = "Channel")]
    pub channel: String,
    #[serde(rename = "LocationCode")]
    pub location: String,
    /// Samples per second; must be positive.
    #[serde(rename = "SamplingRate")]
    pub sampling_rate: f64,
    /// Time of the first sample, microseconds since the epoch.
    #[serde(rename = "StartTime")]
    pub start_time_micros: i64,
    #[serde(rename = "Data")]
    pub samples: Vec<f64>,
}

impl Packet {
    /// Time of the last sample, microseconds since the epoch:
    /// `start + (n - 1) / rate`.
    pub fn end_time_micros(&self) -> i64 {
        if self.samples.is_empty() || self.sampling_rate <= 0.0 {
            return self.start_time_micros;
        }
        let span = (self.samples.len() as f64 - 1.0) / self.sampling_rate * 1_000_000.0;
        self.start_time_micros + span.round() as i64
    }

    /// The sensor key string `NET.STA.CHA.LOC`.
    pub fn sensor_key(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.network, self.station, self.channel, self.location
        )
    }

    /// Validity rule: full sensor identity, positive rate, at least one
    /// sample.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.network.is_empty() {
            return Err(CacheError::InvalidPacket("network is not set".into()));
        }
        if self.station.is_empty() {
            return Err(CacheError::InvalidPacket("station is not set".into()));
        }
        if self.channel.is_empty() {
            return Err(CacheError::InvalidPacket("channel is not set".into()));
        }
        if self.location.is_empty() {
            return Err(CacheError::InvalidPacket("location code is not set".into()));
        }
        if self.sampling_rate <= 0.0 {
            return Err(CacheError::InvalidPacket(format!(
                "sampling rate {} is not positive",
                self.sampling_rate
            )));
        }
        if self.samples.is_empty() {
            return Err(CacheError::InvalidPacket("packet has no samples".into()));
        }
        Ok(())
    }
}

/// Packets are first-class wire messages: producers publish them
/// through the fan-out broker and the cache service returns them in
/// data responses.
impl MessageFormat for Packet {
    const TYPE_TAG: &'static str = "Seisbus.Format.DataPacket";
}

/// Format a sensor key from its four components.
pub fn sensor_key(network: &str, station: &str, channel: &str, location: &str) -> String {
    format!("{network}.{station}.{channel}.{location}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet() -> Packet {
        Packet {
            network: "UU".into(),
            station: "FORK".into(),
            channel: "HHZ".into(),
            location: "01".into(),
            sampling_rate: 100.0,
            start_time_micros: 1_000_000,
            samples: vec![0.0; 100],
        }
    }

    #[test]
    fn valid_packet_passes() {
        packet().validate().unwrap();
    }

    #[test]
    fn end_time_derivation() {
        // 100 samples at 100 Hz: 99 inter-sample gaps of 10 ms.
        assert_eq!(packet().end_time_micros(), 1_000_000 + 990_000);
    }

    #[test]
    fn single_sample_spans_nothing() {
        let mut p = packet();
        p.samples = vec![1.0];
        assert_eq!(p.end_time_micros(), p.start_time_micros);
    }

    #[test]
    fn sensor_key_format() {
        assert_eq!(packet().sensor_key(), "UU.FORK.HHZ.01");
        assert_eq!(sensor_key("UU", "FORK", "HHZ", "01"), "UU.FORK.HHZ.01");
    }

    #[test]
    fn wire_roundtrip() {
        let p = packet();
        let bytes = seisbus_fabric::codec::encode(&p).unwrap();
        assert_eq!(seisbus_fabric::codec::decode::<Packet>(&bytes).unwrap(), p);
    }

    #[test]
    fn invalid_packets_rejected() {
        let mut p = packet();
        p.network.clear();
        assert!(p.validate().is_err());

        let mut p = packet();
        p.sampling_rate = 0.0;
        assert!(p.validate().is_err());

        let mut p = packet();
        p.samples.clear();
        assert!(p.validate().is_err());
    }
}
