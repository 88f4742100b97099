//! The packet-cache wire surface.
//!
//! Request/response pairs served by the cache service. Every request
//! gets a response, even on error, so the requester's correlator is
//! never stranded; the outcome rides in the [`ReturnCode`]. Identifiers
//! are 64-bit, chosen by the requester, and echoed verbatim.

use serde::{Deserialize, Serialize};

use seisbus_fabric::MessageFormat;

use crate::error::CacheError;
use crate::packet::Packet;

/// Outcome of a packet-cache request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCode {
    #[default]
    Success,
    /// The sensor key is not in the cache.
    NoSensor,
    /// The request body failed to deserialize.
    InvalidMessage,
    /// The request carried an unexpected type tag.
    InvalidMessageType,
    /// The service failed internally while answering.
    AlgorithmFailure,
}

/// Query for one sensor's packets in a time window.
///
/// Times are seconds since the epoch. The query operates on packet
/// start times with an exclusive start boundary, so a caller needing
/// samples strictly covering `start_time` widens the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    #[serde(rename = "Network")]
    pub network: String,
    #[serde(rename = "Station")]
    pub station: String,
    #[serde(rename = "Channel")]
    pub channel: String,
    #[serde(rename = "LocationCode")]
    pub location: String,
    #[serde(rename = "StartTime")]
    pub start_time: f64,
    #[serde(rename = "EndTime")]
    pub end_time: f64,
    #[serde(rename = "Identifier")]
    pub id: u64,
}

impl Default for DataRequest {
    fn default() -> Self {
        Self {
            network: String::new(),
            station: String::new(),
            channel: String::new(),
            location: String::new(),
            start_time: 0.0,
            end_time: f64::MAX,
            id: 0,
        }
    }
}

impl DataRequest {
    /// Query everything for one sensor from `start_time` onward.
    pub fn from_time(
        network: &str,
        station: &str,
        channel: &str,
        location: &str,
        start_time: f64,
        id: u64,
    ) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
            channel: channel.into(),
            location: location.into(),
            start_time,
            end_time: f64::MAX,
            id,
        }
    }

    /// Query one sensor inside `(start_time, end_time]`.
    pub fn with_window(mut self, start_time: f64, end_time: f64) -> Result<Self, CacheError> {
        if start_time >= end_time {
            return Err(CacheError::InvalidWindow {
                start: start_time,
                end: end_time,
            });
        }
        self.start_time = start_time;
        self.end_time = end_time;
        Ok(self)
    }

    /// The sensor key this request addresses.
    pub fn sensor_key(&self) -> String {
        crate::packet::sensor_key(&self.network, &self.station, &self.channel, &self.location)
    }
}

impl MessageFormat for DataRequest {
    const TYPE_TAG: &'static str = "Seisbus.PacketCache.DataRequest";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    #[serde(rename = "Packets")]
    pub packets: Vec<Packet>,
    #[serde(rename = "Identifier")]
    pub id: u64,
    #[serde(rename = "ReturnCode")]
    pub return_code: ReturnCode,
}

impl MessageFormat for DataResponse {
    const TYPE_TAG: &'static str = "Seisbus.PacketCache.DataResponse";
}

/// Several data requests answered in one round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkDataRequest {
    #[serde(rename = "Requests")]
    requests: Vec<DataRequest>,
    #[serde(rename = "Identifier")]
    pub id: u64,
}

impl BulkDataRequest {
    pub fn new(id: u64) -> Self {
        Self {
            requests: Vec::new(),
            id,
        }
    }

    /// Add one request. An equal request (same sensor, window, and
    /// identifier) is rejected.
    pub fn add_data_request(&mut self, request: DataRequest) -> Result<(), CacheError> {
        if self.requests.contains(&request) {
            return Err(CacheError::DuplicateRequest(request.sensor_key()));
        }
        self.requests.push(request);
        Ok(())
    }

    pub fn requests(&self) -> &[DataRequest] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }
}

impl MessageFormat for BulkDataRequest {
    const TYPE_TAG: &'static str = "Seisbus.PacketCache.BulkDataRequest";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkDataResponse {
    #[serde(rename = "Responses")]
    pub responses: Vec<DataResponse>,
    #[serde(rename = "Identifier")]
    pub id: u64,
    #[serde(rename = "ReturnCode")]
    pub return_code: ReturnCode,
}

impl MessageFormat for BulkDataResponse {
    const TYPE_TAG: &'static str = "Seisbus.PacketCache.BulkDataResponse";
}

/// Query for the currently populated sensor keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorRequest {
    #[serde(rename = "Identifier")]
    pub id: u64,
}

impl MessageFormat for SensorRequest {
    const TYPE_TAG: &'static str = "Seisbus.PacketCache.SensorRequest";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorResponse {
    #[serde(rename = "Names")]
    pub names: Vec<String>,
    #[serde(rename = "Identifier")]
    pub id: u64,
    #[serde(rename = "ReturnCode")]
    pub return_code: ReturnCode,
}

impl MessageFormat for SensorResponse {
    const TYPE_TAG: &'static str = "Seisbus.PacketCache.SensorResponse";
}

/// Register every packet-cache format in a codec registry.
pub fn register_packet_cache_formats(
    registry: &mut seisbus_fabric::CodecRegistry,
) -> Result<(), seisbus_fabric::FabricError> {
    registry.register::<Packet>()?;
    registry.register::<DataRequest>()?;
    registry.register::<DataResponse>()?;
    registry.register::<BulkDataRequest>()?;
    registry.register::<BulkDataResponse>()?;
    registry.register::<SensorRequest>()?;
    registry.register::<SensorResponse>()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use seisbus_fabric::codec;

    fn request(channel: &str, id: u64) -> DataRequest {
        DataRequest::from_time("UU", "FORK", channel, "01", 0.0, id)
    }

    #[test]
    fn data_request_roundtrip() {
        let request = request("HHZ", 7).with_window(1.5, 9.25).unwrap();
        let bytes = codec::encode(&request).unwrap();
        assert_eq!(codec::decode::<DataRequest>(&bytes).unwrap(), request);
    }

    #[test]
    fn inverted_window_rejected() {
        assert!(request("HHZ", 1).with_window(5.0, 5.0).is_err());
        assert!(request("HHZ", 1).with_window(9.0, 5.0).is_err());
    }

    #[test]
    fn bulk_rejects_duplicates() {
        let mut bulk = BulkDataRequest::new(1);
        bulk.add_data_request(request("HHZ", 2)).unwrap();
        // Same sensor, window, and id: rejected.
        let err = bulk.add_data_request(request("HHZ", 2)).unwrap_err();
        assert!(matches!(err, CacheError::DuplicateRequest(_)));
        // A different id makes it a different request.
        bulk.add_data_request(request("HHZ", 3)).unwrap();
        // As does a different sensor.
        bulk.add_data_request(request("HHN", 2)).unwrap();
        assert_eq!(bulk.len(), 3);
    }

    #[test]
    fn bulk_roundtrip() {
        let mut bulk = BulkDataRequest::new(99);
        bulk.add_data_request(request("HHZ", 1)).unwrap();
        bulk.add_data_request(request("HHN", 2)).unwrap();
        let bytes = codec::encode(&bulk).unwrap();
        let back: BulkDataRequest = codec::decode(&bytes).unwrap();
        assert_eq!(back, bulk);
    }

    #[test]
    fn sensor_response_roundtrip() {
        let response = SensorResponse {
            names: vec!["UU.FORK.HHZ.01".into()],
            id: 5,
            return_code: ReturnCode::Success,
        };
        let bytes = codec::encode(&response).unwrap();
        assert_eq!(codec::decode::<SensorResponse>(&bytes).unwrap(), response);
    }

    #[test]
    fn formats_register_once() {
        let mut registry = seisbus_fabric::CodecRegistry::new();
        register_packet_cache_formats(&mut registry).unwrap();
        assert!(registry.contains(DataRequest::TYPE_TAG));
        assert!(register_packet_cache_formats(&mut registry).is_err());
    }
}
