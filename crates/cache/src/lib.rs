//! seisbus-cache: the waveform packet cache.
//!
//! A capped, per-sensor circular buffer of waveform packets with
//! time-range queries, plus the request/reply service that exposes it
//! over the messaging fabric.

pub mod collection;
pub mod error;
pub mod messages;
pub mod packet;
pub mod ring;
pub mod service;

pub use collection::CappedCollection;
pub use error::CacheError;
pub use messages::{
    register_packet_cache_formats, BulkDataRequest, BulkDataResponse, DataRequest, DataResponse,
    ReturnCode, SensorRequest, SensorResponse,
};
pub use packet::{sensor_key, Packet};
pub use ring::CircularBuffer;
pub use service::{PacketCacheClient, PacketCacheService};
