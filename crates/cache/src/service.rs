//! The packet-cache service.
//!
//! A reply engine serving the wire surface in [`crate::messages`]
//! against a shared [`CappedCollection`]. The service answers every
//! request it receives: decode failures, unknown sensors, and internal
//! errors all produce a response with the matching return code, so the
//! requester's correlator is never stranded.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use seisbus_fabric::replier::{reply_handler, Replier};
use seisbus_fabric::rpc::RpcClient;
use seisbus_fabric::{Envelope, Failure, FabricError, MessageFormat, SocketOptions};

use crate::collection::CappedCollection;
use crate::error::CacheError;
use crate::messages::{
    BulkDataRequest, BulkDataResponse, DataRequest, DataResponse, ReturnCode, SensorRequest,
    SensorResponse,
};

/// A running packet-cache service.
///
/// Connects to the RPC broker's backend; the broker load-balances
/// requests across however many cache instances are connected.
pub struct PacketCacheService {
    collection: Arc<CappedCollection>,
    replier: Replier,
}

impl PacketCacheService {
    /// Connect to the broker backend and start serving.
    pub async fn start(
        options: SocketOptions,
        collection: Arc<CappedCollection>,
    ) -> Result<Self, CacheError> {
        let handler_collection = collection.clone();
        let handler = reply_handler(move |envelope| {
            let collection = handler_collection.clone();
            async move { Ok(Some(answer(&collection, &envelope))) }
        });
        let replier = Replier::start(options, None, handler).await?;
        Ok(Self {
            collection,
            replier,
        })
    }

    /// The collection this service answers from.
    pub fn collection(&self) -> &Arc<CappedCollection> {
        &self.collection
    }

    pub fn is_running(&self) -> bool {
        self.replier.is_running()
    }

    pub async fn stop(&self) {
        self.replier.stop().await;
    }
}

/// Produce the response envelope for one request envelope.
fn answer(collection: &CappedCollection, envelope: &Envelope) -> Envelope {
    match envelope.type_tag.as_str() {
        DataRequest::TYPE_TAG => {
            let response = match envelope.unpack::<DataRequest>() {
                Ok(request) => answer_data_request(collection, &request),
                Err(e) => undecodable_data_request(&e),
            };
            pack_or_failure(&response)
        }
        BulkDataRequest::TYPE_TAG => {
            let response = match envelope.unpack::<BulkDataRequest>() {
                Ok(request) => BulkDataResponse {
                    responses: request
                        .requests()
                        .iter()
                        .map(|r| answer_data_request(collection, r))
                        .collect(),
                    id: request.id,
                    return_code: ReturnCode::Success,
                },
                Err(e) => {
                    warn!(error = %e, "undecodable bulk data request");
                    BulkDataResponse {
                        responses: Vec::new(),
                        id: 0,
                        return_code: invalid_code(&e),
                    }
                }
            };
            pack_or_failure(&response)
        }
        SensorRequest::TYPE_TAG => {
            let response = match envelope.unpack::<SensorRequest>() {
                Ok(request) => SensorResponse {
                    names: collection.sensor_names(),
                    id: request.id,
                    return_code: ReturnCode::Success,
                },
                Err(e) => {
                    warn!(error = %e, "undecodable sensor request");
                    SensorResponse {
                        names: Vec::new(),
                        id: 0,
                        return_code: invalid_code(&e),
                    }
                }
            };
            pack_or_failure(&response)
        }
        other => {
            warn!(type_tag = other, "unhandled request type");
            pack_or_failure(&Failure::new(format!("Unhandled message type: {other}")))
        }
    }
}

fn answer_data_request(collection: &CappedCollection, request: &DataRequest) -> DataResponse {
    let key = request.sensor_key();
    match collection.get_packets(&key, request.start_time, request.end_time) {
        Ok(Some(packets)) => {
            debug!(sensor = %key, count = packets.len(), "data request answered");
            DataResponse {
                packets,
                id: request.id,
                return_code: ReturnCode::Success,
            }
        }
        Ok(None) => {
            debug!(sensor = %key, "data request for unknown sensor");
            DataResponse {
                packets: Vec::new(),
                id: request.id,
                return_code: ReturnCode::NoSensor,
            }
        }
        Err(e) => {
            warn!(sensor = %key, error = %e, "data request failed");
            DataResponse {
                packets: Vec::new(),
                id: request.id,
                return_code: ReturnCode::AlgorithmFailure,
            }
        }
    }
}

fn undecodable_data_request(error: &FabricError) -> DataResponse {
    warn!(error = %error, "undecodable data request");
    DataResponse {
        packets: Vec::new(),
        id: 0,
        return_code: invalid_code(error),
    }
}

fn invalid_code(error: &FabricError) -> ReturnCode {
    match error {
        FabricError::TypeMismatch { .. } => ReturnCode::InvalidMessageType,
        _ => ReturnCode::InvalidMessage,
    }
}

/// A response must go out even when encoding it fails.
fn pack_or_failure<M: MessageFormat>(message: &M) -> Envelope {
    Envelope::pack(message).unwrap_or_else(|e| {
        warn!(error = %e, "failed to encode response");
        Envelope::pack(&Failure::new("Internal service error"))
            .expect("failure message always encodes")
    })
}

/// Typed client for the packet-cache service.
pub struct PacketCacheClient {
    client: RpcClient,
}

impl PacketCacheClient {
    /// Connect to the RPC broker's frontend.
    pub async fn connect(
        endpoint: &seisbus_fabric::Endpoint,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            client: RpcClient::connect(endpoint).await?,
        })
    }

    pub async fn data_request(
        &self,
        request: &DataRequest,
        timeout: Duration,
    ) -> Result<DataResponse, CacheError> {
        Ok(self.roundtrip::<_, DataResponse>(request, timeout).await?)
    }

    pub async fn bulk_data_request(
        &self,
        request: &BulkDataRequest,
        timeout: Duration,
    ) -> Result<BulkDataResponse, CacheError> {
        Ok(self.roundtrip::<_, BulkDataResponse>(request, timeout).await?)
    }

    pub async fn sensor_request(
        &self,
        request: &SensorRequest,
        timeout: Duration,
    ) -> Result<SensorResponse, CacheError> {
        Ok(self.roundtrip::<_, SensorResponse>(request, timeout).await?)
    }

    async fn roundtrip<Request: MessageFormat, Response: MessageFormat>(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, FabricError> {
        let reply = self
            .client
            .request(&Envelope::pack(request)?, timeout)
            .await?;
        if reply.type_tag == Failure::TYPE_TAG {
            let failure = reply.unpack::<Failure>()?;
            return Err(FabricError::RemoteFailure(failure.details));
        }
        reply.unpack::<Response>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;

    fn collection_with_packets() -> CappedCollection {
        let collection = CappedCollection::new(10).unwrap();
        for i in 0..5i64 {
            collection
                .add_packet(Packet {
                    network: "UU".into(),
                    station: "FORK".into(),
                    channel: "HHZ".into(),
                    location: "01".into(),
                    sampling_rate: 100.0,
                    start_time_micros: i * 1_000_000,
                    samples: vec![0.5; 100],
                })
                .unwrap();
        }
        collection
    }

    #[test]
    fn data_request_answered() {
        let collection = collection_with_packets();
        let request = DataRequest::from_time("UU", "FORK", "HHZ", "01", 0.5, 11);
        let envelope = Envelope::pack(&request).unwrap();
        let reply = answer(&collection, &envelope);
        let response = reply.unpack::<DataResponse>().unwrap();
        assert_eq!(response.return_code, ReturnCode::Success);
        assert_eq!(response.id, 11);
        assert_eq!(response.packets.len(), 4);
    }

    #[test]
    fn unknown_sensor_reported() {
        let collection = collection_with_packets();
        let request = DataRequest::from_time("UU", "NOPE", "HHZ", "01", 0.0, 3);
        let envelope = Envelope::pack(&request).unwrap();
        let response = answer(&collection, &envelope)
            .unpack::<DataResponse>()
            .unwrap();
        assert_eq!(response.return_code, ReturnCode::NoSensor);
        assert_eq!(response.id, 3);
        assert!(response.packets.is_empty());
    }

    #[test]
    fn garbage_body_still_gets_a_response() {
        let collection = collection_with_packets();
        let envelope = Envelope::new(DataRequest::TYPE_TAG, b"not cbor".to_vec());
        let response = answer(&collection, &envelope)
            .unpack::<DataResponse>()
            .unwrap();
        assert_eq!(response.return_code, ReturnCode::InvalidMessage);
    }

    #[test]
    fn mismatched_body_tag_reported() {
        let collection = collection_with_packets();
        // A sensor-request body arriving under the data-request tag.
        let body = seisbus_fabric::codec::encode(&SensorRequest { id: 1 }).unwrap();
        let envelope = Envelope::new(DataRequest::TYPE_TAG, body);
        let response = answer(&collection, &envelope)
            .unpack::<DataResponse>()
            .unwrap();
        assert_eq!(response.return_code, ReturnCode::InvalidMessageType);
    }

    #[test]
    fn unknown_tag_answered_with_failure() {
        let collection = collection_with_packets();
        let envelope = Envelope::new("Seisbus.PacketCache.Bogus", Vec::new());
        let reply = answer(&collection, &envelope);
        assert_eq!(reply.type_tag, Failure::TYPE_TAG);
    }

    #[test]
    fn bulk_request_answers_each() {
        let collection = collection_with_packets();
        let mut bulk = BulkDataRequest::new(77);
        bulk.add_data_request(DataRequest::from_time("UU", "FORK", "HHZ", "01", 0.5, 1))
            .unwrap();
        bulk.add_data_request(DataRequest::from_time("UU", "GONE", "HHZ", "01", 0.5, 2))
            .unwrap();
        let envelope = Envelope::pack(&bulk).unwrap();
        let response = answer(&collection, &envelope)
            .unpack::<BulkDataResponse>()
            .unwrap();
        assert_eq!(response.id, 77);
        assert_eq!(response.return_code, ReturnCode::Success);
        assert_eq!(response.responses.len(), 2);
        assert_eq!(response.responses[0].return_code, ReturnCode::Success);
        assert_eq!(response.responses[1].return_code, ReturnCode::NoSensor);
    }

    #[test]
    fn sensor_enumeration() {
        let collection = collection_with_packets();
        let envelope = Envelope::pack(&SensorRequest { id: 9 }).unwrap();
        let response = answer(&collection, &envelope)
            .unpack::<SensorResponse>()
            .unwrap();
        assert_eq!(response.names, vec!["UU.FORK.HHZ.01"]);
        assert_eq!(response.id, 9);
    }
}
