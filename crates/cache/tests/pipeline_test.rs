//! The full data plane: a producer publishing waveform packets through
//! the fan-out broker, an ingest task feeding the cache, and an
//! operator querying it through the RPC broker.

use std::sync::Arc;
use std::time::Duration;

use seisbus_cache::{
    CappedCollection, DataRequest, Packet, PacketCacheClient, PacketCacheService, ReturnCode,
    SensorRequest,
};
use seisbus_fabric::broadcast::{BroadcastBroker, BroadcastConfig};
use seisbus_fabric::rpc::{RpcBroker, RpcConfig};
use seisbus_fabric::{Endpoint, MessageFormat, Publisher, SocketOptions, Subscriber};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

fn socket_options(port: u16) -> SocketOptions {
    SocketOptions::new(Endpoint::tcp("127.0.0.1", port))
        .with_polling_timeout(Duration::from_millis(10))
}

fn packet(channel: &str, start_seconds: i64) -> Packet {
    Packet {
        network: "UU".into(),
        station: "FORK".into(),
        channel: channel.into(),
        location: "01".into(),
        sampling_rate: 100.0,
        start_time_micros: start_seconds * 1_000_000,
        samples: vec![start_seconds as f64; 100],
    }
}

#[tokio::test]
async fn packets_flow_from_producer_to_query() {
    // Fan-out broker for the data stream.
    let broadcast = Arc::new(
        BroadcastBroker::new(BroadcastConfig {
            frontend: socket_options(25400),
            backend: socket_options(25401),
        })
        .unwrap(),
    );
    let broadcast_handle = tokio::spawn({
        let broker = broadcast.clone();
        async move { broker.run().await.unwrap() }
    });

    // RPC broker for the query plane.
    let rpc = Arc::new(
        RpcBroker::new(RpcConfig {
            frontend: socket_options(25402),
            backend: socket_options(25403),
        })
        .unwrap(),
    );
    let rpc_handle = tokio::spawn({
        let broker = rpc.clone();
        async move { broker.run().await.unwrap() }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Ingest: subscribe to waveform packets and feed the collection.
    let collection = Arc::new(CappedCollection::new(100).unwrap());
    let subscriber = Subscriber::connect(&Endpoint::tcp("127.0.0.1", 25401))
        .await
        .unwrap();
    subscriber.subscribe(Packet::TYPE_TAG).await.unwrap();
    let ingest_collection = collection.clone();
    let ingest = tokio::spawn(async move {
        loop {
            if let Ok(envelope) = subscriber.recv().await {
                if let Ok(packet) = envelope.unpack::<Packet>() {
                    let _ = ingest_collection.add_packet(packet);
                }
            }
        }
    });

    // Serve the cache behind the RPC broker.
    let service = PacketCacheService::start(socket_options(25403), collection.clone())
        .await
        .unwrap();

    // Producer publishes through the fan-out broker.
    let publisher = Publisher::connect(&Endpoint::tcp("127.0.0.1", 25400))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    for i in 0..10 {
        publisher.publish(&packet("HHZ", i)).await.unwrap();
    }

    // Wait until the ingest task has drained the stream.
    let mut ingested = 0;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        ingested = collection.total_packets();
        if ingested == 10 {
            break;
        }
    }
    assert_eq!(ingested, 10, "all published packets must reach the cache");

    // Operator queries the cache through the RPC broker.
    let client = PacketCacheClient::connect(&Endpoint::tcp("127.0.0.1", 25402))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sensors = client
        .sensor_request(&SensorRequest { id: 1 }, REQUEST_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(sensors.names, vec!["UU.FORK.HHZ.01"]);

    let request = DataRequest::from_time("UU", "FORK", "HHZ", "01", 2.5, 2);
    let response = client.data_request(&request, REQUEST_TIMEOUT).await.unwrap();
    assert_eq!(response.return_code, ReturnCode::Success);
    let starts: Vec<i64> = response
        .packets
        .iter()
        .map(|p| p.start_time_micros / 1_000_000)
        .collect();
    assert_eq!(starts, vec![3, 4, 5, 6, 7, 8, 9]);

    // Tear the whole pipeline down.
    service.stop().await;
    ingest.abort();
    let _ = ingest.await;
    rpc.stop();
    broadcast.stop();
    let _ = rpc_handle.await;
    let _ = broadcast_handle.await;
}
