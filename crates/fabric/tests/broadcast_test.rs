//! Publish/subscribe round trips, direct and through the fan-out
//! broker, plus the broker's steering verbs.

use std::sync::Arc;
use std::time::Duration;

use seisbus_fabric::broadcast::{BroadcastBroker, BroadcastConfig};
use seisbus_fabric::{CodecRegistry, Endpoint, Publisher, SocketOptions, Subscriber, Text};

fn text_registry() -> Arc<CodecRegistry> {
    let mut registry = CodecRegistry::new();
    registry.register::<Text>().unwrap();
    Arc::new(registry)
}

#[tokio::test]
async fn direct_pub_sub_roundtrip() {
    // Publisher binds, subscriber connects: the S1 wiring.
    let endpoint = Endpoint::tcp("127.0.0.1", 25100);

    let publisher = Publisher::bind(&endpoint).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let subscriber = Subscriber::connect(&endpoint)
        .await
        .unwrap()
        .with_registry(text_registry());
    subscriber.subscribe("").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher
        .publish(&Text::new("A text message"))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), subscriber.recv_message())
        .await
        .expect("timed out waiting for message")
        .unwrap();
    let text = received.downcast_ref::<Text>().unwrap();
    assert_eq!(text.contents, "A text message");
}

#[tokio::test]
async fn tag_prefix_filtering() {
    let endpoint = Endpoint::tcp("127.0.0.1", 25101);

    let publisher = Publisher::bind(&endpoint).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let subscriber = Subscriber::connect(&endpoint).await.unwrap();
    // Only command-plane tags; the Text publish below must not arrive.
    subscriber.subscribe("Seisbus.Command.").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.publish(&Text::new("filtered out")).await.unwrap();

    let result = tokio::time::timeout(Duration::from_millis(300), subscriber.recv()).await;
    assert!(result.is_err(), "filtered message must not be delivered");
}

#[tokio::test]
async fn brokered_fanout_roundtrip() {
    let config = BroadcastConfig {
        frontend: SocketOptions::new(Endpoint::tcp("127.0.0.1", 25110)),
        backend: SocketOptions::new(Endpoint::tcp("127.0.0.1", 25111)),
    };
    let broker = Arc::new(BroadcastBroker::new(config).unwrap());
    let broker_handle = tokio::spawn({
        let broker = broker.clone();
        async move { broker.run().await.unwrap() }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let publisher = Publisher::connect(&Endpoint::tcp("127.0.0.1", 25110))
        .await
        .unwrap();
    let sub1 = Subscriber::connect(&Endpoint::tcp("127.0.0.1", 25111))
        .await
        .unwrap();
    let sub2 = Subscriber::connect(&Endpoint::tcp("127.0.0.1", 25111))
        .await
        .unwrap();
    sub1.subscribe("Seisbus.").await.unwrap();
    sub2.subscribe("Seisbus.").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    publisher.publish(&Text::new("fan-out")).await.unwrap();

    // Fan-out: both subscribers get the message.
    for subscriber in [&sub1, &sub2] {
        let envelope = tokio::time::timeout(Duration::from_secs(3), subscriber.recv())
            .await
            .expect("timed out waiting for brokered message")
            .unwrap();
        assert_eq!(envelope.unpack::<Text>().unwrap().contents, "fan-out");
    }

    broker.stop();
    let _ = broker_handle.await;
}

#[tokio::test]
async fn pause_and_resume_steering() {
    let config = BroadcastConfig {
        frontend: SocketOptions::new(Endpoint::tcp("127.0.0.1", 25120)),
        backend: SocketOptions::new(Endpoint::tcp("127.0.0.1", 25121)),
    };
    let broker = Arc::new(BroadcastBroker::new(config).unwrap());
    let control = broker.control();
    let broker_handle = tokio::spawn({
        let broker = broker.clone();
        async move { broker.run().await.unwrap() }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let publisher = Publisher::connect(&Endpoint::tcp("127.0.0.1", 25120))
        .await
        .unwrap();
    let subscriber = Subscriber::connect(&Endpoint::tcp("127.0.0.1", 25121))
        .await
        .unwrap();
    subscriber.subscribe("").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    control.pause();
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.publish(&Text::new("held back")).await.unwrap();
    let while_paused =
        tokio::time::timeout(Duration::from_millis(300), subscriber.recv()).await;
    assert!(while_paused.is_err(), "paused broker must not forward");

    // Resuming drains what queued up during the pause.
    control.resume();
    let envelope = tokio::time::timeout(Duration::from_secs(3), subscriber.recv())
        .await
        .expect("timed out waiting for queued message")
        .unwrap();
    assert_eq!(envelope.unpack::<Text>().unwrap().contents, "held back");

    control.terminate();
    let _ = broker_handle.await;
    assert!(!broker.is_running());
}
