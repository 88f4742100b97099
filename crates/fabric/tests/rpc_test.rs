//! Load-balanced request/reply through the ROUTER/DEALER broker.

use std::sync::Arc;
use std::time::Duration;

use seisbus_fabric::replier::{reply_handler, Replier};
use seisbus_fabric::rpc::{RpcBroker, RpcConfig};
use seisbus_fabric::{Endpoint, Envelope, SocketOptions, Text};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

fn socket_options(port: u16) -> SocketOptions {
    SocketOptions::new(Endpoint::tcp("127.0.0.1", port))
        .with_polling_timeout(Duration::from_millis(10))
}

async fn start_broker(
    frontend_port: u16,
    backend_port: u16,
) -> (Arc<RpcBroker>, tokio::task::JoinHandle<()>) {
    let config = RpcConfig {
        frontend: socket_options(frontend_port),
        backend: socket_options(backend_port),
    };
    let broker = Arc::new(RpcBroker::new(config).unwrap());
    let handle = tokio::spawn({
        let broker = broker.clone();
        async move { broker.run().await.unwrap() }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    (broker, handle)
}

fn echo_handler() -> seisbus_fabric::ReplyHandler {
    reply_handler(|envelope: Envelope| async move {
        let request = envelope.unpack::<Text>()?;
        Ok(Some(Envelope::pack(&Text::new(format!(
            "echo: {}",
            request.contents
        )))?))
    })
}

#[tokio::test]
async fn request_reply_roundtrip() {
    let (broker, broker_handle) = start_broker(25200, 25201).await;
    let worker = Replier::start(socket_options(25201), None, echo_handler())
        .await
        .unwrap();

    let client = seisbus_fabric::RpcClient::connect(&Endpoint::tcp("127.0.0.1", 25200))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let request = Envelope::pack(&Text::new("ping")).unwrap();
    let reply = client.request(&request, REQUEST_TIMEOUT).await.unwrap();
    assert_eq!(reply.unpack::<Text>().unwrap().contents, "echo: ping");

    worker.stop().await;
    broker.stop();
    let _ = broker_handle.await;
}

#[tokio::test]
async fn worker_pool_answers_every_request() {
    let (broker, broker_handle) = start_broker(25210, 25211).await;
    let worker_a = Replier::start(socket_options(25211), None, echo_handler())
        .await
        .unwrap();
    let worker_b = Replier::start(socket_options(25211), None, echo_handler())
        .await
        .unwrap();

    let client = seisbus_fabric::RpcClient::connect(&Endpoint::tcp("127.0.0.1", 25210))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The broker's DEALER spreads these across the pool; every request
    // must come back answered regardless of which worker served it.
    for i in 0..6 {
        let request = Envelope::pack(&Text::new(format!("request-{i}"))).unwrap();
        let reply = client.request(&request, REQUEST_TIMEOUT).await.unwrap();
        assert_eq!(
            reply.unpack::<Text>().unwrap().contents,
            format!("echo: request-{i}")
        );
    }

    worker_a.stop().await;
    worker_b.stop().await;
    broker.stop();
    let _ = broker_handle.await;
}

#[tokio::test]
async fn handler_error_times_out_the_client() {
    let (broker, broker_handle) = start_broker(25220, 25221).await;

    // A handler that always fails: the engine sends no reply and the
    // client observes its own timeout.
    let failing = reply_handler(|_envelope: Envelope| async move {
        Err(seisbus_fabric::FabricError::Handler(
            "refusing to answer".into(),
        ))
    });
    let worker = Replier::start(socket_options(25221), None, failing)
        .await
        .unwrap();

    let client = seisbus_fabric::RpcClient::connect(&Endpoint::tcp("127.0.0.1", 25220))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let request = Envelope::pack(&Text::new("doomed")).unwrap();
    let err = client
        .request(&request, Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(matches!(err, seisbus_fabric::FabricError::Timeout(_)));

    worker.stop().await;
    broker.stop();
    let _ = broker_handle.await;
}
