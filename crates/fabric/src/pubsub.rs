//! Publisher and subscriber socket wrappers.
//!
//! Messages travel as the two-frame envelope `[type_tag, body]`; the
//! type tag doubles as the subscription topic, so consumers filter by
//! tag prefix and the broker forwards everything unmodified.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeromq::prelude::*;
use zeromq::{PubSocket, SubSocket};

use crate::codec::{AnyMessage, CodecRegistry, MessageFormat};
use crate::envelope::Envelope;
use crate::error::FabricError;
use crate::transport::Endpoint;

/// PUB socket for producing messages into the fabric.
///
/// Connect to the fan-out broker's frontend for brokered delivery, or
/// bind directly when producers are the stable endpoint.
pub struct Publisher {
    socket: Mutex<PubSocket>,
    endpoint: Endpoint,
    bound: bool,
}

impl Publisher {
    /// Connect to a broker frontend (the usual deployment).
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, FabricError> {
        let mut socket = PubSocket::new();
        info!("connecting PUB socket");
        socket.connect(&endpoint.address()).await?;
        Ok(Self {
            socket: Mutex::new(socket),
            endpoint: endpoint.clone(),
            bound: false,
        })
    }

    /// Bind directly; subscribers connect to this publisher.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, FabricError> {
        endpoint.ensure_ipc_dir()?;
        endpoint.remove_stale_socket()?;
        let mut socket = PubSocket::new();
        info!("binding PUB socket");
        socket.bind(&endpoint.address()).await?;
        Ok(Self {
            socket: Mutex::new(socket),
            endpoint: endpoint.clone(),
            bound: true,
        })
    }

    /// Publish a typed message as a two-frame envelope.
    pub async fn publish<M: MessageFormat>(&self, message: &M) -> Result<(), FabricError> {
        self.publish_envelope(&Envelope::pack(message)?).await
    }

    /// Publish an already-encoded envelope.
    pub async fn publish_envelope(&self, envelope: &Envelope) -> Result<(), FabricError> {
        let mut socket = self.socket.lock().await;
        socket.send(envelope.to_zmq()).await?;
        debug!(type_tag = %envelope.type_tag, "published message");
        Ok(())
    }

    /// Tear down the socket, unlinking the IPC file if this side bound it.
    pub async fn disconnect(&self) {
        if self.bound {
            self.endpoint.unlink_ipc_file();
        }
    }
}

/// SUB socket for consuming filtered message streams.
pub struct Subscriber {
    socket: Mutex<SubSocket>,
    registry: Option<Arc<CodecRegistry>>,
}

impl Subscriber {
    /// Connect to a broker backend (or directly to a bound publisher).
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, FabricError> {
        let mut socket = SubSocket::new();
        info!("connecting SUB socket");
        socket.connect(&endpoint.address()).await?;
        Ok(Self {
            socket: Mutex::new(socket),
            registry: None,
        })
    }

    /// Attach a codec registry so [`recv_message`](Self::recv_message)
    /// can return typed values.
    pub fn with_registry(mut self, registry: Arc<CodecRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Subscribe to messages whose type tag starts with the prefix.
    /// An empty prefix subscribes to everything.
    pub async fn subscribe(&self, tag_prefix: &str) -> Result<(), FabricError> {
        let mut socket = self.socket.lock().await;
        socket.subscribe(tag_prefix).await?;
        info!(tag_prefix, "subscribed");
        Ok(())
    }

    pub async fn unsubscribe(&self, tag_prefix: &str) -> Result<(), FabricError> {
        let mut socket = self.socket.lock().await;
        socket.unsubscribe(tag_prefix).await?;
        Ok(())
    }

    /// Receive the next envelope. Blocks until a matching message arrives.
    ///
    /// A message that is not exactly two frames is malformed; the error
    /// is returned so the caller can log and drop it.
    pub async fn recv(&self) -> Result<Envelope, FabricError> {
        let mut socket = self.socket.lock().await;
        let message = socket.recv().await?;
        let envelope = Envelope::from_zmq(&message)?;
        debug!(type_tag = %envelope.type_tag, "received message");
        Ok(envelope)
    }

    /// Receive and decode the next message through the registry.
    pub async fn recv_message(&self) -> Result<Box<dyn AnyMessage>, FabricError> {
        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| FabricError::Config("subscriber has no codec registry".into()))?
            .clone();
        let envelope = self.recv().await?;
        registry.decode(&envelope.type_tag, &envelope.body)
    }
}
