//! Operator-side client for the command broker.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeromq::prelude::*;
use zeromq::{DealerSocket, ZmqMessage};

use super::messages::{
    AvailableModulesRequest, AvailableModulesResponse, CommandRequest, CommandResponse,
};
use crate::codec::MessageFormat;
use crate::envelope::Envelope;
use crate::error::FabricError;
use crate::formats::Failure;
use crate::transport::Endpoint;

/// Connects to the command broker's frontend and issues requests to
/// named modules (or to the broker itself for fleet discovery).
///
/// One request is in flight at a time; the broker preserves request
/// order per client/module pair.
pub struct CommandClient {
    socket: Mutex<DealerSocket>,
}

impl CommandClient {
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, FabricError> {
        let mut socket = DealerSocket::new();
        info!("connecting operator DEALER socket");
        socket.connect(&endpoint.address()).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Ask the broker which modules are registered.
    pub async fn available_modules(
        &self,
        id: u64,
        timeout: Duration,
    ) -> Result<AvailableModulesResponse, FabricError> {
        let envelope = Envelope::pack(&AvailableModulesRequest { id })?;
        let mut message = ZmqMessage::from(Vec::<u8>::new());
        message.push_back(envelope.type_tag.as_bytes().to_vec().into());
        message.push_back(envelope.body.clone().into());

        let reply = self.roundtrip(message, timeout).await?;
        reply.unpack::<AvailableModulesResponse>()
    }

    /// Send an envelope to the named module and await its reply.
    ///
    /// A broker-synthesized [`Failure`] (for example an unknown module
    /// name) surfaces as [`FabricError::RemoteFailure`].
    pub async fn request_module(
        &self,
        module_name: &str,
        envelope: &Envelope,
        timeout: Duration,
    ) -> Result<Envelope, FabricError> {
        let mut message = ZmqMessage::from(Vec::<u8>::new());
        message.push_back(envelope.type_tag.as_bytes().to_vec().into());
        message.push_back(module_name.as_bytes().to_vec().into());
        message.push_back(envelope.body.clone().into());
        self.roundtrip(message, timeout).await
    }

    /// Dispatch a text command to the named module.
    pub async fn command(
        &self,
        module_name: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResponse, FabricError> {
        let envelope = Envelope::pack(&CommandRequest::new(command))?;
        let reply = self.request_module(module_name, &envelope, timeout).await?;
        reply.unpack::<CommandResponse>()
    }

    /// Send one multipart and wait for the two-frame reply envelope.
    async fn roundtrip(
        &self,
        message: ZmqMessage,
        timeout: Duration,
    ) -> Result<Envelope, FabricError> {
        let mut socket = self.socket.lock().await;
        socket.send(message).await?;

        let reply = tokio::time::timeout(timeout, socket.recv())
            .await
            .map_err(|_| FabricError::Timeout(timeout))??;
        let frames: Vec<&[u8]> = reply
            .iter()
            .map(|f| f.as_ref())
            .skip_while(|f| f.is_empty())
            .collect();
        let envelope = Envelope::from_frames(&frames)?;
        debug!(type_tag = %envelope.type_tag, "operator reply received");

        if envelope.type_tag == Failure::TYPE_TAG {
            let failure = envelope.unpack::<Failure>()?;
            return Err(FabricError::RemoteFailure(failure.details));
        }
        Ok(envelope)
    }
}
