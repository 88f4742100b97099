//! Request/reply RPC over a load-balancing broker.
//!
//! The broker binds a ROUTER frontend for clients and a DEALER backend
//! for a pool of identical workers. Requests are forwarded from
//! frontend to backend, where the DEALER round-robins across connected
//! workers; replies flow back by the routing identity the ROUTER
//! prepended. The broker never inspects bodies and never retries;
//! transport errors are logged and the loop continues.
//!
//! Clients follow the REQ discipline over a DEALER socket: a leading
//! empty delimiter frame, then the two-frame envelope. Workers are the
//! reply engine in [`crate::replier`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use zeromq::prelude::*;
use zeromq::{DealerSocket, RouterSocket, ZmqMessage};

use crate::auth::{AuthenticatorService, STARTUP_SETTLE};
use crate::envelope::Envelope;
use crate::error::FabricError;
use crate::options::SocketOptions;

/// Configuration for the RPC broker.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Frontend options: clients connect here.
    pub frontend: SocketOptions,
    /// Backend options: workers connect here.
    pub backend: SocketOptions,
}

/// ROUTER/DEALER load-balancing broker.
pub struct RpcBroker {
    config: RpcConfig,
    frontend_auth: Option<Arc<AuthenticatorService>>,
    backend_auth: Option<Arc<AuthenticatorService>>,
    running: Arc<AtomicBool>,
}

impl RpcBroker {
    pub fn new(config: RpcConfig) -> Result<Self, FabricError> {
        config.frontend.validate()?;
        config.backend.validate()?;
        Ok(Self {
            config,
            frontend_auth: None,
            backend_auth: None,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Use one authenticator for both sides.
    pub fn with_authenticator(mut self, service: Arc<AuthenticatorService>) -> Self {
        self.frontend_auth = Some(service.clone());
        self.backend_auth = Some(service);
        self
    }

    /// Use independent authenticators per side.
    pub fn with_asymmetric_authenticators(
        mut self,
        frontend: Arc<AuthenticatorService>,
        backend: Arc<AuthenticatorService>,
    ) -> Self {
        self.frontend_auth = Some(frontend);
        self.backend_auth = Some(backend);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the proxy loop to stop at its next iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run the proxy loop until stopped.
    pub async fn run(&self) -> Result<(), FabricError> {
        if let Some(auth) = &self.frontend_auth {
            auth.start().await?;
        }
        if let Some(auth) = &self.backend_auth {
            if !auth.is_running() {
                auth.start().await?;
            }
        }
        if self.frontend_auth.is_some() || self.backend_auth.is_some() {
            tokio::time::sleep(STARTUP_SETTLE).await;
        }

        let frontend_endpoint = &self.config.frontend.address;
        frontend_endpoint.ensure_ipc_dir()?;
        frontend_endpoint.remove_stale_socket()?;
        let mut frontend = RouterSocket::new();
        frontend.bind(&frontend_endpoint.address()).await?;
        info!(endpoint = %frontend_endpoint, "rpc frontend (ROUTER) bound - clients connect here");

        let backend_endpoint = &self.config.backend.address;
        backend_endpoint.ensure_ipc_dir()?;
        backend_endpoint.remove_stale_socket()?;
        let mut backend = DealerSocket::new();
        backend.bind(&backend_endpoint.address()).await?;
        info!(endpoint = %backend_endpoint, "rpc backend (DEALER) bound - workers connect here");

        self.running.store(true, Ordering::SeqCst);
        let quantum = self.config.frontend.polling_timeout;
        info!("rpc proxy loop started");

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                received = frontend.recv() => match received {
                    Ok(message) => {
                        debug!(frames = message.iter().count(), "forwarding request to backend");
                        if let Err(e) = backend.send(message).await {
                            warn!(error = %e, "rpc backend send error");
                        }
                    }
                    Err(e) => warn!(error = %e, "rpc frontend receive error"),
                },
                received = backend.recv() => match received {
                    Ok(message) => {
                        debug!(frames = message.iter().count(), "forwarding reply to frontend");
                        if let Err(e) = frontend.send(message).await {
                            warn!(error = %e, "rpc frontend send error");
                        }
                    }
                    Err(e) => warn!(error = %e, "rpc backend receive error"),
                },
                // Quantum elapsed; loop back to observe the running flag.
                _ = tokio::time::sleep(quantum) => {}
            }
        }

        frontend_endpoint.unlink_ipc_file();
        backend_endpoint.unlink_ipc_file();
        info!("rpc proxy stopped");
        Ok(())
    }
}

/// DEALER client for request/reply services.
///
/// Sends the REQ-style `[empty, type_tag, body]` multipart and waits
/// for the matching `[empty, type_tag, body]` reply. One request is in
/// flight at a time; correlation beyond that lives in the request ids
/// the message bodies carry.
pub struct RpcClient {
    socket: Mutex<DealerSocket>,
}

impl RpcClient {
    /// Connect to a broker frontend (or directly to a bound replier).
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: &crate::transport::Endpoint) -> Result<Self, FabricError> {
        let mut socket = DealerSocket::new();
        info!("connecting DEALER socket");
        socket.connect(&endpoint.address()).await?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Send one envelope and wait up to `timeout` for the reply.
    pub async fn request(
        &self,
        envelope: &Envelope,
        timeout: Duration,
    ) -> Result<Envelope, FabricError> {
        let mut message = ZmqMessage::from(Vec::<u8>::new());
        message.push_back(envelope.type_tag.as_bytes().to_vec().into());
        message.push_back(envelope.body.clone().into());

        let mut socket = self.socket.lock().await;
        socket.send(message).await?;
        debug!(type_tag = %envelope.type_tag, "sent request");

        let reply = tokio::time::timeout(timeout, socket.recv())
            .await
            .map_err(|_| FabricError::Timeout(timeout))??;

        // Skip the empty delimiter frame(s) the reply path preserves.
        let frames: Vec<&[u8]> = reply
            .iter()
            .map(|f| f.as_ref())
            .skip_while(|f| f.is_empty())
            .collect();
        let envelope = Envelope::from_frames(&frames)?;
        debug!(type_tag = %envelope.type_tag, "received reply");
        Ok(envelope)
    }
}
