//! The publish/subscribe fan-out broker.
//!
//! Producers connect to the frontend, consumers to the backend, and the
//! broker forwards every message unmodified; topic filtering happens
//! at the consumers. The classic shape is an XSUB frontend and XPUB
//! backend; the pure-Rust `zeromq` crate provides neither, so the proxy
//! is emulated with a SUB frontend subscribed to every topic and a PUB
//! backend. Subscription frames still reach producers through the
//! transport's SUB fan-in, so the observable contract is unchanged.
//!
//! The broker is steerable: a control handle accepts pause, resume, and
//! terminate commands, checked between polls. Transport errors on
//! either side are logged and forwarding continues; only terminate
//! stops the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zeromq::prelude::*;
use zeromq::{PubSocket, SubSocket};

use crate::auth::{AuthenticatorService, STARTUP_SETTLE};
use crate::envelope::Envelope;
use crate::error::FabricError;
use crate::options::SocketOptions;

/// Steering verbs accepted by the broker's control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steer {
    Pause,
    Resume,
    Terminate,
}

/// Cloneable handle that steers a running [`BroadcastBroker`].
#[derive(Clone)]
pub struct BroadcastControl {
    tx: mpsc::UnboundedSender<Steer>,
}

impl BroadcastControl {
    pub fn pause(&self) {
        let _ = self.tx.send(Steer::Pause);
    }

    pub fn resume(&self) {
        let _ = self.tx.send(Steer::Resume);
    }

    pub fn terminate(&self) {
        let _ = self.tx.send(Steer::Terminate);
    }
}

/// Configuration for the fan-out broker.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Frontend options: producers connect here.
    pub frontend: SocketOptions,
    /// Backend options: consumers connect here.
    pub backend: SocketOptions,
}

/// The fan-out broker.
///
/// Frontend and backend may carry independent authenticators
/// (asymmetric deployment); both services are started before the
/// data-plane sockets bind, with a short settling delay in between so
/// no peer connects pre-authentication.
pub struct BroadcastBroker {
    config: BroadcastConfig,
    frontend_auth: Option<Arc<AuthenticatorService>>,
    backend_auth: Option<Arc<AuthenticatorService>>,
    running: Arc<AtomicBool>,
    control_tx: mpsc::UnboundedSender<Steer>,
    control_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Steer>>>,
}

impl BroadcastBroker {
    pub fn new(config: BroadcastConfig) -> Result<Self, FabricError> {
        config.frontend.validate()?;
        config.backend.validate()?;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            frontend_auth: None,
            backend_auth: None,
            running: Arc::new(AtomicBool::new(false)),
            control_tx,
            control_rx: tokio::sync::Mutex::new(Some(control_rx)),
        })
    }

    /// Use one authenticator for both sides (symmetric deployment).
    pub fn with_authenticator(mut self, service: Arc<AuthenticatorService>) -> Self {
        self.frontend_auth = Some(service.clone());
        self.backend_auth = Some(service);
        self
    }

    /// Use independent authenticators per side (asymmetric deployment).
    pub fn with_asymmetric_authenticators(
        mut self,
        frontend: Arc<AuthenticatorService>,
        backend: Arc<AuthenticatorService>,
    ) -> Self {
        self.frontend_auth = Some(frontend);
        self.backend_auth = Some(backend);
        self
    }

    /// Handle for steering the broker from another task.
    pub fn control(&self) -> BroadcastControl {
        BroadcastControl {
            tx: self.control_tx.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the proxy loop to stop at its next iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.control_tx.send(Steer::Terminate);
    }

    /// Run the proxy loop until terminated.
    pub async fn run(&self) -> Result<(), FabricError> {
        let mut control_rx = self
            .control_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| FabricError::Config("broadcast broker already ran".into()))?;

        // Authenticators come up before any data-plane bind.
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
        let mut frontend = SubSocket::new();
        frontend.bind(&frontend_endpoint.address()).await?;
        // Forward everything; consumers do the filtering.
        frontend.subscribe("").await?;
        info!(endpoint = %frontend_endpoint, "broadcast frontend bound - producers connect here");

        let backend_endpoint = &self.config.backend.address;
        backend_endpoint.ensure_ipc_dir()?;
        backend_endpoint.remove_stale_socket()?;
        let mut backend = PubSocket::new();
        backend.bind(&backend_endpoint.address()).await?;
        info!(endpoint = %backend_endpoint, "broadcast backend bound - consumers connect here");

        self.running.store(true, Ordering::SeqCst);
        let mut paused = false;
        info!("broadcast proxy loop started");

        while self.running.load(Ordering::SeqCst) {
            // Drain pending steering commands first.
            loop {
                match control_rx.try_recv() {
                    Ok(Steer::Pause) => {
                        if !paused {
                            info!("broadcast proxy paused");
                        }
                        paused = true;
                    }
                    Ok(Steer::Resume) => {
                        if paused {
                            info!("broadcast proxy resumed");
                        }
                        paused = false;
                    }
                    Ok(Steer::Terminate) => {
                        self.running.store(false, Ordering::SeqCst);
                    }
                    Err(_) => break,
                }
            }
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if paused {
                tokio::time::sleep(self.config.frontend.polling_timeout).await;
                continue;
            }

            let received = tokio::time::timeout(
                self.config.frontend.polling_timeout,
                frontend.recv(),
            )
            .await;
            let message = match received {
                Ok(Ok(message)) => message,
                Ok(Err(e)) => {
                    warn!(error = %e, "broadcast frontend receive error");
                    continue;
                }
                // Quantum elapsed; loop back to the control check.
                Err(_) => continue,
            };

            if tracing::enabled!(tracing::Level::DEBUG) {
                match Envelope::from_zmq(&message) {
                    Ok(envelope) => {
                        debug!(type_tag = %envelope.type_tag, "forwarding message")
                    }
                    Err(e) => debug!(error = %e, "forwarding non-envelope frames"),
                }
            }

            // Forward unmodified.
            if let Err(e) = backend.send(message).await {
                warn!(error = %e, "broadcast backend send error");
            }
        }

        if let Some(auth) = &self.frontend_auth {
            auth.stop().await;
        }
        if let Some(auth) = &self.backend_auth {
            auth.stop().await;
        }
        frontend_endpoint.unlink_ipc_file();
        backend_endpoint.unlink_ipc_file();
        info!("broadcast proxy stopped");
        Ok(())
    }
}
