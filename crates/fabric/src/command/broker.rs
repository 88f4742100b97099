//! The addressed command broker.
//!
//! A ROUTER/ROUTER proxy that routes an operator's command to a
//! specific named module without the module being directly reachable.
//! The broker binds both ends; operators connect to the frontend,
//! modules to the backend. Router/router routing is done by hand: the
//! broker tracks each module's routing identity in a registry, prefixes
//! outbound frames with it, and strips it from replies.
//!
//! Liveness is a staged heartbeat per module. A sweeper task walks the
//! registry every 100 ms; a module silent past a configured interval
//! gets a ping for that stage, and one silent past the last interval
//! plus a grace period is sent a terminate and evicted. Any message
//! from a module refreshes its clock and re-arms every stage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use zeromq::prelude::*;
use zeromq::{RouterSocket, ZmqMessage};

use super::messages::{
    AvailableModulesRequest, AvailableModulesResponse, ModuleIdentity, PingRequest, PingResponse,
    RegistrationAction, RegistrationRequest, RegistrationResponse, RegistrationReturnCode,
    TerminateRequest, TerminateResponse,
};
use crate::auth::{AuthenticatorService, STARTUP_SETTLE};
use crate::codec::MessageFormat;
use crate::envelope::Envelope;
use crate::error::FabricError;
use crate::formats::Failure;
use crate::options::SocketOptions;

/// Cadence of the liveness sweeper.
const SWEEP_PERIOD: Duration = Duration::from_millis(100);

/// Slack past the last ping interval before a module is evicted.
const GRACE: Duration = Duration::from_millis(100);

/// Configuration for the command broker.
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Frontend options: operators connect here.
    pub frontend: SocketOptions,
    /// Backend options: modules connect here.
    pub backend: SocketOptions,
    /// Strictly increasing ping schedule. A module silent past stage
    /// `i` is pinged once for that stage; silent past the last stage
    /// plus grace, it is evicted.
    pub ping_intervals: Vec<Duration>,
}

impl CommandConfig {
    pub fn new(frontend: SocketOptions, backend: SocketOptions) -> Self {
        Self {
            frontend,
            backend,
            ping_intervals: vec![Duration::from_secs(10)],
        }
    }

    pub fn with_ping_intervals(mut self, intervals: Vec<Duration>) -> Self {
        self.ping_intervals = intervals;
        self
    }

    fn validate(&self) -> Result<(), FabricError> {
        self.frontend.validate()?;
        self.backend.validate()?;
        if self.ping_intervals.is_empty() {
            return Err(FabricError::Config("ping_intervals must not be empty".into()));
        }
        if !self
            .ping_intervals
            .windows(2)
            .all(|pair| pair[0] < pair[1])
        {
            return Err(FabricError::Config(
                "ping_intervals must be strictly increasing".into(),
            ));
        }
        Ok(())
    }
}

/// One registered module, keyed by its backend routing identity.
struct ModuleEntry {
    identity: ModuleIdentity,
    last_response: Instant,
    last_ping: Option<Instant>,
    /// One flag per configured interval: the stage ping was sent since
    /// the last response.
    stage_pinged: Vec<bool>,
}

impl ModuleEntry {
    fn new(identity: ModuleIdentity, stages: usize) -> Self {
        Self {
            identity,
            last_response: Instant::now(),
            last_ping: None,
            stage_pinged: vec![false; stages],
        }
    }

    fn refresh(&mut self) {
        self.last_response = Instant::now();
        self.stage_pinged.fill(false);
    }
}

/// Registry of live modules, shared by the poll loop and the sweeper.
///
/// Both hold the lock only for registry-sized scans; no await happens
/// under it.
#[derive(Default)]
struct ModuleRegistry {
    modules: HashMap<Vec<u8>, ModuleEntry>,
}

impl ModuleRegistry {
    /// Backend routing identity of the module with this name.
    fn address_of(&self, module_name: &str) -> Option<Vec<u8>> {
        self.modules
            .iter()
            .find(|(_, entry)| entry.identity.name == module_name)
            .map(|(address, _)| address.clone())
    }

    fn contains_identity(&self, identity: &ModuleIdentity) -> bool {
        self.modules.values().any(|entry| {
            entry.identity.name == identity.name && entry.identity.instance == identity.instance
        })
    }

    fn refresh(&mut self, address: &[u8]) {
        if let Some(entry) = self.modules.get_mut(address) {
            entry.refresh();
        }
    }

    fn snapshot(&self) -> Vec<ModuleIdentity> {
        let mut modules: Vec<_> = self
            .modules
            .values()
            .map(|entry| entry.identity.clone())
            .collect();
        modules.sort_by(|a, b| (&a.name, a.instance).cmp(&(&b.name, b.instance)));
        modules
    }
}

/// The ROUTER/ROUTER command broker.
pub struct CommandBroker {
    config: CommandConfig,
    registry: Arc<Mutex<ModuleRegistry>>,
    frontend_auth: Option<Arc<AuthenticatorService>>,
    backend_auth: Option<Arc<AuthenticatorService>>,
    running: Arc<AtomicBool>,
}

impl CommandBroker {
    pub fn new(config: CommandConfig) -> Result<Self, FabricError> {
        config.validate()?;
        Ok(Self {
            config,
            registry: Arc::new(Mutex::new(ModuleRegistry::default())),
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

    /// Signal the poll loop and sweeper to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// The modules currently registered, sorted by name and instance.
    pub fn registered_modules(&self) -> Vec<ModuleIdentity> {
        self.registry.lock().expect("registry poisoned").snapshot()
    }

    /// Run the broker until stopped.
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
        info!(endpoint = %frontend_endpoint, "command frontend (ROUTER) bound - operators connect here");

        let backend_endpoint = &self.config.backend.address;
        backend_endpoint.ensure_ipc_dir()?;
        backend_endpoint.remove_stale_socket()?;
        let mut backend = RouterSocket::new();
        backend.bind(&backend_endpoint.address()).await?;
        info!(endpoint = %backend_endpoint, "command backend (ROUTER) bound - modules connect here");

        self.running.store(true, Ordering::SeqCst);

        // Sweeper -> poll loop work queues. Unbounded: producers never
        // block, and depth is bounded in practice by the sweep cadence.
        let (ping_tx, mut ping_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (terminate_tx, mut terminate_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let sweeper = tokio::spawn(run_sweeper(
            self.registry.clone(),
            self.config.ping_intervals.clone(),
            self.running.clone(),
            ping_tx,
            terminate_tx,
        ));

        let quantum = self.config.frontend.polling_timeout;
        info!("command broker loop started");

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                received = frontend.recv() => match received {
                    Ok(message) => self.handle_frontend(&mut frontend, &mut backend, message).await,
                    Err(e) => warn!(error = %e, "command frontend receive error"),
                },
                received = backend.recv() => match received {
                    Ok(message) => self.handle_backend(&mut frontend, &mut backend, message).await,
                    Err(e) => warn!(error = %e, "command backend receive error"),
                },
                Some(address) = ping_rx.recv() => {
                    let ping = PingRequest::now();
                    match Envelope::pack(&ping) {
                        Ok(envelope) => {
                            send_addressed(&mut backend, &address, &envelope).await;
                        }
                        Err(e) => error!(error = %e, "failed to encode ping request"),
                    }
                }
                Some(address) = terminate_rx.recv() => {
                    self.send_terminate(&mut backend, &address).await;
                }
                // Quantum elapsed; loop back to observe the running flag.
                _ = tokio::time::sleep(quantum) => {}
            }
        }

        let _ = sweeper.await;
        self.shutdown_drain(&mut frontend, &mut backend, quantum).await;

        frontend_endpoint.unlink_ipc_file();
        backend_endpoint.unlink_ipc_file();
        info!("command broker stopped");
        Ok(())
    }

    /// Handle one operator message `[client, empty, type_tag, ...]`.
    async fn handle_frontend(
        &self,
        frontend: &mut RouterSocket,
        backend: &mut RouterSocket,
        message: ZmqMessage,
    ) {
        let frames: Vec<Vec<u8>> = message.iter().map(|f| f.as_ref().to_vec()).collect();
        if frames.len() < 4 || !frames[1].is_empty() {
            warn!(frames = frames.len(), "malformed operator message dropped");
            return;
        }
        let client = frames[0].clone();
        let type_tag = match std::str::from_utf8(&frames[2]) {
            Ok(tag) => tag.to_string(),
            Err(_) => {
                warn!("operator message with non-UTF-8 type tag dropped");
                return;
            }
        };

        // Fleet discovery is answered from the registry, no backend
        // round trip.
        if type_tag == AvailableModulesRequest::TYPE_TAG {
            debug!("answering available-modules request");
            let response = match crate::codec::decode::<AvailableModulesRequest>(&frames[3]) {
                Ok(request) => AvailableModulesResponse {
                    modules: self.registered_modules(),
                    id: request.id,
                },
                Err(e) => {
                    warn!(error = %e, "bad available-modules request");
                    self.send_failure(frontend, &client, "Internal proxy error").await;
                    return;
                }
            };
            match Envelope::pack(&response) {
                Ok(envelope) => send_reply(frontend, &client, &envelope).await,
                Err(e) => error!(error = %e, "failed to encode available-modules response"),
            }
            return;
        }

        // Everything else is an addressed request:
        // [client, empty, type_tag, module_name, body].
        if frames.len() != 5 {
            warn!(
                frames = frames.len(),
                "expected 5-frame addressed request"
            );
            self.send_failure(frontend, &client, "Internal proxy error").await;
            return;
        }
        let module_name = match std::str::from_utf8(&frames[3]) {
            Ok(name) => name.to_string(),
            Err(_) => {
                self.send_failure(frontend, &client, "Internal proxy error").await;
                return;
            }
        };
        let worker = self
            .registry
            .lock()
            .expect("registry poisoned")
            .address_of(&module_name);
        let Some(worker) = worker else {
            debug!(module = %module_name, "request for unknown module");
            self.send_failure(frontend, &client, &format!("Unknown module: {module_name}"))
                .await;
            return;
        };

        debug!(module = %module_name, "propagating request to backend");
        let mut outbound = ZmqMessage::from(worker);
        outbound.push_back(client.into());
        outbound.push_back(Vec::new().into());
        outbound.push_back(frames[2].clone().into());
        outbound.push_back(frames[4].clone().into());
        if let Err(e) = backend.send(outbound).await {
            warn!(module = %module_name, error = %e, "failed to forward request to module");
        }
    }

    /// Handle one module message.
    ///
    /// Three frames `[module, type_tag, body]` are control traffic
    /// (registration, heartbeat, terminate); five frames are a reply to
    /// an operator and are forwarded with the module's own frame
    /// stripped. Anything from a module counts as a sign of life.
    async fn handle_backend(
        &self,
        frontend: &mut RouterSocket,
        backend: &mut RouterSocket,
        message: ZmqMessage,
    ) {
        let frames: Vec<Vec<u8>> = message.iter().map(|f| f.as_ref().to_vec()).collect();
        if frames.is_empty() {
            return;
        }
        let module_address = frames[0].clone();
        self.registry
            .lock()
            .expect("registry poisoned")
            .refresh(&module_address);

        match frames.len() {
            3 => {
                let Ok(type_tag) = std::str::from_utf8(&frames[1]) else {
                    error!("module control message with non-UTF-8 type tag");
                    return;
                };
                match type_tag {
                    RegistrationRequest::TYPE_TAG => {
                        self.handle_registration(backend, &module_address, &frames[2])
                            .await;
                    }
                    PingResponse::TYPE_TAG => {
                        match crate::codec::decode::<PingResponse>(&frames[2]) {
                            // The refresh above already re-armed the stages.
                            Ok(pong) => {
                                debug!(address = %hex(&module_address), time_ms = pong.time_ms, "ping response")
                            }
                            Err(e) => {
                                error!(address = %hex(&module_address), error = %e, "undecodable ping response")
                            }
                        }
                    }
                    TerminateResponse::TYPE_TAG => {
                        let removed = self
                            .registry
                            .lock()
                            .expect("registry poisoned")
                            .modules
                            .remove(&module_address);
                        if let Some(entry) = removed {
                            info!(module = %entry.identity.name, "module terminated");
                        }
                    }
                    // Our own probes echoed back; nothing to do.
                    PingRequest::TYPE_TAG | TerminateRequest::TYPE_TAG => {}
                    other => error!(type_tag = other, "unhandled module control message"),
                }
            }
            5 => {
                // [module, client, empty, type_tag, body] -> strip our
                // own routing frame and hand the rest to the frontend.
                let mut outbound = ZmqMessage::from(frames[1].clone());
                outbound.push_back(frames[2].clone().into());
                outbound.push_back(frames[3].clone().into());
                outbound.push_back(frames[4].clone().into());
                if let Err(e) = frontend.send(outbound).await {
                    warn!(error = %e, "failed to forward module reply to operator");
                }
            }
            other => error!(frames = other, "unhandled module message size"),
        }
    }

    async fn handle_registration(
        &self,
        backend: &mut RouterSocket,
        module_address: &[u8],
        body: &[u8],
    ) {
        let mut return_code = RegistrationReturnCode::Success;
        match crate::codec::decode::<RegistrationRequest>(body) {
            Ok(request) => match request.action {
                RegistrationAction::Register => {
                    if request.identity.name.is_empty() {
                        return_code = RegistrationReturnCode::InvalidRequest;
                    } else {
                        let mut registry = self.registry.lock().expect("registry poisoned");
                        if registry.modules.contains_key(module_address)
                            || registry.contains_identity(&request.identity)
                        {
                            return_code = RegistrationReturnCode::Exists;
                        } else {
                            info!(
                                module = %request.identity.name,
                                instance = request.identity.instance,
                                address = %hex(module_address),
                                "registering module"
                            );
                            registry.modules.insert(
                                module_address.to_vec(),
                                ModuleEntry::new(
                                    request.identity,
                                    self.config.ping_intervals.len(),
                                ),
                            );
                        }
                    }
                }
                RegistrationAction::Deregister => {
                    // Idempotent: deregistering an unknown module succeeds.
                    info!(address = %hex(module_address), "deregistering module");
                    self.registry
                        .lock()
                        .expect("registry poisoned")
                        .modules
                        .remove(module_address);
                }
            },
            Err(e) => {
                error!(error = %e, "undecodable registration request");
                return_code = RegistrationReturnCode::InvalidRequest;
            }
        }

        let response = RegistrationResponse::new(return_code);
        match Envelope::pack(&response) {
            Ok(envelope) => send_routed(backend, module_address, &envelope).await,
            Err(e) => error!(error = %e, "failed to encode registration response"),
        }
    }

    async fn send_failure(&self, frontend: &mut RouterSocket, client: &[u8], details: &str) {
        match Envelope::pack(&Failure::new(details)) {
            Ok(envelope) => send_reply(frontend, client, &envelope).await,
            Err(e) => error!(error = %e, "failed to encode failure reply"),
        }
    }

    async fn send_terminate(&self, backend: &mut RouterSocket, address: &[u8]) {
        match Envelope::pack(&TerminateRequest::default()) {
            Ok(envelope) => send_addressed(backend, address, &envelope).await,
            Err(e) => error!(error = %e, "failed to encode terminate request"),
        }
    }

    /// On shutdown: terminate every remaining module, drain responses
    /// briefly, then warn about whoever never answered.
    async fn shutdown_drain(
        &self,
        frontend: &mut RouterSocket,
        backend: &mut RouterSocket,
        quantum: Duration,
    ) {
        let addresses: Vec<Vec<u8>> = self
            .registry
            .lock()
            .expect("registry poisoned")
            .modules
            .keys()
            .cloned()
            .collect();
        if addresses.is_empty() {
            return;
        }
        debug!(modules = addresses.len(), "evicting modules at shutdown");
        for address in &addresses {
            self.send_terminate(backend, address).await;
        }
        // Give the modules a chance to answer before draining.
        tokio::time::sleep(Duration::from_millis(250)).await;
        loop {
            match tokio::time::timeout(quantum, backend.recv()).await {
                Ok(Ok(message)) => self.handle_backend(frontend, backend, message).await,
                Ok(Err(e)) => {
                    warn!(error = %e, "backend error during shutdown drain");
                    break;
                }
                Err(_) => break,
            }
        }
        for entry in self
            .registry
            .lock()
            .expect("registry poisoned")
            .modules
            .values()
        {
            warn!(module = %entry.identity.name, "module may still be running");
        }
    }
}

/// Walk the registry on a fixed cadence and keep modules honest.
async fn run_sweeper(
    registry: Arc<Mutex<ModuleRegistry>>,
    ping_intervals: Vec<Duration>,
    running: Arc<AtomicBool>,
    ping_tx: mpsc::UnboundedSender<Vec<u8>>,
    terminate_tx: mpsc::UnboundedSender<Vec<u8>>,
) {
    let timeout = *ping_intervals.last().expect("validated non-empty") + GRACE;
    while running.load(Ordering::SeqCst) {
        {
            let mut registry = registry.lock().expect("registry poisoned");
            let now = Instant::now();
            let mut evict = Vec::new();
            for (address, entry) in registry.modules.iter_mut() {
                let silence = now.duration_since(entry.last_response);
                if silence > timeout {
                    let since_ping = entry
                        .last_ping
                        .map(|t| now.duration_since(t).as_millis() as u64);
                    warn!(
                        module = %entry.identity.name,
                        silence_ms = silence.as_millis() as u64,
                        since_last_ping_ms = since_ping,
                        "no response from module, evicting"
                    );
                    let _ = terminate_tx.send(address.clone());
                    evict.push(address.clone());
                    continue;
                }
                for (stage, interval) in ping_intervals.iter().enumerate() {
                    if silence > *interval && !entry.stage_pinged[stage] {
                        entry.stage_pinged[stage] = true;
                        entry.last_ping = Some(now);
                        let _ = ping_tx.send(address.clone());
                        break;
                    }
                }
            }
            for address in evict {
                registry.modules.remove(&address);
            }
        }
        tokio::time::sleep(SWEEP_PERIOD).await;
    }
}

/// Send `[peer, type_tag, body]`: the ROUTER pops `peer` and the module
/// sees the bare envelope.
async fn send_routed(socket: &mut RouterSocket, peer: &[u8], envelope: &Envelope) {
    let mut message = ZmqMessage::from(peer.to_vec());
    message.push_back(envelope.type_tag.as_bytes().to_vec().into());
    message.push_back(envelope.body.clone().into());
    if let Err(e) = socket.send(message).await {
        warn!(peer = %hex(peer), error = %e, "router send failed");
    }
}

/// Send `[peer, empty, type_tag, body]`: a broker-originated reply to
/// an operator, framed like a forwarded module reply.
async fn send_reply(socket: &mut RouterSocket, peer: &[u8], envelope: &Envelope) {
    let mut message = ZmqMessage::from(peer.to_vec());
    message.push_back(Vec::new().into());
    message.push_back(envelope.type_tag.as_bytes().to_vec().into());
    message.push_back(envelope.body.clone().into());
    if let Err(e) = socket.send(message).await {
        warn!(peer = %hex(peer), error = %e, "router send failed");
    }
}

/// Send `[peer, peer, empty, type_tag, body]`: the second copy of the
/// address is the reply-to the module's reply engine preserves.
async fn send_addressed(socket: &mut RouterSocket, peer: &[u8], envelope: &Envelope) {
    let mut message = ZmqMessage::from(peer.to_vec());
    message.push_back(peer.to_vec().into());
    message.push_back(Vec::new().into());
    message.push_back(envelope.type_tag.as_bytes().to_vec().into());
    message.push_back(envelope.body.clone().into());
    if let Err(e) = socket.send(message).await {
        warn!(peer = %hex(peer), error = %e, "router send failed");
    }
}

/// Minimal hex encoding for routing identities in log fields.
fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
