//! The per-socket reply engine: the worker side of both brokers.
//!
//! A replier connects a DEALER socket to a broker backend and runs one
//! poll loop. Inbound multiparts carry an optional routing preamble
//! terminated by an empty delimiter frame, then the two-frame envelope;
//! the preamble is preserved verbatim on the reply so the broker can
//! route it home. Broker-internal pings are answered inline without
//! touching the handler. A handler error produces no reply at all: the
//! requester observes its own receive timeout, the engine does not
//! fabricate application responses.
//!
//! With a module identity attached, the engine speaks the command
//! broker's registration protocol: Register on start (failure aborts
//! startup), Deregister on stop, and immediate shutdown when the broker
//! sends a terminate.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeromq::prelude::*;
use zeromq::{DealerSocket, ZmqMessage};

use crate::codec::MessageFormat;
use crate::command::messages::{
    ModuleIdentity, PingRequest, PingResponse, RegistrationAction, RegistrationRequest,
    RegistrationResponse, RegistrationReturnCode, TerminateRequest, TerminateResponse,
    TerminateReturnCode,
};
use crate::envelope::Envelope;
use crate::error::FabricError;
use crate::options::SocketOptions;

/// How long a registering module waits for the broker's verdict.
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the engine waits for the deregistration acknowledgement.
const DEREGISTER_DRAIN: Duration = Duration::from_secs(1);

/// Boxed async request handler: `(type_tag, body)` in, optional reply out.
///
/// Invoked from the poll task, so it must be `Send + Sync` and must not
/// capture references into the engine.
pub type ReplyHandler = Arc<
    dyn Fn(Envelope) -> Pin<Box<dyn Future<Output = Result<Option<Envelope>, FabricError>> + Send>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a [`ReplyHandler`].
pub fn reply_handler<F, Fut>(handler: F) -> ReplyHandler
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Envelope>, FabricError>> + Send + 'static,
{
    Arc::new(move |envelope| Box::pin(handler(envelope)))
}

/// A running reply engine.
pub struct Replier {
    name: String,
    running: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Replier {
    /// Connect to a broker backend and start serving requests.
    ///
    /// With `identity` set, the engine registers with the command
    /// broker before the poll loop starts; a missing or non-`Success`
    /// response aborts startup.
    pub async fn start(
        options: SocketOptions,
        identity: Option<ModuleIdentity>,
        handler: ReplyHandler,
    ) -> Result<Self, FabricError> {
        options.validate()?;
        let name = identity
            .as_ref()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "replier".to_string());

        let mut socket = DealerSocket::new();
        info!(endpoint = %options.address, worker = %name, "connecting reply engine");
        socket.connect(&options.address.address()).await?;

        if let Some(identity) = &identity {
            register(&mut socket, identity).await?;
            info!(worker = %name, "module registered");
        }

        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(poll_loop(
            socket,
            options.polling_timeout,
            identity,
            handler,
            running.clone(),
            name.clone(),
        ));

        Ok(Self {
            name,
            running,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the poll loop, deregister (command role), and wait for the
    /// engine to wind down.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        info!(worker = %self.name, "reply engine stopped");
    }

    /// Kill the poll task outright: no deregistration, no drain.
    ///
    /// This is how a crashed module looks to the broker; the liveness
    /// sweeper is responsible for cleaning up after it.
    pub async fn abort(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

/// Send the registration request and await the broker's verdict.
async fn register(socket: &mut DealerSocket, identity: &ModuleIdentity) -> Result<(), FabricError> {
    let request = RegistrationRequest {
        identity: identity.clone(),
        action: RegistrationAction::Register,
    };
    socket.send(Envelope::pack(&request)?.to_zmq()).await?;

    let reply = tokio::time::timeout(REGISTRATION_TIMEOUT, socket.recv())
        .await
        .map_err(|_| FabricError::Timeout(REGISTRATION_TIMEOUT))??;
    let frames: Vec<&[u8]> = reply
        .iter()
        .map(|f| f.as_ref())
        .skip_while(|f| f.is_empty())
        .collect();
    let response = Envelope::from_frames(&frames)?.unpack::<RegistrationResponse>()?;
    match response.return_code {
        RegistrationReturnCode::Success => Ok(()),
        code => Err(FabricError::Registry(format!(
            "registration rejected: {code:?}"
        ))),
    }
}

async fn poll_loop(
    mut socket: DealerSocket,
    quantum: Duration,
    identity: Option<ModuleIdentity>,
    handler: ReplyHandler,
    running: Arc<AtomicBool>,
    name: String,
) {
    let mut terminated = false;
    while running.load(Ordering::SeqCst) {
        let message = match tokio::time::timeout(quantum, socket.recv()).await {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                warn!(worker = %name, error = %e, "reply engine receive error");
                continue;
            }
            // Quantum elapsed; loop back to observe the running flag.
            Err(_) => continue,
        };
        if handle_request(&mut socket, &handler, &name, message).await {
            terminated = true;
            running.store(false, Ordering::SeqCst);
        }
    }

    // Best-effort deregistration, skipped when the broker itself told
    // us to terminate (it has already forgotten us).
    if let Some(identity) = identity {
        if !terminated {
            deregister(&mut socket, &identity, &name).await;
        }
    }
}

/// Process one inbound multipart. Returns true when the broker asked
/// this engine to terminate.
async fn handle_request(
    socket: &mut DealerSocket,
    handler: &ReplyHandler,
    name: &str,
    message: ZmqMessage,
) -> bool {
    let frames: Vec<Vec<u8>> = message.iter().map(|f| f.as_ref().to_vec()).collect();

    // Routing preamble (if any) ends at the first empty delimiter; the
    // envelope is whatever follows.
    let (preamble, payload): (&[Vec<u8>], &[Vec<u8>]) =
        match frames.iter().position(|f| f.is_empty()) {
            Some(index) => (&frames[..index], &frames[index + 1..]),
            None => (&[], &frames[..]),
        };
    let payload_refs: Vec<&[u8]> = payload.iter().map(|f| f.as_slice()).collect();
    let envelope = match Envelope::from_frames(&payload_refs) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(worker = %name, error = %e, "malformed request dropped");
            return false;
        }
    };

    match envelope.type_tag.as_str() {
        // Liveness probe: echo the time, bare two-frame reply, and
        // never bother the handler.
        PingRequest::TYPE_TAG => {
            let reply = match envelope.unpack::<PingRequest>() {
                Ok(ping) => PingResponse {
                    time_ms: ping.time_ms,
                },
                Err(e) => {
                    warn!(worker = %name, error = %e, "undecodable ping dropped");
                    return false;
                }
            };
            match Envelope::pack(&reply) {
                Ok(envelope) => send_bare(socket, &envelope, name).await,
                Err(e) => warn!(worker = %name, error = %e, "failed to encode ping reply"),
            }
            false
        }
        TerminateRequest::TYPE_TAG => {
            info!(worker = %name, "terminate request received");
            let reply = TerminateResponse {
                return_code: TerminateReturnCode::Success,
            };
            match Envelope::pack(&reply) {
                Ok(envelope) => send_bare(socket, &envelope, name).await,
                Err(e) => warn!(worker = %name, error = %e, "failed to encode terminate reply"),
            }
            true
        }
        _ => {
            match handler(envelope).await {
                Ok(Some(reply)) => {
                    send_with_preamble(socket, preamble, &reply, name).await;
                }
                Ok(None) => {
                    debug!(worker = %name, "handler produced no reply");
                }
                // No reply on handler failure; the requester times out.
                Err(e) => {
                    warn!(worker = %name, error = %e, "request handler failed");
                }
            }
            false
        }
    }
}

/// Reply without routing frames: `[type_tag, body]`.
async fn send_bare(socket: &mut DealerSocket, envelope: &Envelope, name: &str) {
    if let Err(e) = socket.send(envelope.to_zmq()).await {
        warn!(worker = %name, error = %e, "reply send failed");
    }
}

/// Reply preserving the request's routing preamble:
/// `[preamble.., empty, type_tag, body]`.
async fn send_with_preamble(
    socket: &mut DealerSocket,
    preamble: &[Vec<u8>],
    envelope: &Envelope,
    name: &str,
) {
    if preamble.is_empty() {
        send_bare(socket, envelope, name).await;
        return;
    }
    let mut message = ZmqMessage::from(preamble[0].clone());
    for frame in &preamble[1..] {
        message.push_back(frame.clone().into());
    }
    message.push_back(Vec::new().into());
    message.push_back(envelope.type_tag.as_bytes().to_vec().into());
    message.push_back(envelope.body.clone().into());
    if let Err(e) = socket.send(message).await {
        warn!(worker = %name, error = %e, "reply send failed");
    }
}

/// Send the deregistration request and drain the acknowledgement.
async fn deregister(socket: &mut DealerSocket, identity: &ModuleIdentity, name: &str) {
    let request = RegistrationRequest {
        identity: identity.clone(),
        action: RegistrationAction::Deregister,
    };
    let envelope = match Envelope::pack(&request) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(worker = %name, error = %e, "failed to encode deregistration");
            return;
        }
    };
    if let Err(e) = socket.send(envelope.to_zmq()).await {
        warn!(worker = %name, error = %e, "deregistration send failed");
        return;
    }
    match tokio::time::timeout(DEREGISTER_DRAIN, socket.recv()).await {
        Ok(_) => debug!(worker = %name, "deregistration acknowledged"),
        Err(_) => debug!(worker = %name, "no deregistration acknowledgement"),
    }
}
