//! The authenticator service task.
//!
//! Authentication decisions run on their own task, behind an internal
//! request/reply channel: the transport (or a broker acting on its
//! behalf) submits a question and awaits the verdict. Keeping the
//! decision off the data-plane poll loops means a slow authenticator
//! back end cannot stall message forwarding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{Authenticator, Credentials, Verdict};
use crate::error::FabricError;

/// Delay a broker waits after starting its authenticator(s) before
/// binding data-plane sockets, so no peer connects pre-authentication.
pub const STARTUP_SETTLE: Duration = Duration::from_millis(5);

enum Question {
    Blacklisted(String),
    Whitelisted(String),
    Validate(Credentials),
}

struct Query {
    question: Question,
    reply: oneshot::Sender<Verdict>,
}

/// Cloneable handle for submitting authentication questions.
#[derive(Clone)]
pub struct AuthHandle {
    tx: mpsc::UnboundedSender<Query>,
}

impl AuthHandle {
    async fn ask(&self, question: Question) -> Result<Verdict, FabricError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Query { question, reply })
            .map_err(|_| FabricError::Transport("authenticator service stopped".into()))?;
        rx.await
            .map_err(|_| FabricError::Transport("authenticator service dropped query".into()))
    }

    pub async fn is_blacklisted(&self, address: &str) -> Result<Verdict, FabricError> {
        self.ask(Question::Blacklisted(address.to_string())).await
    }

    pub async fn is_whitelisted(&self, address: &str) -> Result<Verdict, FabricError> {
        self.ask(Question::Whitelisted(address.to_string())).await
    }

    pub async fn validate(&self, credentials: Credentials) -> Result<Verdict, FabricError> {
        self.ask(Question::Validate(credentials)).await
    }
}

/// Runs an [`Authenticator`] behind an internal request/reply loop.
pub struct AuthenticatorService {
    authenticator: Arc<dyn Authenticator>,
    running: Arc<AtomicBool>,
    handle: AuthHandle,
    rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Query>>>,
    task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AuthenticatorService {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            authenticator,
            running: Arc::new(AtomicBool::new(false)),
            handle: AuthHandle { tx },
            rx: tokio::sync::Mutex::new(Some(rx)),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// A handle for submitting questions; valid after [`start`](Self::start).
    pub fn handle(&self) -> AuthHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the service loop. Idempotent: a second start is a no-op.
    pub async fn start(&self) -> Result<(), FabricError> {
        let Some(mut rx) = self.rx.lock().await.take() else {
            return Ok(());
        };
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let authenticator = self.authenticator.clone();

        let task = tokio::spawn(async move {
            info!("authenticator service started");
            loop {
                let query = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
                let query = match query {
                    Ok(Some(q)) => q,
                    // All handles dropped.
                    Ok(None) => break,
                    Err(_) => {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        continue;
                    }
                };
                let verdict = match &query.question {
                    Question::Blacklisted(address) => {
                        authenticator.is_blacklisted(address).await
                    }
                    Question::Whitelisted(address) => {
                        authenticator.is_whitelisted(address).await
                    }
                    Question::Validate(credentials) => {
                        authenticator.validate(credentials).await
                    }
                };
                if !verdict.allowed {
                    warn!(reason = %verdict.reason, "authentication denied");
                }
                if query.reply.send(verdict).is_err() {
                    debug!("authentication requester went away before the verdict");
                }
            }
            info!("authenticator service stopped");
        });
        *self.task.lock().await = Some(task);
        Ok(())
    }

    /// Stop the service loop and wait for it to exit.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}
