//! Socket configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthOptions;
use crate::codec::CodecRegistry;
use crate::error::FabricError;
use crate::transport::Endpoint;

/// ZeroMQ routing identities are capped at 255 bytes.
const MAX_ROUTING_IDENTITY: usize = 255;

/// How long a send or receive may block.
///
/// `Forever` blocks until the transport makes progress, `Immediate`
/// fails right away when no progress is possible, `After` bounds the
/// wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wait {
    #[default]
    Forever,
    Immediate,
    After(Duration),
}

impl Wait {
    /// The bounded duration, if any.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Forever => None,
            Self::Immediate => Some(Duration::ZERO),
            Self::After(d) => Some(*d),
        }
    }
}

/// Options applied to a fabric socket at bind/connect time.
///
/// The address is required and set once per socket life. High-water
/// marks are bounded queue lengths with 0 meaning unbounded; the
/// pure-Rust transport does not expose kernel queue knobs, so they are
/// carried as deployment intent and surfaced to the transport where it
/// allows. The polling timeout is the quantum of every poll loop and
/// must be positive.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub address: Endpoint,
    pub receive_hwm: usize,
    pub send_hwm: usize,
    pub receive_timeout: Wait,
    pub send_timeout: Wait,
    pub linger: Wait,
    pub polling_timeout: Duration,
    routing_identity: Option<Vec<u8>>,
    pub auth: AuthOptions,
    pub registry: Option<Arc<CodecRegistry>>,
}

impl SocketOptions {
    pub fn new(address: Endpoint) -> Self {
        Self {
            address,
            receive_hwm: 0,
            send_hwm: 0,
            receive_timeout: Wait::Forever,
            send_timeout: Wait::Forever,
            linger: Wait::Immediate,
            polling_timeout: Duration::from_millis(10),
            routing_identity: None,
            auth: AuthOptions::default(),
            registry: None,
        }
    }

    /// Parse the address and build default options for it.
    pub fn for_address(address: &str) -> Result<Self, FabricError> {
        Ok(Self::new(Endpoint::parse(address)?))
    }

    pub fn with_polling_timeout(mut self, timeout: Duration) -> Self {
        self.polling_timeout = timeout;
        self
    }

    pub fn with_receive_timeout(mut self, wait: Wait) -> Self {
        self.receive_timeout = wait;
        self
    }

    pub fn with_send_timeout(mut self, wait: Wait) -> Self {
        self.send_timeout = wait;
        self
    }

    pub fn with_high_water_marks(mut self, receive: usize, send: usize) -> Self {
        self.receive_hwm = receive;
        self.send_hwm = send;
        self
    }

    /// Set the routing identity, truncated to 255 bytes.
    pub fn with_routing_identity(mut self, identity: impl Into<Vec<u8>>) -> Self {
        let mut identity = identity.into();
        identity.truncate(MAX_ROUTING_IDENTITY);
        self.routing_identity = Some(identity);
        self
    }

    pub fn with_auth(mut self, auth: AuthOptions) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_registry(mut self, registry: Arc<CodecRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn routing_identity(&self) -> Option<&[u8]> {
        self.routing_identity.as_deref()
    }

    /// Check option consistency before the socket is created.
    pub fn validate(&self) -> Result<(), FabricError> {
        if self.polling_timeout.is_zero() {
            return Err(FabricError::Config(
                "polling_timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = SocketOptions::for_address("tcp://127.0.0.1:5555").unwrap();
        options.validate().unwrap();
        assert_eq!(options.receive_hwm, 0);
        assert_eq!(options.receive_timeout, Wait::Forever);
    }

    #[test]
    fn zero_polling_timeout_rejected() {
        let options = SocketOptions::for_address("tcp://127.0.0.1:5555")
            .unwrap()
            .with_polling_timeout(Duration::ZERO);
        assert!(options.validate().is_err());
    }

    #[test]
    fn routing_identity_truncated() {
        let options = SocketOptions::for_address("tcp://127.0.0.1:5555")
            .unwrap()
            .with_routing_identity(vec![0xab; 400]);
        assert_eq!(options.routing_identity().unwrap().len(), 255);
    }

    #[test]
    fn wait_durations() {
        assert_eq!(Wait::Forever.duration(), None);
        assert_eq!(Wait::Immediate.duration(), Some(Duration::ZERO));
        assert_eq!(
            Wait::After(Duration::from_secs(2)).duration(),
            Some(Duration::from_secs(2))
        );
    }
}
