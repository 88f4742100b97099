//! Authentication plane.
//!
//! The fabric does not decide who may connect; it defines the
//! [`Authenticator`] contract, ships the allow-all [`Grasslands`]
//! implementation, and runs the decision behind a dedicated service
//! task ([`AuthenticatorService`]) that the transport consults during
//! its handshake. Brokers start the authenticator service first, wait a
//! short settling delay, and only then bind their data-plane sockets;
//! otherwise a peer can slip in before authentication is live.

mod keys;
mod service;

pub use keys::Keypair;
pub use service::{AuthHandle, AuthenticatorService, STARTUP_SETTLE};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Privilege level granted to an authenticated peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UserPrivileges {
    ReadOnly,
    ReadWrite,
    Admin,
}

/// Security mechanism selected for a socket.
///
/// The names follow the ZeroMQ security tutorial: grasslands is open,
/// strawhouse filters by address, woodhouse adds username/password, and
/// stonehouse authenticates with CURVE-style keypairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    #[default]
    Grasslands,
    Strawhouse,
    Woodhouse,
    Stonehouse,
}

/// Which side of the handshake this socket plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthRole {
    #[default]
    Server,
    Client,
}

/// Authentication options carried in socket configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthOptions {
    pub level: SecurityLevel,
    pub role: AuthRole,
}

/// Credentials presented by a connecting peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    UsernamePassword { username: String, password: String },
    PublicKey([u8; 32]),
}

/// The outcome of one authentication question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: String,
    pub privileges: UserPrivileges,
}

impl Verdict {
    pub fn allow(privileges: UserPrivileges) -> Self {
        Self {
            allowed: true,
            reason: "OK".into(),
            privileges,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            privileges: UserPrivileges::ReadOnly,
        }
    }
}

/// Decides, for an inbound peer, whether its address and credentials
/// are accepted and at what privilege level.
///
/// Implementations are invoked from the authenticator service task, so
/// they must be `Send + Sync` and must not block the executor.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Address-level deny check (strawhouse and up).
    async fn is_blacklisted(&self, address: &str) -> Verdict;

    /// Address-level allow check (strawhouse and up).
    async fn is_whitelisted(&self, address: &str) -> Verdict;

    /// Credential check (woodhouse for passwords, stonehouse for keys).
    async fn validate(&self, credentials: &Credentials) -> Verdict;

    /// The lowest privilege this authenticator ever grants.
    fn minimum_user_privileges(&self) -> UserPrivileges {
        UserPrivileges::ReadOnly
    }
}

/// The open-door authenticator: everyone is welcome, read-only.
///
/// Useful for development and for deployments fenced at the network
/// layer. Logs each decision at debug so an open door is at least a
/// visible one.
#[derive(Debug, Default)]
pub struct Grasslands;

#[async_trait]
impl Authenticator for Grasslands {
    async fn is_blacklisted(&self, address: &str) -> Verdict {
        tracing::debug!(address, "grasslands: address is not blacklisted");
        Verdict::allow(UserPrivileges::ReadOnly)
    }

    async fn is_whitelisted(&self, address: &str) -> Verdict {
        tracing::debug!(address, "grasslands: address is whitelisted");
        Verdict::allow(UserPrivileges::ReadOnly)
    }

    async fn validate(&self, credentials: &Credentials) -> Verdict {
        match credentials {
            Credentials::UsernamePassword { username, .. } => {
                tracing::debug!(username, "grasslands: user is allowed");
            }
            Credentials::PublicKey(_) => {
                tracing::debug!("grasslands: public key is allowed");
            }
        }
        Verdict::allow(UserPrivileges::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grasslands_allows_everything() {
        let auth = Grasslands;
        assert!(auth.is_blacklisted("203.0.113.7").await.allowed);
        assert!(auth.is_whitelisted("203.0.113.7").await.allowed);
        let verdict = auth
            .validate(&Credentials::UsernamePassword {
                username: "operator".into(),
                password: "hunter2".into(),
            })
            .await;
        assert!(verdict.allowed);
        assert_eq!(verdict.privileges, UserPrivileges::ReadOnly);
    }

    #[test]
    fn privilege_ordering() {
        assert!(UserPrivileges::ReadOnly < UserPrivileges::ReadWrite);
        assert!(UserPrivileges::ReadWrite < UserPrivileges::Admin);
    }
}
