//! Broker configuration.
//!
//! Parsed from `seisbus.toml` with `SEISBUS_*` environment-variable
//! overrides. Each broker section is optional; the daemon starts only
//! the brokers that are configured.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broadcast::BroadcastConfig;
use crate::command::CommandConfig;
use crate::error::FabricError;
use crate::options::SocketOptions;
use crate::rpc::RpcConfig;
use crate::transport::Endpoint;

/// Full configuration for a seisbus broker process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeisbusConfig {
    /// Publish/subscribe fan-out broker.
    pub broadcast: Option<ProxySection>,

    /// Load-balanced request/reply broker.
    pub rpc: Option<ProxySection>,

    /// Addressed module-command broker.
    pub command: Option<CommandSection>,
}

/// A frontend/backend proxy section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySection {
    /// Endpoint the broker binds for the producing/requesting side.
    pub frontend: String,

    /// Endpoint the broker binds for the consuming/serving side.
    pub backend: String,

    /// Poll quantum in milliseconds.
    #[serde(default = "default_polling_timeout_ms")]
    pub polling_timeout_ms: u64,

    /// High-water mark for both sides; 0 means unbounded.
    #[serde(default)]
    pub high_water_mark: usize,
}

/// The command broker section adds the liveness schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSection {
    #[serde(flatten)]
    pub proxy: ProxySection,

    /// Strictly increasing ping schedule in milliseconds.
    #[serde(default = "default_ping_intervals_ms")]
    pub ping_intervals_ms: Vec<u64>,
}

fn default_polling_timeout_ms() -> u64 {
    10
}

fn default_ping_intervals_ms() -> Vec<u64> {
    vec![10_000]
}

impl ProxySection {
    fn socket_options(&self, endpoint: &str) -> Result<SocketOptions, FabricError> {
        Ok(SocketOptions::new(Endpoint::parse(endpoint)?)
            .with_polling_timeout(Duration::from_millis(self.polling_timeout_ms))
            .with_high_water_marks(self.high_water_mark, self.high_water_mark))
    }

    fn validate(&self, section: &str) -> Result<(), FabricError> {
        Endpoint::parse(&self.frontend)
            .map_err(|e| FabricError::Config(format!("[{section}] frontend: {e}")))?;
        Endpoint::parse(&self.backend)
            .map_err(|e| FabricError::Config(format!("[{section}] backend: {e}")))?;
        if self.polling_timeout_ms == 0 {
            return Err(FabricError::Config(format!(
                "[{section}] polling_timeout_ms must be positive"
            )));
        }
        Ok(())
    }
}

impl SeisbusConfig {
    /// Parse from a TOML string, apply env overrides, and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, FabricError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FabricError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Single-host defaults: every broker on IPC sockets under the
    /// given runtime directory.
    pub fn local(ipc_root: impl AsRef<Path>) -> Self {
        let sock = |name: &str| {
            format!("ipc://{}", ipc_root.as_ref().join(name).display())
        };
        Self {
            broadcast: Some(ProxySection {
                frontend: sock("broadcast-frontend.sock"),
                backend: sock("broadcast-backend.sock"),
                polling_timeout_ms: default_polling_timeout_ms(),
                high_water_mark: 0,
            }),
            rpc: Some(ProxySection {
                frontend: sock("rpc-frontend.sock"),
                backend: sock("rpc-backend.sock"),
                polling_timeout_ms: default_polling_timeout_ms(),
                high_water_mark: 0,
            }),
            command: Some(CommandSection {
                proxy: ProxySection {
                    frontend: sock("command-frontend.sock"),
                    backend: sock("command-backend.sock"),
                    polling_timeout_ms: default_polling_timeout_ms(),
                    high_water_mark: 0,
                },
                ping_intervals_ms: default_ping_intervals_ms(),
            }),
        }
    }

    /// Environment overrides: `SEISBUS_SECTION_KEY` replaces
    /// `section.key`, e.g. `SEISBUS_COMMAND_FRONTEND`.
    pub(crate) fn apply_env_overrides(&mut self) {
        let var = |name: &str| std::env::var(name).ok();
        if let Some(section) = self.broadcast.as_mut() {
            if let Some(v) = var("SEISBUS_BROADCAST_FRONTEND") {
                section.frontend = v;
            }
            if let Some(v) = var("SEISBUS_BROADCAST_BACKEND") {
                section.backend = v;
            }
        }
        if let Some(section) = self.rpc.as_mut() {
            if let Some(v) = var("SEISBUS_RPC_FRONTEND") {
                section.frontend = v;
            }
            if let Some(v) = var("SEISBUS_RPC_BACKEND") {
                section.backend = v;
            }
        }
        if let Some(section) = self.command.as_mut() {
            if let Some(v) = var("SEISBUS_COMMAND_FRONTEND") {
                section.proxy.frontend = v;
            }
            if let Some(v) = var("SEISBUS_COMMAND_BACKEND") {
                section.proxy.backend = v;
            }
        }
    }

    /// Check every configured section.
    pub fn validate(&self) -> Result<(), FabricError> {
        if let Some(section) = &self.broadcast {
            section.validate("broadcast")?;
        }
        if let Some(section) = &self.rpc {
            section.validate("rpc")?;
        }
        if let Some(section) = &self.command {
            section.proxy.validate("command")?;
            if section.ping_intervals_ms.is_empty() {
                return Err(FabricError::Config(
                    "[command] ping_intervals_ms must not be empty".into(),
                ));
            }
            if !section
                .ping_intervals_ms
                .windows(2)
                .all(|pair| pair[0] < pair[1])
            {
                return Err(FabricError::Config(
                    "[command] ping_intervals_ms must be strictly increasing".into(),
                ));
            }
        }
        Ok(())
    }

    /// Build the fan-out broker configuration, if configured.
    pub fn broadcast_config(&self) -> Result<Option<BroadcastConfig>, FabricError> {
        self.broadcast
            .as_ref()
            .map(|section| {
                Ok(BroadcastConfig {
                    frontend: section.socket_options(&section.frontend)?,
                    backend: section.socket_options(&section.backend)?,
                })
            })
            .transpose()
    }

    /// Build the RPC broker configuration, if configured.
    pub fn rpc_config(&self) -> Result<Option<RpcConfig>, FabricError> {
        self.rpc
            .as_ref()
            .map(|section| {
                Ok(RpcConfig {
                    frontend: section.socket_options(&section.frontend)?,
                    backend: section.socket_options(&section.backend)?,
                })
            })
            .transpose()
    }

    /// Build the command broker configuration, if configured.
    pub fn command_config(&self) -> Result<Option<CommandConfig>, FabricError> {
        self.command
            .as_ref()
            .map(|section| {
                let config = CommandConfig::new(
                    section.proxy.socket_options(&section.proxy.frontend)?,
                    section.proxy.socket_options(&section.proxy.backend)?,
                )
                .with_ping_intervals(
                    section
                        .ping_intervals_ms
                        .iter()
                        .map(|ms| Duration::from_millis(*ms))
                        .collect(),
                );
                Ok(config)
            })
            .transpose()
    }
}
