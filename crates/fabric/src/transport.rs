use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FabricError;

/// Transport endpoint for a fabric socket.
///
/// Three schemes are recognized: TCP for distributed deployment, IPC
/// (Unix domain sockets) for same-host communication, and in-process
/// endpoints for wiring components inside one binary. Any other scheme
/// is rejected at configuration time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "address")]
pub enum Endpoint {
    /// TCP transport, `tcp://host:port`.
    Tcp { host: String, port: u16 },

    /// Unix-domain socket bound to a filesystem path, `ipc://path`.
    Ipc(PathBuf),

    /// In-process endpoint, `inproc://name`.
    Inproc(String),
}

impl Endpoint {
    /// Create a TCP endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Create an IPC endpoint at the given socket path.
    pub fn ipc(path: impl Into<PathBuf>) -> Self {
        Self::Ipc(path.into())
    }

    /// Create an in-process endpoint with the given name.
    pub fn inproc(name: impl Into<String>) -> Self {
        Self::Inproc(name.into())
    }

    /// Parse an endpoint address string.
    ///
    /// Accepts `tcp://host:port`, `ipc://path`, and `inproc://name`;
    /// anything else fails with a transport error.
    pub fn parse(address: &str) -> Result<Self, FabricError> {
        if let Some(rest) = address.strip_prefix("tcp://") {
            let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
                FabricError::Transport(format!("tcp address missing port: {address}"))
            })?;
            if host.is_empty() {
                return Err(FabricError::Transport(format!(
                    "tcp address missing host: {address}"
                )));
            }
            // "*" binds every interface; ephemeral port 0 is resolved after bind.
            let port = port.parse::<u16>().map_err(|_| {
                FabricError::Transport(format!("invalid tcp port in: {address}"))
            })?;
            return Ok(Self::tcp(host, port));
        }
        if let Some(rest) = address.strip_prefix("ipc://") {
            if rest.is_empty() {
                return Err(FabricError::Transport(format!(
                    "ipc address missing path: {address}"
                )));
            }
            return Ok(Self::ipc(rest));
        }
        if let Some(rest) = address.strip_prefix("inproc://") {
            if rest.is_empty() {
                return Err(FabricError::Transport(format!(
                    "inproc address missing name: {address}"
                )));
            }
            return Ok(Self::inproc(rest));
        }
        Err(FabricError::Transport(format!(
            "unrecognized endpoint scheme: {address}"
        )))
    }

    /// Generate the ZeroMQ endpoint address string.
    pub fn address(&self) -> String {
        match self {
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
            Self::Ipc(path) => format!("ipc://{}", path.display()),
            Self::Inproc(name) => format!("inproc://{name}"),
        }
    }

    /// The socket file path for an IPC endpoint, `None` otherwise.
    pub fn ipc_path(&self) -> Option<&Path> {
        match self {
            Self::Ipc(path) => Some(path),
            _ => None,
        }
    }

    /// Ensure the parent directory of an IPC socket path exists.
    ///
    /// Created directories are owner read/write/exec only. No-op for
    /// TCP and in-process endpoints.
    pub fn ensure_ipc_dir(&self) -> Result<(), FabricError> {
        let Some(path) = self.ipc_path() else {
            return Ok(());
        };
        let Some(dir) = path.parent() else {
            return Ok(());
        };
        if dir.as_os_str().is_empty() || dir.is_dir() {
            return Ok(());
        }
        debug!(dir = %dir.display(), "creating IPC socket directory");
        std::fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    /// Remove a stale IPC socket file left behind by a previous run.
    ///
    /// Binding fails if the path already exists, so brokers call this
    /// before bind. No-op for other schemes or when the file is absent.
    pub fn remove_stale_socket(&self) -> Result<(), FabricError> {
        let Some(path) = self.ipc_path() else {
            return Ok(());
        };
        if path.exists() {
            debug!(path = %path.display(), "removing stale IPC socket file");
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Remove the IPC socket file on teardown.
    ///
    /// Errors are logged rather than propagated: teardown must not fail
    /// because the file was already gone.
    pub fn unlink_ipc_file(&self) {
        if let Some(path) = self.ipc_path() {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to unlink IPC socket file");
                } else {
                    debug!(path = %path.display(), "unlinked IPC socket file");
                }
            }
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address())
    }
}

impl std::str::FromStr for Endpoint {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
