//! seisbus-registry: the local module table.
//!
//! A persistent SQLite table tracking the modules running on one host:
//! module name, the IPC endpoint its command socket binds, its pid, and
//! a coarse status. Command services consult it on startup to detect a
//! live duplicate of themselves and to advertise where operators can
//! reach them.

mod table;

pub use table::{ModuleStatus, ModuleTable, TableEntry};

use thiserror::Error;

/// Errors produced by the module registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("module table is not open")]
    NotOpen,

    #[error("module table is read-only")]
    ReadOnly,

    #[error("module table does not exist at {0}")]
    MissingTable(String),

    #[error("module name is not set")]
    MissingName,

    #[error("module {0} already exists")]
    DuplicateModule(String),

    #[error("module {0} is not in the table")]
    UnknownModule(String),

    #[error("module {name} is still running as pid {pid}")]
    ModuleAlive { name: String, pid: i64 },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
