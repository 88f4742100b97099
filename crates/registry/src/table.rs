//! The SQLite-backed module table.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, info};

use crate::RegistryError;

/// Coarse module status stored in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleStatus {
    #[default]
    Unknown,
    Running,
    NotRunning,
}

impl ModuleStatus {
    fn to_i64(self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::Running => 1,
            Self::NotRunning => 2,
        }
    }

    fn from_i64(value: i64) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::NotRunning,
            _ => Self::Unknown,
        }
    }
}

/// One row of the module table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableEntry {
    /// Module name; keys the table on this single-host deployment.
    pub name: String,
    /// Path of the IPC socket the module's command service binds.
    pub ipc_file: PathBuf,
    /// Process identifier of the module.
    pub pid: i64,
    pub status: ModuleStatus,
}

impl TableEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Persistent table of locally running modules.
///
/// Single-writer: the connection sits behind an internal mutex, and a
/// read-only open from another process is safe concurrently.
pub struct ModuleTable {
    connection: Mutex<Connection>,
    read_only: bool,
}

impl ModuleTable {
    /// The default table location under the user data directory.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("seisbus")
            .join("tables")
            .join("localModuleTable.sqlite3")
    }

    /// Open the table read-write, creating it when allowed.
    pub fn open(
        table_file: impl AsRef<Path>,
        create_if_missing: bool,
    ) -> Result<Self, RegistryError> {
        let path = table_file.as_ref();
        if !path.exists() && !create_if_missing {
            return Err(RegistryError::MissingTable(path.display().to_string()));
        }
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let connection = Connection::open(path)?;
        connection.execute(
            "CREATE TABLE IF NOT EXISTS local_modules(
                 module TEXT PRIMARY KEY NOT NULL,
                 ipc_file TEXT,
                 process_identifier INTEGER,
                 status INTEGER)",
            [],
        )?;
        info!(table = %path.display(), "module table open");
        Ok(Self {
            connection: Mutex::new(connection),
            read_only: false,
        })
    }

    /// Open the table read-only; it must already exist.
    pub fn open_read_only(table_file: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = table_file.as_ref();
        if !path.exists() {
            return Err(RegistryError::MissingTable(path.display().to_string()));
        }
        let connection =
            Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self {
            connection: Mutex::new(connection),
            read_only: true,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// True if the named module has a row.
    pub fn have_module(&self, name: &str) -> Result<bool, RegistryError> {
        let connection = self.connection.lock().expect("table poisoned");
        let exists = connection.query_row(
            "SELECT EXISTS(SELECT 1 FROM local_modules WHERE module = ?1)",
            params![name],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(exists != 0)
    }

    /// Insert a new module. Fails when the name is taken.
    pub fn add_module(&self, entry: &TableEntry) -> Result<(), RegistryError> {
        self.check_writable(entry)?;
        if self.have_module(&entry.name)? {
            return Err(RegistryError::DuplicateModule(entry.name.clone()));
        }
        let connection = self.connection.lock().expect("table poisoned");
        connection.execute(
            "INSERT INTO local_modules (module, ipc_file, process_identifier, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.name,
                entry.ipc_file.display().to_string(),
                entry.pid,
                entry.status.to_i64()
            ],
        )?;
        debug!(module = %entry.name, "module added");
        Ok(())
    }

    /// Insert or overwrite a module row.
    pub fn update_module(&self, entry: &TableEntry) -> Result<(), RegistryError> {
        self.check_writable(entry)?;
        let connection = self.connection.lock().expect("table poisoned");
        connection.execute(
            "INSERT INTO local_modules (module, ipc_file, process_identifier, status)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(module) DO UPDATE SET
                 ipc_file = excluded.ipc_file,
                 process_identifier = excluded.process_identifier,
                 status = excluded.status",
            params![
                entry.name,
                entry.ipc_file.display().to_string(),
                entry.pid,
                entry.status.to_i64()
            ],
        )?;
        debug!(module = %entry.name, "module updated");
        Ok(())
    }

    /// Remove a module row; removing an absent row is a no-op.
    pub fn delete_module(&self, name: &str) -> Result<(), RegistryError> {
        if self.read_only {
            return Err(RegistryError::ReadOnly);
        }
        if name.is_empty() {
            return Err(RegistryError::MissingName);
        }
        let connection = self.connection.lock().expect("table poisoned");
        connection.execute("DELETE FROM local_modules WHERE module = ?1", params![name])?;
        Ok(())
    }

    /// Fetch one module's row.
    pub fn query_module(&self, name: &str) -> Result<TableEntry, RegistryError> {
        let connection = self.connection.lock().expect("table poisoned");
        connection
            .query_row(
                "SELECT module, ipc_file, process_identifier, status
                 FROM local_modules WHERE module = ?1",
                params![name],
                row_to_entry,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    RegistryError::UnknownModule(name.to_string())
                }
                other => RegistryError::Database(other),
            })
    }

    /// Fetch every row, ordered by module name.
    pub fn query_all_modules(&self) -> Result<Vec<TableEntry>, RegistryError> {
        let connection = self.connection.lock().expect("table poisoned");
        let mut statement = connection.prepare(
            "SELECT module, ipc_file, process_identifier, status
             FROM local_modules ORDER BY module",
        )?;
        let rows = statement.query_map([], row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Claim a module slot at service startup.
    ///
    /// A preexisting row for this name has its recorded pid probed with
    /// signal 0: a dead pid is overwritten, a live one fails the
    /// startup. Absent a row, the entry is simply added.
    pub fn claim_module(&self, entry: &TableEntry) -> Result<(), RegistryError> {
        self.check_writable(entry)?;
        if self.have_module(&entry.name)? {
            let existing = self.query_module(&entry.name)?;
            if process_alive(existing.pid) {
                return Err(RegistryError::ModuleAlive {
                    name: entry.name.clone(),
                    pid: existing.pid,
                });
            }
            debug!(module = %entry.name, stale_pid = existing.pid, "overwriting dead module row");
            self.update_module(entry)
        } else {
            self.add_module(entry)
        }
    }

    fn check_writable(&self, entry: &TableEntry) -> Result<(), RegistryError> {
        if self.read_only {
            return Err(RegistryError::ReadOnly);
        }
        if entry.name.is_empty() {
            return Err(RegistryError::MissingName);
        }
        Ok(())
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<TableEntry> {
    Ok(TableEntry {
        name: row.get(0)?,
        ipc_file: PathBuf::from(row.get::<_, String>(1)?),
        pid: row.get(2)?,
        status: ModuleStatus::from_i64(row.get(3)?),
    })
}

/// Signal-0 liveness probe.
#[cfg(unix)]
fn process_alive(pid: i64) -> bool {
    if pid <= 0 {
        return false;
    }
    // kill(pid, 0) delivers nothing; it only checks existence. EPERM
    // still means the process exists.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: i64) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, pid: i64) -> TableEntry {
        TableEntry {
            name: name.into(),
            ipc_file: PathBuf::from(format!("/tmp/seisbus/{name}.sock")),
            pid,
            status: ModuleStatus::Running,
        }
    }

    fn open_table(dir: &tempfile::TempDir) -> ModuleTable {
        ModuleTable::open(dir.path().join("table.sqlite3"), true).unwrap()
    }

    #[test]
    fn add_query_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir);
        let row = entry("packet_cache", 4242);
        table.add_module(&row).unwrap();

        assert!(table.have_module("packet_cache").unwrap());
        assert_eq!(table.query_module("packet_cache").unwrap(), row);
    }

    #[test]
    fn duplicate_add_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir);
        table.add_module(&entry("picker", 1)).unwrap();
        assert!(matches!(
            table.add_module(&entry("picker", 2)),
            Err(RegistryError::DuplicateModule(_))
        ));
    }

    #[test]
    fn update_is_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir);
        // Update of an absent module inserts it.
        table.update_module(&entry("picker", 1)).unwrap();
        let mut changed = entry("picker", 99);
        changed.status = ModuleStatus::NotRunning;
        table.update_module(&changed).unwrap();
        assert_eq!(table.query_module("picker").unwrap(), changed);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir);
        table.add_module(&entry("picker", 1)).unwrap();
        table.delete_module("picker").unwrap();
        assert!(!table.have_module("picker").unwrap());
        // Absent row: still fine.
        table.delete_module("picker").unwrap();
    }

    #[test]
    fn query_all_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir);
        table.add_module(&entry("zz_mod", 1)).unwrap();
        table.add_module(&entry("aa_mod", 2)).unwrap();
        let names: Vec<String> = table
            .query_all_modules()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["aa_mod", "zz_mod"]);
    }

    #[test]
    fn unknown_module_query_fails() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir);
        assert!(matches!(
            table.query_module("ghost"),
            Err(RegistryError::UnknownModule(_))
        ));
    }

    #[test]
    fn missing_table_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ModuleTable::open(dir.path().join("absent.sqlite3"), false),
            Err(RegistryError::MissingTable(_))
        ));
        assert!(ModuleTable::open_read_only(dir.path().join("absent.sqlite3")).is_err());
    }

    #[test]
    fn read_only_rejects_writes_but_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.sqlite3");
        {
            let table = ModuleTable::open(&path, true).unwrap();
            table.add_module(&entry("picker", 1)).unwrap();
        }
        let reader = ModuleTable::open_read_only(&path).unwrap();
        assert!(reader.is_read_only());
        assert!(reader.have_module("picker").unwrap());
        assert!(matches!(
            reader.add_module(&entry("other", 2)),
            Err(RegistryError::ReadOnly)
        ));
        assert!(matches!(
            reader.delete_module("picker"),
            Err(RegistryError::ReadOnly)
        ));
    }

    #[test]
    fn concurrent_reader_sees_writer_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.sqlite3");
        let writer = ModuleTable::open(&path, true).unwrap();
        writer.add_module(&entry("picker", 1)).unwrap();

        let reader = ModuleTable::open_read_only(&path).unwrap();
        writer.update_module(&entry("picker", 7)).unwrap();
        assert_eq!(reader.query_module("picker").unwrap().pid, 7);
    }

    #[test]
    fn claim_overwrites_dead_pid() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir);
        // A pid that cannot exist.
        table.add_module(&entry("picker", i32::MAX as i64 - 1)).unwrap();
        table.claim_module(&entry("picker", 1234)).unwrap();
        assert_eq!(table.query_module("picker").unwrap().pid, 1234);
    }

    #[test]
    fn claim_fails_on_live_pid() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir);
        // This test process is definitely alive.
        table
            .add_module(&entry("picker", std::process::id() as i64))
            .unwrap();
        assert!(matches!(
            table.claim_module(&entry("picker", 999)),
            Err(RegistryError::ModuleAlive { .. })
        ));
    }

    #[test]
    fn claim_fresh_name_adds() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir);
        table.claim_module(&entry("fresh", 10)).unwrap();
        assert!(table.have_module("fresh").unwrap());
    }

    #[test]
    fn missing_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir);
        assert!(matches!(
            table.add_module(&entry("", 1)),
            Err(RegistryError::MissingName)
        ));
    }
}
