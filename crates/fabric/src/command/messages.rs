//! Command-plane message formats.
//!
//! These types flow between the command broker, the modules registered
//! on its backend, and the operators on its frontend: registration and
//! deregistration, fleet discovery, command dispatch, termination, and
//! the broker-internal heartbeat pair. Request/response identifiers are
//! 64-bit and opaque to the transport.

use serde::{Deserialize, Serialize};

use crate::codec::MessageFormat;

/// Identity of a running module within the fleet.
///
/// `name` identifies the module class; `(name, instance)` identifies
/// one running process. The remaining fields describe where it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleIdentity {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Instance")]
    pub instance: u16,
    #[serde(rename = "Executable", default)]
    pub executable: String,
    #[serde(rename = "Machine", default)]
    pub machine: String,
    #[serde(rename = "ProcessIdentifier", default)]
    pub pid: i64,
    #[serde(rename = "ParentProcessIdentifier", default)]
    pub ppid: i64,
}

impl ModuleIdentity {
    pub fn new(name: impl Into<String>, instance: u16) -> Self {
        Self {
            name: name.into(),
            instance,
            ..Default::default()
        }
    }

    /// Fill in executable, machine, and process ids from this process.
    pub fn for_this_process(name: impl Into<String>, instance: u16) -> Self {
        let executable = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();
        let machine = std::env::var("HOSTNAME").unwrap_or_default();
        #[cfg(unix)]
        let ppid = std::os::unix::process::parent_id() as i64;
        #[cfg(not(unix))]
        let ppid = 0;
        Self {
            name: name.into(),
            instance,
            executable,
            machine,
            pid: std::process::id() as i64,
            ppid,
        }
    }
}

/// Whether a registration request registers or deregisters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationAction {
    #[default]
    Register,
    Deregister,
}

/// Sent by a module to the command broker on startup and shutdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    #[serde(rename = "Module")]
    pub identity: ModuleIdentity,
    #[serde(rename = "Action")]
    pub action: RegistrationAction,
}

impl MessageFormat for RegistrationRequest {
    const TYPE_TAG: &'static str = "Seisbus.Command.RegistrationRequest";
}

/// Broker verdict on a registration request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationReturnCode {
    #[default]
    Success,
    InvalidRequest,
    Exists,
    ServerError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    #[serde(rename = "ReturnCode")]
    pub return_code: RegistrationReturnCode,
}

impl RegistrationResponse {
    pub fn new(return_code: RegistrationReturnCode) -> Self {
        Self { return_code }
    }
}

impl MessageFormat for RegistrationResponse {
    const TYPE_TAG: &'static str = "Seisbus.Command.RegistrationResponse";
}

/// Operator query for the modules currently registered on the broker.
/// Answered by the broker itself, no backend round-trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailableModulesRequest {
    #[serde(rename = "Identifier")]
    pub id: u64,
}

impl MessageFormat for AvailableModulesRequest {
    const TYPE_TAG: &'static str = "Seisbus.Command.AvailableModulesRequest";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailableModulesResponse {
    #[serde(rename = "Modules")]
    pub modules: Vec<ModuleIdentity>,
    #[serde(rename = "Identifier")]
    pub id: u64,
}

impl MessageFormat for AvailableModulesResponse {
    const TYPE_TAG: &'static str = "Seisbus.Command.AvailableModulesResponse";
}

/// Operator command dispatched to a named module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(rename = "Command")]
    pub command: String,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl MessageFormat for CommandRequest {
    const TYPE_TAG: &'static str = "Seisbus.Command.CommandRequest";
}

/// Outcome of a dispatched command as reported by the module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandReturnCode {
    #[default]
    Success,
    InvalidCommand,
    ApplicationError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    #[serde(rename = "Response")]
    pub response: String,
    #[serde(rename = "ReturnCode")]
    pub return_code: CommandReturnCode,
}

impl CommandResponse {
    pub fn new(response: impl Into<String>, return_code: CommandReturnCode) -> Self {
        Self {
            response: response.into(),
            return_code,
        }
    }
}

impl MessageFormat for CommandResponse {
    const TYPE_TAG: &'static str = "Seisbus.Command.CommandResponse";
}

/// Instructs a module to shut down. Sent by the broker on eviction and
/// at broker shutdown; operators may also address one to a module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminateRequest {}

impl MessageFormat for TerminateRequest {
    const TYPE_TAG: &'static str = "Seisbus.Command.TerminateRequest";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminateReturnCode {
    #[default]
    Success,
    InvalidRequest,
    ApplicationError,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminateResponse {
    #[serde(rename = "ReturnCode")]
    pub return_code: TerminateReturnCode,
}

impl MessageFormat for TerminateResponse {
    const TYPE_TAG: &'static str = "Seisbus.Command.TerminateResponse";
}

/// Broker-internal liveness probe. The reply engine answers these
/// without involving the module's handler, echoing the same time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingRequest {
    #[serde(rename = "Time")]
    pub time_ms: i64,
}

impl PingRequest {
    /// A ping stamped with the current wall-clock time.
    pub fn now() -> Self {
        Self {
            time_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0),
        }
    }
}

impl MessageFormat for PingRequest {
    const TYPE_TAG: &'static str = "Seisbus.Command.PingRequest";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    #[serde(rename = "Time")]
    pub time_ms: i64,
}

impl MessageFormat for PingResponse {
    const TYPE_TAG: &'static str = "Seisbus.Command.PingResponse";
}

/// Register every command-plane format in a codec registry.
pub fn register_command_formats(
    registry: &mut crate::codec::CodecRegistry,
) -> Result<(), crate::error::FabricError> {
    registry.register::<RegistrationRequest>()?;
    registry.register::<RegistrationResponse>()?;
    registry.register::<AvailableModulesRequest>()?;
    registry.register::<AvailableModulesResponse>()?;
    registry.register::<CommandRequest>()?;
    registry.register::<CommandResponse>()?;
    registry.register::<TerminateRequest>()?;
    registry.register::<TerminateResponse>()?;
    registry.register::<PingRequest>()?;
    registry.register::<PingResponse>()?;
    registry.register::<crate::formats::Failure>()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn registration_roundtrip() {
        let request = RegistrationRequest {
            identity: ModuleIdentity::new("packet_cache", 1),
            action: RegistrationAction::Register,
        };
        let bytes = codec::encode(&request).unwrap();
        assert_eq!(codec::decode::<RegistrationRequest>(&bytes).unwrap(), request);
    }

    #[test]
    fn available_modules_roundtrip() {
        let response = AvailableModulesResponse {
            modules: vec![
                ModuleIdentity::new("packet_cache", 1),
                ModuleIdentity::new("pick_associator", 2),
            ],
            id: 42,
        };
        let bytes = codec::encode(&response).unwrap();
        let back: AvailableModulesResponse = codec::decode(&bytes).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn ping_echo_preserves_time() {
        let ping = PingRequest::now();
        assert!(ping.time_ms > 0);
        let pong = PingResponse {
            time_ms: ping.time_ms,
        };
        let bytes = codec::encode(&pong).unwrap();
        assert_eq!(
            codec::decode::<PingResponse>(&bytes).unwrap().time_ms,
            ping.time_ms
        );
    }

    #[test]
    fn all_formats_register_once() {
        let mut registry = crate::codec::CodecRegistry::new();
        register_command_formats(&mut registry).unwrap();
        assert!(registry.contains(CommandRequest::TYPE_TAG));
        // A second pass must fail on the first duplicate.
        assert!(register_command_formats(&mut registry).is_err());
    }

    #[test]
    fn identity_for_this_process_fills_pids() {
        let identity = ModuleIdentity::for_this_process("test_module", 3);
        assert_eq!(identity.pid, std::process::id() as i64);
        assert!(identity.ppid >= 0);
    }
}
