//! Driver-side contract of the machine lifecycle framework.
//!
//! A driver provisions and manages exactly one remote machine. The host
//! framework constructs a driver per machine record, calls
//! [`Driver::configure`] once with the user-supplied options, persists the
//! driver's configuration between invocations, and then issues lifecycle
//! operations one at a time. Drivers targeting other providers implement
//! the same [`Driver`] trait; the only shared state is the plain
//! [`MachineBase`] bundle.

mod options;

pub use options::{DriverOptions, Flag};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("--{0} option is required")]
    MissingOption(&'static str),

    #[error("driver is not configured")]
    NotConfigured,

    #[error("{0} not found")]
    NotFound(String),

    #[error("provider api error: {0}")]
    Provider(String),

    #[error("{command:?} action failed: {detail}")]
    ActionFailed { command: String, detail: String },

    #[error("{command:?} action did not finish within {timeout:?}")]
    ActionTimeout { command: String, timeout: Duration },

    #[error("machine has no server bound; run create first")]
    NotProvisioned,

    #[error("machine \"{name}\" is not running (state: {state})")]
    NotRunning { name: String, state: MachineState },

    #[error("server {server_id} was created but provisioning did not complete")]
    CreateIncomplete {
        server_id: i64,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Whether the error is the provider's structured "resource does not
    /// exist" answer, as opposed to any other failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Abstract lifecycle state of a machine, independent of any provider's
/// native status vocabulary.
///
/// `Unknown` covers provider statuses with no mapping of their own; the
/// state mapper never turns an unrecognized status into `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Starting,
    Running,
    Stopped,
    Stopping,
    Error,
    Unknown,
}

impl MachineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Stopping => "stopping",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-machine data every driver carries: identity assigned by the host
/// framework, where its files live, and how to reach it over SSH.
///
/// This is composed into driver structs, not inherited from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineBase {
    pub machine_name: String,
    pub store_path: String,
    pub ssh_user: String,
    pub ssh_port: u16,
    /// Public address, bound by a successful `create`.
    pub ip_address: Option<String>,
}

impl MachineBase {
    pub fn new(machine_name: impl Into<String>, store_path: impl Into<String>) -> Self {
        Self {
            machine_name: machine_name.into(),
            store_path: store_path.into(),
            ssh_user: "root".into(),
            ssh_port: 22,
            ip_address: None,
        }
    }
}

/// Provider-agnostic interface for managing a single remote machine.
///
/// The framework serializes calls per machine, so operations other than
/// `configure` and `create` take `&self` and drivers need no interior
/// locking around their bound identity.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Stable identifier of the driver backend (e.g. `"hcloud"`).
    fn driver_name(&self) -> &'static str;

    /// Name of the machine this driver instance is bound to.
    fn machine_name(&self) -> &str;

    /// Configuration surface the driver accepts, for flag/env rendering.
    fn create_flags(&self) -> Vec<Flag>;

    /// Validate options and construct the authenticated provider client.
    /// Must fail before any network activity if a required option is
    /// missing.
    fn configure(&mut self, opts: &DriverOptions) -> Result<()>;

    /// Provision the remote machine. On success the remote identity and
    /// public address are bound, exactly once.
    async fn create(&mut self) -> Result<()>;

    /// Power on a stopped machine.
    async fn start(&self) -> Result<()>;

    /// Gracefully shut the machine down.
    async fn stop(&self) -> Result<()>;

    /// Reboot the machine.
    async fn restart(&self) -> Result<()>;

    /// Force power-off, without a guest shutdown.
    async fn kill(&self) -> Result<()>;

    /// Delete the remote machine. Removing an already-gone machine is not
    /// an error.
    async fn remove(&self) -> Result<()>;

    /// Current abstract state, from a fresh provider read.
    async fn state(&self) -> Result<MachineState>;

    /// Cached public address; fails before a successful `create`.
    fn ip(&self) -> Result<String>;

    /// Hostname SSH sessions should dial.
    fn ssh_hostname(&self) -> Result<String> {
        self.ip()
    }

    /// Connection URL for the engine on the machine. Only meaningful while
    /// the machine is running.
    async fn url(&self) -> Result<String>;
}

/// Generic guard for address-bearing values: the machine must currently
/// report the `Running` state.
pub async fn must_be_running<D: Driver + ?Sized>(driver: &D) -> Result<()> {
    match driver.state().await? {
        MachineState::Running => Ok(()),
        state => Err(Error::NotRunning {
            name: driver.machine_name().to_string(),
            state,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_state_display() {
        assert_eq!(MachineState::Running.to_string(), "running");
        assert_eq!(MachineState::Stopped.to_string(), "stopped");
        assert_eq!(MachineState::Unknown.to_string(), "unknown");
    }

    #[test]
    fn base_defaults() {
        let base = MachineBase::new("box-1", "/var/lib/machines/box-1");
        assert_eq!(base.ssh_user, "root");
        assert_eq!(base.ssh_port, 22);
        assert!(base.ip_address.is_none());
    }

    #[test]
    fn not_found_classification() {
        assert!(Error::NotFound("server 42".into()).is_not_found());
        assert!(!Error::Provider("boom".into()).is_not_found());
        assert!(!Error::NotProvisioned.is_not_found());
    }

    #[test]
    fn create_incomplete_keeps_identity_and_cause() {
        let err = Error::CreateIncomplete {
            server_id: 42,
            source: Box::new(Error::ActionFailed {
                command: "create_server".into(),
                detail: "placement failed".into(),
            }),
        };
        assert!(err.to_string().contains("42"));
        let source = std::error::Error::source(&err).expect("cause");
        assert!(source.to_string().contains("create_server"));
    }
}
