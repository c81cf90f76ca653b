//! Mapping from provider server status to the abstract machine state.

use machine_core::MachineState;

use crate::api::ServerStatus;

/// Deterministic status table.
///
/// `Initializing` and `Starting` both surface as `Starting`. Statuses
/// without a row of their own (deleting, migrating, rebuilding) surface as
/// `Unknown`, never as `Error`: uncommon provider states are not failures.
pub fn machine_state(status: ServerStatus) -> MachineState {
    match status {
        ServerStatus::Running => MachineState::Running,
        ServerStatus::Off => MachineState::Stopped,
        ServerStatus::Stopping => MachineState::Stopping,
        ServerStatus::Initializing | ServerStatus::Starting => MachineState::Starting,
        ServerStatus::Deleting | ServerStatus::Other => MachineState::Unknown,
    }
}
