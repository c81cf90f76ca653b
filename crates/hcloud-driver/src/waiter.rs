//! Completion protocol for provider-side asynchronous actions.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::info;

use machine_core::{Error, Result};

use crate::api::{ActionHandle, ActionStatus, CloudApi};

/// How an action is tracked to its terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitOptions {
    /// Delay between progress reads.
    pub poll_interval: Duration,
    /// Overall deadline for the wait. `None` blocks until the provider
    /// reports a terminal status, which is what the host framework's
    /// synchronous call contract expects.
    pub timeout: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: None,
        }
    }
}

/// Block until `action` reaches a terminal outcome.
///
/// Intermediate progress is discarded; only the start and the end of the
/// wait are logged, tagged with the action's command label. Returns the
/// provider's error payload when the action itself fails, and
/// [`Error::ActionTimeout`] once the optional deadline elapses.
pub async fn wait_for_action<A: CloudApi + ?Sized>(
    api: &A,
    action: ActionHandle,
    opts: &WaitOptions,
) -> Result<()> {
    let command = action.command.clone();
    info!(command = %command, action_id = action.id, "waiting for action to complete");

    let deadline = opts.timeout.map(|timeout| (Instant::now() + timeout, timeout));
    let mut current = action;
    loop {
        match current.status {
            ActionStatus::Success => {
                info!(command = %command, "action succeeded");
                return Ok(());
            }
            ActionStatus::Error => {
                return Err(Error::ActionFailed {
                    command,
                    detail: current
                        .error
                        .unwrap_or_else(|| "no error payload".into()),
                });
            }
            ActionStatus::Running => {}
        }

        if let Some((deadline, timeout)) = deadline {
            if Instant::now() >= deadline {
                return Err(Error::ActionTimeout { command, timeout });
            }
        }

        sleep(opts.poll_interval).await;
        current = api.action_by_id(current.id).await?;
    }
}
