//! Serializable requests for the state manager.
//!
//! Front ends (the CLI, the service channel) build a [`Command`] and hand it to
//! [`AlarmStateManager::execute`]; the manager stays the single place where
//! state changes happen.

use serde::{Deserialize, Serialize};

use crate::alarm::{AlarmId, AlarmStateManager, IgnoreReason, InstanceId, InstanceState, Outcome, SweepSummary};
use crate::error::Result;
use crate::scheduler::ScheduledTransition;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Re-derive the state of a persisted instance.
    Register { instance_id: InstanceId },
    /// Move an instance into `target`. With an epoch the request is fenced
    /// like a scheduler wake-up.
    Transition {
        instance_id: InstanceId,
        target: InstanceState,
        #[serde(default)]
        epoch: Option<u64>,
    },
    Dismiss { instance_id: InstanceId },
    Snooze {
        instance_id: InstanceId,
        #[serde(default = "default_feedback")]
        show_feedback: bool,
    },
    Predismiss { instance_id: InstanceId },
    DeleteAll { alarm_id: AlarmId },
    FixAll,
}

fn default_feedback() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutput {
    Instance(Outcome),
    Removed { count: usize },
    Swept(SweepSummary),
}

impl AlarmStateManager {
    pub fn execute(&self, command: Command) -> Result<CommandOutput> {
        tracing::debug!(?command, "executing command");
        let output = match command {
            Command::Register { instance_id } => match self.store().get_instance(instance_id)? {
                Some(instance) => CommandOutput::Instance(self.register_instance(&instance, true)?),
                None => CommandOutput::Instance(Outcome::Ignored {
                    reason: IgnoreReason::NotFound,
                }),
            },
            Command::Transition {
                instance_id,
                target,
                epoch: Some(epoch),
            } => CommandOutput::Instance(self.deliver(&ScheduledTransition {
                instance_id,
                target,
                at: self.now(),
                epoch,
            })?),
            Command::Transition {
                instance_id,
                target,
                epoch: None,
            } => CommandOutput::Instance(self.request_transition(instance_id, target)?),
            Command::Dismiss { instance_id } => CommandOutput::Instance(self.dismiss(instance_id)?),
            Command::Snooze {
                instance_id,
                show_feedback,
            } => CommandOutput::Instance(self.snooze(instance_id, show_feedback)?),
            Command::Predismiss { instance_id } => {
                CommandOutput::Instance(self.predismiss(instance_id)?)
            }
            Command::DeleteAll { alarm_id } => CommandOutput::Removed {
                count: self.delete_all_instances(alarm_id)?,
            },
            Command::FixAll => CommandOutput::Swept(self.fix_all_instances()?),
        };
        Ok(output)
    }
}
