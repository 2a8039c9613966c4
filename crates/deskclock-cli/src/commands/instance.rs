use chrono::NaiveDateTime;
use clap::Subcommand;
use deskclock_core::{AlarmId, AlarmStore, Command, InstanceFilter, InstanceId, InstanceState};

use super::{print_json, App, CliResult};

#[derive(Subcommand)]
pub enum InstanceAction {
    /// List instances as JSON
    List {
        /// Only instances of this alarm
        #[arg(long)]
        alarm: Option<AlarmId>,
        /// Only instances that have not fired yet
        #[arg(long, conflicts_with = "alarm")]
        upcoming: bool,
    },
    /// Re-derive an instance's state from the current time
    Register { id: InstanceId },
    /// Request a state change
    Transition {
        id: InstanceId,
        /// silent, notification, snooze, fired, missed, predismissed or dismissed
        state: InstanceState,
        /// Fence the request like a scheduled wake-up from this epoch
        #[arg(long)]
        epoch: Option<u64>,
    },
    /// Dismiss a ringing, snoozed or missed instance
    Dismiss { id: InstanceId },
    /// Snooze a ringing instance
    Snooze {
        id: InstanceId,
        /// Do not show the "snoozed" feedback
        #[arg(long)]
        quiet: bool,
    },
    /// Dismiss an upcoming instance ahead of time
    Predismiss { id: InstanceId },
    /// Delete every instance of an alarm
    DeleteAll { alarm_id: AlarmId },
}

pub fn run(action: InstanceAction, at: Option<NaiveDateTime>) -> CliResult {
    let app = App::open(at)?;
    let command = match action {
        InstanceAction::List { alarm, upcoming } => {
            let filter = match (alarm, upcoming) {
                (Some(alarm_id), _) => InstanceFilter::Alarm(alarm_id),
                (None, true) => InstanceFilter::UPCOMING,
                (None, false) => InstanceFilter::All,
            };
            return print_json(&app.db.instances(filter)?);
        }
        InstanceAction::Register { id } => Command::Register { instance_id: id },
        InstanceAction::Transition { id, state, epoch } => Command::Transition {
            instance_id: id,
            target: state,
            epoch,
        },
        InstanceAction::Dismiss { id } => Command::Dismiss { instance_id: id },
        InstanceAction::Snooze { id, quiet } => Command::Snooze {
            instance_id: id,
            show_feedback: !quiet,
        },
        InstanceAction::Predismiss { id } => Command::Predismiss { instance_id: id },
        InstanceAction::DeleteAll { alarm_id } => Command::DeleteAll { alarm_id },
    };

    let output = app.manager.execute(command)?;
    print_json(&output)
}
