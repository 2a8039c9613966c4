use chrono::{NaiveDateTime, NaiveTime, Timelike};
use clap::{Args, Subcommand};
use deskclock_core::{Alarm, AlarmId, AlarmStore, Ringtone, Weekdays};

use super::{print_json, App, CliResult};

#[derive(Subcommand)]
pub enum AlarmAction {
    /// Create an alarm
    Add {
        /// Time of day (HH:MM)
        #[arg(value_parser = parse_time_of_day)]
        time: NaiveTime,
        #[command(flatten)]
        settings: AlarmSettings,
        /// Create the alarm disabled
        #[arg(long)]
        disabled: bool,
    },
    /// List all alarms as JSON
    List,
    /// Change an existing alarm
    Edit {
        id: AlarmId,
        /// New time of day (HH:MM)
        #[arg(long, value_parser = parse_time_of_day)]
        time: Option<NaiveTime>,
        #[command(flatten)]
        settings: AlarmSettings,
    },
    /// Enable an alarm
    Enable { id: AlarmId },
    /// Disable an alarm and drop its instances
    Disable { id: AlarmId },
    /// Delete an alarm and its instances
    Delete { id: AlarmId },
}

/// Settings shared by `add` and `edit`; omitted flags keep the current value.
#[derive(Args)]
pub struct AlarmSettings {
    /// Repeat days: "never", "daily", "weekdays", "weekends" or e.g. "mon,wed,fri"
    #[arg(long)]
    repeat: Option<Weekdays>,
    #[arg(long)]
    label: Option<String>,
    /// "default", "silent", "random" or a ringtone URI
    #[arg(long)]
    ringtone: Option<String>,
    #[arg(long)]
    vibrate: Option<bool>,
    /// Snooze length in minutes; 0 disables snoozing
    #[arg(long)]
    snooze: Option<u32>,
    /// Minutes before a ringing alarm is marked missed; 0 rings until acted upon
    #[arg(long)]
    auto_silence: Option<u32>,
    /// Auto-snoozes after a timeout before the alarm counts as missed
    #[arg(long)]
    missed_repeat_limit: Option<u32>,
    #[arg(long)]
    crescendo: Option<u32>,
    #[arg(long)]
    volume: Option<u8>,
    /// Delete the alarm once its single occurrence is consumed
    #[arg(long)]
    delete_after_use: Option<bool>,
}

impl AlarmSettings {
    fn apply(self, alarm: &mut Alarm) {
        if let Some(repeat) = self.repeat {
            alarm.repeat = repeat;
        }
        if let Some(label) = self.label {
            alarm.label = label;
        }
        if let Some(ringtone) = self.ringtone {
            alarm.ringtone = Ringtone::from_stored(&ringtone);
        }
        if let Some(vibrate) = self.vibrate {
            alarm.vibrate = vibrate;
        }
        if let Some(snooze) = self.snooze {
            alarm.snooze_minutes = Some(snooze).filter(|m| *m > 0);
        }
        if let Some(auto_silence) = self.auto_silence {
            alarm.auto_silence_minutes = Some(auto_silence).filter(|m| *m > 0);
        }
        if let Some(limit) = self.missed_repeat_limit {
            alarm.missed_repeat_limit = limit;
        }
        if let Some(crescendo) = self.crescendo {
            alarm.crescendo_secs = crescendo;
        }
        if let Some(volume) = self.volume {
            alarm.volume = Some(volume);
        }
        if let Some(delete_after_use) = self.delete_after_use {
            alarm.delete_after_use = delete_after_use;
        }
    }
}

fn parse_time_of_day(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| format!("expected HH:MM, got '{s}'"))
}

pub fn run(action: AlarmAction, at: Option<NaiveDateTime>) -> CliResult {
    let app = App::open(at)?;
    match action {
        AlarmAction::Add {
            time,
            settings,
            disabled,
        } => {
            let mut alarm = app.config.new_alarm(time.hour(), time.minute())?;
            settings.apply(&mut alarm);
            alarm.enabled = !disabled;
            let alarm = app.manager.create_alarm(alarm)?;
            print_json(&alarm)?;
        }
        AlarmAction::List => {
            print_json(&app.db.alarms()?)?;
        }
        AlarmAction::Edit { id, time, settings } => {
            let mut alarm = app
                .db
                .get_alarm(id)?
                .ok_or_else(|| format!("alarm {id} not found"))?;
            if let Some(time) = time {
                alarm.hour = time.hour();
                alarm.minute = time.minute();
            }
            settings.apply(&mut alarm);
            app.manager.save_alarm(&alarm)?;
            print_json(&alarm)?;
        }
        AlarmAction::Enable { id } => toggle(&app, id, true)?,
        AlarmAction::Disable { id } => toggle(&app, id, false)?,
        AlarmAction::Delete { id } => {
            if !app.manager.delete_alarm(id)? {
                return Err(format!("alarm {id} not found").into());
            }
            println!("deleted alarm {id}");
        }
    }
    Ok(())
}

fn toggle(app: &App, id: AlarmId, enabled: bool) -> CliResult {
    if !app.manager.set_alarm_enabled(id, enabled)? {
        return Err(format!("alarm {id} not found").into());
    }
    let alarm = app.db.get_alarm(id)?;
    print_json(&alarm)
}
