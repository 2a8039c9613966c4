use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::alarm::{AlarmId, InstanceId, InstanceState};

/// Every change the state manager makes produces an Event.
/// Gateways may forward them to a UI, a log, or nowhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    InstanceCreated {
        instance_id: InstanceId,
        alarm_id: Option<AlarmId>,
        fire_time: NaiveDateTime,
    },
    StateChanged {
        instance_id: InstanceId,
        alarm_id: Option<AlarmId>,
        from: InstanceState,
        to: InstanceState,
        fire_time: NaiveDateTime,
    },
    InstanceDeleted {
        instance_id: InstanceId,
        alarm_id: Option<AlarmId>,
        reason: DeleteReason,
    },
    ParentAlarmDisabled {
        alarm_id: AlarmId,
    },
    ParentAlarmDeleted {
        alarm_id: AlarmId,
    },
    /// A scheduled or requested transition no longer applied.
    StaleTransitionIgnored {
        instance_id: InstanceId,
        current: Option<InstanceState>,
        target: InstanceState,
    },
    /// The correction sweep replaced an instance invalidated by a time jump.
    TimeChangeCorrected {
        instance_id: InstanceId,
        old_fire_time: NaiveDateTime,
        new_fire_time: Option<NaiveDateTime>,
    },
    NextAlarmChanged {
        instance_id: Option<InstanceId>,
        fire_time: Option<NaiveDateTime>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteReason {
    Dismissed,
    /// Missed time-to-live elapsed before anyone dismissed it.
    Expired,
    /// Parent alarm no longer exists.
    Orphaned,
    /// Another instance of the same alarm started firing.
    Superseded,
    /// Invalidated by a clock or timezone change.
    TimeChange,
    /// Removed together with its alarm or by a major alarm edit.
    AlarmChanged,
    /// Found persisted in the dismissed state.
    Corrupt,
}
