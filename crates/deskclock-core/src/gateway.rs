//! Presentation side effects.
//!
//! The state manager calls a [`NotificationGateway`] after it has persisted a
//! change. Calls are best-effort: a gateway cannot fail a transition.

use std::sync::Mutex;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::alarm::{AlarmInstance, InstanceId};
use crate::events::Event;

/// Short-lived user feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Feedback {
    Snoozed { instance_id: InstanceId, until: NaiveDateTime },
    /// A one-shot alarm was consumed and removed.
    AlarmDeleted { label: String },
}

pub trait NotificationGateway: Send + Sync {
    fn show_upcoming_notification(&self, instance: &AlarmInstance);
    fn show_snooze_notification(&self, instance: &AlarmInstance);
    fn show_missed_notification(&self, instance: &AlarmInstance);
    fn show_firing_notification(&self, instance: &AlarmInstance);
    fn clear_notification(&self, instance_id: InstanceId);
    fn update_next_alarm_indicator(&self, next: Option<&AlarmInstance>);
    fn stop_playback(&self, instance_id: InstanceId);
    fn show_feedback(&self, feedback: &Feedback);

    fn publish(&self, _event: &Event) {}
}

/// Writes every call to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingGateway;

impl NotificationGateway for TracingGateway {
    fn show_upcoming_notification(&self, instance: &AlarmInstance) {
        tracing::debug!(instance_id = instance.id, fire_time = %instance.fire_time(), "upcoming notification");
    }

    fn show_snooze_notification(&self, instance: &AlarmInstance) {
        tracing::debug!(instance_id = instance.id, fire_time = %instance.fire_time(), "snooze notification");
    }

    fn show_missed_notification(&self, instance: &AlarmInstance) {
        tracing::debug!(instance_id = instance.id, fire_time = %instance.fire_time(), "missed notification");
    }

    fn show_firing_notification(&self, instance: &AlarmInstance) {
        tracing::info!(instance_id = instance.id, label = %instance.label, ringtone = %instance.ringtone, "alarm firing");
    }

    fn clear_notification(&self, instance_id: InstanceId) {
        tracing::debug!(instance_id, "clear notification");
    }

    fn update_next_alarm_indicator(&self, next: Option<&AlarmInstance>) {
        match next {
            Some(instance) => {
                tracing::debug!(instance_id = instance.id, fire_time = %instance.fire_time(), "next alarm")
            }
            None => tracing::debug!("no upcoming alarm"),
        }
    }

    fn stop_playback(&self, instance_id: InstanceId) {
        tracing::debug!(instance_id, "stop playback");
    }

    fn show_feedback(&self, feedback: &Feedback) {
        tracing::info!(?feedback, "feedback");
    }

    fn publish(&self, event: &Event) {
        tracing::debug!(?event, "event");
    }
}

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Upcoming(InstanceId),
    Snooze(InstanceId),
    Missed(InstanceId),
    Firing(InstanceId),
    Clear(InstanceId),
    NextAlarm(Option<InstanceId>),
    StopPlayback(InstanceId),
    Feedback(Feedback),
}

/// Keeps every call and event in memory, for embedding in tests or
/// headless front ends that poll.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    events: Mutex<Vec<Event>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn record(&self, call: GatewayCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

impl NotificationGateway for RecordingGateway {
    fn show_upcoming_notification(&self, instance: &AlarmInstance) {
        self.record(GatewayCall::Upcoming(instance.id));
    }

    fn show_snooze_notification(&self, instance: &AlarmInstance) {
        self.record(GatewayCall::Snooze(instance.id));
    }

    fn show_missed_notification(&self, instance: &AlarmInstance) {
        self.record(GatewayCall::Missed(instance.id));
    }

    fn show_firing_notification(&self, instance: &AlarmInstance) {
        self.record(GatewayCall::Firing(instance.id));
    }

    fn clear_notification(&self, instance_id: InstanceId) {
        self.record(GatewayCall::Clear(instance_id));
    }

    fn update_next_alarm_indicator(&self, next: Option<&AlarmInstance>) {
        self.record(GatewayCall::NextAlarm(next.map(|i| i.id)));
    }

    fn stop_playback(&self, instance_id: InstanceId) {
        self.record(GatewayCall::StopPlayback(instance_id));
    }

    fn show_feedback(&self, feedback: &Feedback) {
        self.record(GatewayCall::Feedback(feedback.clone()));
    }

    fn publish(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
