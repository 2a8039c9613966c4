//! Alarm instance state machine.
//!
//! The manager is the only component that changes an instance's state. Every
//! entry point takes the manager lock, re-reads the instance from the store,
//! decides, persists, programs the next wake-up and only then calls the
//! notification gateway.
//!
//! ## State Transitions
//!
//! ```text
//! register -> Silent -> Notification -> Fired -> (Snooze -> Fired)* -> Dismissed
//!                                         |
//!                                         +-> Missed -> Dismissed
//! any upcoming state -> Predismissed -> Dismissed
//! ```
//!
//! `Dismissed` is never written: entering it deletes the instance.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::instance::{AlarmInstance, InstanceId, InstanceState, Timing};
use super::model::{Alarm, AlarmId};
use super::ringtone::{LibraryResolver, RingtoneResolver};
use crate::clock::Clock;
use crate::error::{CoreError, Result, StoreError};
use crate::events::{DeleteReason, Event};
use crate::gateway::{Feedback, NotificationGateway};
use crate::scheduler::{ScheduledTransition, TransitionScheduler};
use crate::storage::{AlarmStore, InstanceFilter};

/// What an entry point did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The instance is now persisted in this state.
    Applied { state: InstanceState },
    /// The instance was removed.
    Deleted,
    /// Nothing changed.
    Ignored { reason: IgnoreReason },
}

impl Outcome {
    fn applied(state: InstanceState) -> Self {
        Outcome::Applied { state }
    }

    fn ignored(reason: IgnoreReason) -> Self {
        Outcome::Ignored { reason }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IgnoreReason {
    /// No such instance (it may have been deleted concurrently).
    NotFound,
    /// The instance moved on; the requested target no longer applies.
    Stale { current: InstanceState },
    /// The wake-up was programmed before the last time-change sweep.
    StaleEpoch { scheduled: u64, current: u64 },
}

/// Counters reported by [`AlarmStateManager::fix_all_instances`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub epoch: u64,
    pub examined: usize,
    pub deleted: usize,
    pub registered: usize,
}

/// Parent lookup as seen by the state machine.
enum Parent {
    Found(Alarm),
    Missing,
    /// The stored alarm row cannot be decoded.
    Unreadable,
}

pub struct AlarmStateManager {
    store: Arc<dyn AlarmStore>,
    scheduler: Arc<dyn TransitionScheduler>,
    gateway: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    ringtones: Arc<dyn RingtoneResolver>,
    timing: Timing,
    lock: Mutex<()>,
    last_next_alarm: Mutex<Option<(InstanceId, NaiveDateTime)>>,
}

impl AlarmStateManager {
    pub fn new(
        store: Arc<dyn AlarmStore>,
        scheduler: Arc<dyn TransitionScheduler>,
        gateway: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scheduler,
            gateway,
            clock,
            ringtones: Arc::new(LibraryResolver::default()),
            timing: Timing::default(),
            lock: Mutex::new(()),
            last_next_alarm: Mutex::new(None),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_ringtones(mut self, ringtones: Arc<dyn RingtoneResolver>) -> Self {
        self.ringtones = ringtones;
        self
    }

    pub fn store(&self) -> &dyn AlarmStore {
        self.store.as_ref()
    }

    pub fn scheduler(&self) -> &dyn TransitionScheduler {
        self.scheduler.as_ref()
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    // ── Entry points ─────────────────────────────────────────────────

    /// Derive and apply the correct state for `instance` at the current time.
    ///
    /// An instance with id 0 is inserted first. Otherwise the persisted
    /// record is re-read and the passed value is only used for its id.
    pub fn register_instance(
        &self,
        instance: &AlarmInstance,
        update_next_alarm: bool,
    ) -> Result<Outcome> {
        let _guard = self.guard();
        let mut current = if instance.id == 0 {
            let mut fresh = instance.clone();
            self.add_instance(&mut fresh, None)?;
            fresh
        } else {
            match self.store.get_instance(instance.id)? {
                Some(current) => current,
                None => {
                    warn!(instance_id = instance.id, "cannot register unknown instance");
                    return Ok(Outcome::ignored(IgnoreReason::NotFound));
                }
            }
        };
        let outcome = self.register_locked(&mut current)?;
        if update_next_alarm {
            self.update_next_alarm()?;
        }
        Ok(outcome)
    }

    /// Move an instance into `target`, if its current state still allows it.
    pub fn request_transition(
        &self,
        instance_id: InstanceId,
        target: InstanceState,
    ) -> Result<Outcome> {
        let _guard = self.guard();
        let outcome = self.transition_locked(instance_id, target, true)?;
        self.finish(&outcome)?;
        Ok(outcome)
    }

    /// Apply a wake-up handed back by the scheduler.
    ///
    /// Wake-ups programmed before the last correction sweep are dropped.
    pub fn deliver(&self, scheduled: &ScheduledTransition) -> Result<Outcome> {
        let _guard = self.guard();
        let epoch = self.store.epoch()?;
        if scheduled.epoch != epoch {
            info!(
                instance_id = scheduled.instance_id,
                target = %scheduled.target,
                scheduled_epoch = scheduled.epoch,
                epoch,
                "ignoring wake-up from an earlier epoch"
            );
            return Ok(Outcome::ignored(IgnoreReason::StaleEpoch {
                scheduled: scheduled.epoch,
                current: epoch,
            }));
        }
        let outcome = self.transition_locked(scheduled.instance_id, scheduled.target, true)?;
        self.finish(&outcome)?;
        Ok(outcome)
    }

    pub fn dismiss(&self, instance_id: InstanceId) -> Result<Outcome> {
        self.request_transition(instance_id, InstanceState::Dismissed)
    }

    pub fn snooze(&self, instance_id: InstanceId, show_feedback: bool) -> Result<Outcome> {
        let _guard = self.guard();
        let outcome = self.transition_locked(instance_id, InstanceState::Snooze, show_feedback)?;
        self.finish(&outcome)?;
        Ok(outcome)
    }

    /// Dismiss an upcoming occurrence ahead of time.
    pub fn predismiss(&self, instance_id: InstanceId) -> Result<Outcome> {
        self.request_transition(instance_id, InstanceState::Predismissed)
    }

    /// Remove every instance of an alarm without touching the alarm itself.
    pub fn delete_all_instances(&self, alarm_id: AlarmId) -> Result<usize> {
        let _guard = self.guard();
        let removed = self.delete_all_locked(alarm_id, DeleteReason::AlarmChanged)?;
        self.update_next_alarm()?;
        Ok(removed)
    }

    /// Drain and apply every wake-up due now.
    ///
    /// Every due wake-up is attempted. One whose delivery fails is put back
    /// into the scheduler, unless the failed attempt already programmed a
    /// newer one, and is retried on the next run.
    pub fn run_due(&self) -> Result<Vec<(ScheduledTransition, Outcome)>> {
        let due = self.scheduler.take_due(self.clock.now())?;
        let total = due.len();
        let mut applied = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for transition in due {
            match self.deliver(&transition) {
                Ok(outcome) => applied.push((transition, outcome)),
                Err(err) => {
                    error!(
                        instance_id = transition.instance_id,
                        target = %transition.target,
                        error = %err,
                        "scheduled transition failed; re-queueing it"
                    );
                    failures.push(format!("instance {}: {err}", transition.instance_id));
                    self.requeue(transition);
                }
            }
        }
        if failures.is_empty() {
            Ok(applied)
        } else {
            Err(CoreError::Custom(format!(
                "{} of {total} scheduled transitions failed: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    /// Re-derive every instance after a clock change, timezone change or
    /// restart.
    ///
    /// Instances are processed latest first, so that correcting an earlier
    /// instance (which may create or rewrite a later one) never resurrects
    /// state that was already fixed.
    pub fn fix_all_instances(&self) -> Result<SweepSummary> {
        let _guard = self.guard();
        let epoch = self.store.epoch()?.wrapping_add(1);
        self.store.set_epoch(epoch)?;

        let now = self.clock.now();
        let mut summary = SweepSummary {
            epoch,
            ..SweepSummary::default()
        };
        let mut instances = self.store.instances(InstanceFilter::All)?;
        instances.sort_by(|a, b| {
            b.fire_time()
                .cmp(&a.fire_time())
                .then_with(|| b.id.cmp(&a.id))
        });

        for snapshot in instances {
            let Some(mut instance) = self.store.get_instance(snapshot.id)? else {
                continue;
            };
            summary.examined += 1;

            let alarm = match self.parent_of(&instance)? {
                Parent::Found(alarm) => alarm,
                Parent::Missing => {
                    warn!(
                        instance_id = instance.id,
                        alarm_id = ?instance.alarm_id,
                        "found instance without matching alarm; deleting it"
                    );
                    self.remove_instance(&instance, DeleteReason::Orphaned)?;
                    summary.deleted += 1;
                    continue;
                }
                Parent::Unreadable => {
                    self.remove_instance(&instance, DeleteReason::Corrupt)?;
                    summary.deleted += 1;
                    continue;
                }
            };

            let prior = alarm.previous_alarm_time(instance.fire_time());
            let invalidated = prior.is_some_and(|prior| now < prior)
                || now > instance.missed_ttl(&self.timing);
            if invalidated {
                let new_fire_time = alarm.next_alarm_time(now);
                info!(
                    instance_id = instance.id,
                    old_fire_time = %instance.fire_time(),
                    new_fire_time = ?new_fire_time,
                    "time change replaced instance"
                );
                self.emit(Event::TimeChangeCorrected {
                    instance_id: instance.id,
                    old_fire_time: instance.fire_time(),
                    new_fire_time,
                });
                self.delete_and_update_parent(&mut instance, DeleteReason::TimeChange)?;
                summary.deleted += 1;
            } else {
                match self.register_locked(&mut instance)? {
                    Outcome::Deleted => summary.deleted += 1,
                    _ => summary.registered += 1,
                }
            }
        }

        self.update_next_alarm()?;
        info!(?summary, "instance correction sweep finished");
        Ok(summary)
    }

    /// Upcoming instance with the earliest fire time.
    pub fn next_firing_instance(&self) -> Result<Option<AlarmInstance>> {
        let upcoming = self.store.instances(InstanceFilter::UPCOMING)?;
        Ok(upcoming
            .into_iter()
            .min_by_key(|instance| (instance.fire_time(), instance.id)))
    }

    // ── Alarm maintenance ────────────────────────────────────────────

    /// Persist a new alarm and, if enabled, arm its first instance.
    pub fn create_alarm(&self, alarm: Alarm) -> Result<Alarm> {
        alarm.validate()?;
        let _guard = self.guard();
        let mut alarm = alarm;
        alarm.id = self.store.add_alarm(&alarm)?;
        info!(alarm_id = alarm.id, hour = alarm.hour, minute = alarm.minute, "created alarm");
        if alarm.enabled {
            self.setup_instance(&alarm)?;
        }
        self.update_next_alarm()?;
        Ok(alarm)
    }

    /// Persist an edited alarm, deciding minor vs. major from the stored copy.
    ///
    /// Returns false if the alarm does not exist.
    pub fn save_alarm(&self, alarm: &Alarm) -> Result<bool> {
        alarm.validate()?;
        let _guard = self.guard();
        let Some(stored) = self.store.get_alarm(alarm.id)? else {
            warn!(alarm_id = alarm.id, "cannot save unknown alarm");
            return Ok(false);
        };
        let minor = stored.is_minor_change(alarm);
        self.update_alarm_locked(alarm, minor)?;
        self.update_next_alarm()?;
        Ok(true)
    }

    /// Persist an edited alarm.
    ///
    /// A minor update rewrites the copied fields of existing instances in
    /// place; a major one replaces all instances.
    pub fn update_alarm(&self, alarm: &Alarm, minor: bool) -> Result<bool> {
        alarm.validate()?;
        let _guard = self.guard();
        let updated = self.update_alarm_locked(alarm, minor)?;
        self.update_next_alarm()?;
        Ok(updated)
    }

    pub fn set_alarm_enabled(&self, alarm_id: AlarmId, enabled: bool) -> Result<bool> {
        let _guard = self.guard();
        let Some(mut alarm) = self.store.get_alarm(alarm_id)? else {
            warn!(alarm_id, "cannot toggle unknown alarm");
            return Ok(false);
        };
        alarm.enabled = enabled;
        self.update_alarm_locked(&alarm, false)?;
        self.update_next_alarm()?;
        Ok(true)
    }

    pub fn delete_alarm(&self, alarm_id: AlarmId) -> Result<bool> {
        let _guard = self.guard();
        self.delete_all_locked(alarm_id, DeleteReason::AlarmChanged)?;
        let deleted = self.store.delete_alarm(alarm_id)?;
        if deleted {
            info!(alarm_id, "deleted alarm");
        }
        self.update_next_alarm()?;
        Ok(deleted)
    }

    // ── Internal (lock held) ─────────────────────────────────────────

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish(&self, outcome: &Outcome) -> Result<()> {
        if !matches!(outcome, Outcome::Ignored { .. }) {
            self.update_next_alarm()?;
        }
        Ok(())
    }

    fn emit(&self, event: Event) {
        self.gateway.publish(&event);
    }

    fn parent_of(&self, instance: &AlarmInstance) -> Result<Parent> {
        let Some(alarm_id) = instance.alarm_id else {
            return Ok(Parent::Missing);
        };
        match self.store.get_alarm(alarm_id) {
            Ok(Some(alarm)) => Ok(Parent::Found(alarm)),
            Ok(None) => Ok(Parent::Missing),
            Err(err @ StoreError::Corrupt { .. }) => {
                warn!(instance_id = instance.id, alarm_id, error = %err, "parent alarm is unreadable");
                Ok(Parent::Unreadable)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn requeue(&self, transition: ScheduledTransition) {
        let instance_id = transition.instance_id;
        let result = self.scheduler.pending(instance_id).and_then(|pending| match pending {
            Some(_) => Ok(()),
            None => self.scheduler.schedule(transition),
        });
        if let Err(err) = result {
            error!(instance_id, error = %err, "could not re-queue scheduled transition");
        }
    }

    fn transition_locked(
        &self,
        instance_id: InstanceId,
        target: InstanceState,
        show_feedback: bool,
    ) -> Result<Outcome> {
        let Some(mut instance) = self.store.get_instance(instance_id)? else {
            warn!(instance_id, %target, "cannot change state of unknown instance");
            self.emit(Event::StaleTransitionIgnored {
                instance_id,
                current: None,
                target,
            });
            return Ok(Outcome::ignored(IgnoreReason::NotFound));
        };

        if !instance.state.accepts(target) {
            info!(
                instance_id,
                current = %instance.state,
                %target,
                "ignoring stale transition"
            );
            self.emit(Event::StaleTransitionIgnored {
                instance_id,
                current: Some(instance.state),
                target,
            });
            return Ok(Outcome::ignored(IgnoreReason::Stale {
                current: instance.state,
            }));
        }

        match target {
            InstanceState::Silent => self.set_silent(&mut instance),
            InstanceState::Notification => self.set_notification(&mut instance),
            InstanceState::Fired => self.set_fired(&mut instance),
            InstanceState::Snooze => self.set_snooze(&mut instance, show_feedback),
            InstanceState::Missed => self.time_out(&mut instance),
            InstanceState::Predismissed => self.set_predismissed(&mut instance, true),
            InstanceState::Dismissed => {
                let reason = if instance.state == InstanceState::Missed
                    && self.clock.now() >= instance.missed_ttl(&self.timing)
                {
                    DeleteReason::Expired
                } else {
                    DeleteReason::Dismissed
                };
                self.delete_and_update_parent(&mut instance, reason)
            }
        }
    }

    fn register_locked(&self, instance: &mut AlarmInstance) -> Result<Outcome> {
        let now = self.clock.now();

        match instance.state {
            InstanceState::Dismissed => {
                error!(instance_id = instance.id, "instance was persisted as dismissed");
                return self.delete_and_update_parent(instance, DeleteReason::Corrupt);
            }
            InstanceState::Fired => {
                let timed_out = instance.timeout().is_some_and(|timeout| now > timeout);
                if !timed_out {
                    return self.set_fired(instance);
                }
            }
            InstanceState::Missed if now < instance.fire_time() => {
                let Some(alarm_id) = instance.alarm_id else {
                    info!(
                        instance_id = instance.id,
                        "cannot restore missed instance of a consumed alarm"
                    );
                    return self.delete_and_update_parent(instance, DeleteReason::Orphaned);
                };
                match self.parent_of(instance)? {
                    Parent::Found(mut alarm) if !alarm.enabled => {
                        alarm.enabled = true;
                        self.store.update_alarm(&alarm)?;
                        info!(alarm_id, "re-enabled parent of restored missed instance");
                    }
                    Parent::Found(_) => {}
                    Parent::Missing => warn!(
                        instance_id = instance.id,
                        alarm_id, "missed instance refers to a deleted alarm"
                    ),
                    Parent::Unreadable => {
                        self.remove_instance(instance, DeleteReason::Corrupt)?;
                        return Ok(Outcome::Deleted);
                    }
                }
            }
            InstanceState::Predismissed => {
                return if now < instance.fire_time() {
                    self.set_predismissed(instance, false)
                } else {
                    self.delete_and_update_parent(instance, DeleteReason::Dismissed)
                };
            }
            _ => {}
        }

        if now > instance.missed_ttl(&self.timing) {
            self.delete_and_update_parent(instance, DeleteReason::Expired)
        } else if now > instance.fire_time() {
            // The clock may have been set right as the alarm was due.
            if now < instance.fire_deadline(&self.timing) {
                self.set_fired(instance)
            } else {
                let advance_parent = !instance.state.parent_advanced();
                self.set_missed(instance, advance_parent)
            }
        } else if instance.state == InstanceState::Snooze {
            // Keep the snoozed time; only restore presentation and wake-up.
            self.gateway.show_snooze_notification(instance);
            self.schedule(instance, instance.fire_time(), InstanceState::Fired)?;
            Ok(Outcome::applied(InstanceState::Snooze))
        } else if now > instance.notification_time(&self.timing) {
            self.set_notification(instance)
        } else {
            self.set_silent(instance)
        }
    }

    fn set_silent(&self, instance: &mut AlarmInstance) -> Result<Outcome> {
        let from = instance.state;
        instance.state = InstanceState::Silent;
        self.persist(instance)?;
        self.gateway.clear_notification(instance.id);
        let notify_at = instance.notification_time(&self.timing);
        self.schedule(instance, notify_at, InstanceState::Notification)?;
        self.state_changed(instance, from);
        Ok(Outcome::applied(InstanceState::Silent))
    }

    fn set_notification(&self, instance: &mut AlarmInstance) -> Result<Outcome> {
        let from = instance.state;
        instance.state = InstanceState::Notification;
        self.persist(instance)?;
        self.gateway.show_upcoming_notification(instance);
        self.schedule(instance, instance.fire_time(), InstanceState::Fired)?;
        self.state_changed(instance, from);
        Ok(Outcome::applied(InstanceState::Notification))
    }

    fn set_fired(&self, instance: &mut AlarmInstance) -> Result<Outcome> {
        let from = instance.state;
        instance.state = InstanceState::Fired;
        if instance.ringtone.is_random() {
            instance.ringtone = self.ringtones.resolve_random();
            debug!(instance_id = instance.id, ringtone = %instance.ringtone, "resolved random ringtone");
        }
        self.persist(instance)?;

        // A backward time jump can turn a missed instance into a firing one
        // while a later sibling already exists.
        if let Some(alarm_id) = instance.alarm_id {
            self.delete_other_instances(alarm_id, instance.id)?;
        }

        self.gateway.show_firing_notification(instance);
        match instance.timeout() {
            Some(timeout) => self.schedule(instance, timeout, InstanceState::Missed)?,
            None => {
                self.scheduler.cancel(instance.id)?;
            }
        }
        self.state_changed(instance, from);
        Ok(Outcome::applied(InstanceState::Fired))
    }

    fn set_snooze(&self, instance: &mut AlarmInstance, show_feedback: bool) -> Result<Outcome> {
        let Some(minutes) = instance.snooze_minutes else {
            info!(instance_id = instance.id, "snooze disabled; dismissing instead");
            return self.delete_and_update_parent(instance, DeleteReason::Dismissed);
        };

        self.gateway.stop_playback(instance.id);
        let from = instance.state;
        instance.set_fire_time(self.clock.now() + Duration::minutes(minutes.into()));
        instance.state = InstanceState::Snooze;
        self.persist(instance)?;
        self.gateway.show_snooze_notification(instance);
        self.schedule(instance, instance.fire_time(), InstanceState::Fired)?;
        if show_feedback {
            self.gateway.show_feedback(&Feedback::Snoozed {
                instance_id: instance.id,
                until: instance.fire_time(),
            });
        }
        self.state_changed(instance, from);
        Ok(Outcome::applied(InstanceState::Snooze))
    }

    /// The auto-silence wake-up of a firing instance.
    fn time_out(&self, instance: &mut AlarmInstance) -> Result<Outcome> {
        if instance.snooze_minutes.is_some() {
            if instance.auto_silence_minutes.is_none() {
                info!(instance_id = instance.id, "alarm never auto-silences; snoozing instead of missing");
                return self.set_snooze(instance, true);
            }
            let limit = match self.parent_of(instance)? {
                Parent::Found(alarm) => alarm.missed_repeat_limit,
                Parent::Missing => 0,
                Parent::Unreadable => {
                    self.remove_instance(instance, DeleteReason::Corrupt)?;
                    return Ok(Outcome::Deleted);
                }
            };
            if instance.timeout_snoozes < limit {
                instance.timeout_snoozes += 1;
                info!(
                    instance_id = instance.id,
                    repeat = instance.timeout_snoozes,
                    limit,
                    "timed out; snoozing before marking missed"
                );
                return self.set_snooze(instance, false);
            }
        }
        self.set_missed(instance, true)
    }

    fn set_missed(&self, instance: &mut AlarmInstance, advance_parent: bool) -> Result<Outcome> {
        if instance.state == InstanceState::Fired {
            self.gateway.stop_playback(instance.id);
        }
        let from = instance.state;
        instance.state = InstanceState::Missed;
        if advance_parent {
            self.update_parent(instance)?;
        }
        self.persist(instance)?;
        self.gateway.show_missed_notification(instance);
        let expires_at = instance.missed_ttl(&self.timing);
        self.schedule(instance, expires_at, InstanceState::Dismissed)?;
        self.state_changed(instance, from);
        Ok(Outcome::applied(InstanceState::Missed))
    }

    fn set_predismissed(
        &self,
        instance: &mut AlarmInstance,
        advance_parent: bool,
    ) -> Result<Outcome> {
        if instance.state == InstanceState::Fired {
            self.gateway.stop_playback(instance.id);
        }
        let from = instance.state;
        instance.state = InstanceState::Predismissed;
        if advance_parent {
            self.update_parent(instance)?;
        }
        self.persist(instance)?;
        self.gateway.clear_notification(instance.id);
        self.schedule(instance, instance.fire_time(), InstanceState::Dismissed)?;
        self.state_changed(instance, from);
        Ok(Outcome::applied(InstanceState::Predismissed))
    }

    fn delete_and_update_parent(
        &self,
        instance: &mut AlarmInstance,
        reason: DeleteReason,
    ) -> Result<Outcome> {
        let previous = instance.state;
        self.unregister(instance)?;
        instance.state = InstanceState::Dismissed;
        if !previous.parent_advanced() {
            self.update_parent(instance)?;
        }
        self.store.delete_instance(instance.id)?;
        info!(instance_id = instance.id, from = %previous, ?reason, "deleted instance");
        self.emit(Event::InstanceDeleted {
            instance_id: instance.id,
            alarm_id: instance.alarm_id,
            reason,
        });
        Ok(Outcome::Deleted)
    }

    /// Delete without touching the parent.
    fn remove_instance(&self, instance: &AlarmInstance, reason: DeleteReason) -> Result<()> {
        self.unregister(instance)?;
        self.store.delete_instance(instance.id)?;
        self.emit(Event::InstanceDeleted {
            instance_id: instance.id,
            alarm_id: instance.alarm_id,
            reason,
        });
        Ok(())
    }

    fn unregister(&self, instance: &AlarmInstance) -> Result<()> {
        if instance.state == InstanceState::Fired {
            self.gateway.stop_playback(instance.id);
        }
        self.gateway.clear_notification(instance.id);
        self.scheduler.cancel(instance.id)?;
        Ok(())
    }

    fn delete_other_instances(&self, alarm_id: AlarmId, keep: InstanceId) -> Result<()> {
        let siblings: Vec<AlarmInstance> = self
            .store
            .instances_for_alarm(alarm_id)?
            .into_iter()
            .filter(|other| other.id != keep)
            .collect();
        for sibling in &siblings {
            self.unregister(sibling)?;
        }
        let removed = self.store.delete_other_instances(alarm_id, keep)?;
        for sibling in siblings {
            self.emit(Event::InstanceDeleted {
                instance_id: sibling.id,
                alarm_id: Some(alarm_id),
                reason: DeleteReason::Superseded,
            });
        }
        if removed > 0 {
            info!(alarm_id, kept = keep, removed, "deleted sibling instances");
        }
        Ok(())
    }

    fn delete_all_locked(&self, alarm_id: AlarmId, reason: DeleteReason) -> Result<usize> {
        let instances = self.store.instances_for_alarm(alarm_id)?;
        for instance in &instances {
            self.remove_instance(instance, reason)?;
        }
        Ok(instances.len())
    }

    /// Disable, delete or re-arm the parent after `instance` is consumed.
    fn update_parent(&self, instance: &mut AlarmInstance) -> Result<()> {
        let Some(alarm_id) = instance.alarm_id else {
            return Ok(());
        };
        // An unreadable parent is left alone; the instance is consumed either way.
        let mut alarm = match self.parent_of(instance)? {
            Parent::Found(alarm) => alarm,
            Parent::Missing => {
                warn!(instance_id = instance.id, alarm_id, "parent alarm has been deleted");
                return Ok(());
            }
            Parent::Unreadable => return Ok(()),
        };

        if !alarm.is_repeating() {
            if alarm.deletes_after_use() {
                info!(alarm_id, "deleting one-shot parent alarm");
                self.store.delete_alarm(alarm_id)?;
                self.orphan_instances(alarm_id, instance)?;
                self.gateway.show_feedback(&Feedback::AlarmDeleted {
                    label: alarm.label.clone(),
                });
                self.emit(Event::ParentAlarmDeleted { alarm_id });
            } else if alarm.enabled {
                info!(alarm_id, "disabling one-shot parent alarm");
                alarm.enabled = false;
                self.store.update_alarm(&alarm)?;
                self.emit(Event::ParentAlarmDisabled { alarm_id });
            }
            return Ok(());
        }

        let now = self.clock.now();
        let mut next = alarm.create_instance_after(now);
        let collides = next
            .as_ref()
            .is_some_and(|n| n.fire_time() == instance.fire_time());
        if instance.state > InstanceState::Fired && collides {
            next = alarm.create_instance_after(instance.fire_time());
        }
        let Some(mut next) = next else {
            error!(alarm_id, "could not compute the next occurrence");
            return Ok(());
        };

        info!(alarm_id, fire_time = %next.fire_time(), "creating next instance of repeating alarm");
        self.add_instance(&mut next, Some(instance.id))?;
        self.register_locked(&mut next)?;
        Ok(())
    }

    fn orphan_instances(&self, alarm_id: AlarmId, current: &mut AlarmInstance) -> Result<()> {
        current.alarm_id = None;
        for mut other in self.store.instances_for_alarm(alarm_id)? {
            if other.id != current.id {
                other.alarm_id = None;
                self.store.update_instance(&other)?;
            }
        }
        Ok(())
    }

    fn setup_instance(&self, alarm: &Alarm) -> Result<()> {
        let Some(mut instance) = alarm.create_instance_after(self.clock.now()) else {
            error!(alarm_id = alarm.id, "could not compute the first occurrence");
            return Ok(());
        };
        self.add_instance(&mut instance, None)?;
        self.register_locked(&mut instance)?;
        Ok(())
    }

    fn update_alarm_locked(&self, alarm: &Alarm, minor: bool) -> Result<bool> {
        if !self.store.update_alarm(alarm)? {
            warn!(alarm_id = alarm.id, "cannot update unknown alarm");
            return Ok(false);
        }

        if minor {
            for mut instance in self.store.instances_for_alarm(alarm.id)? {
                instance.copy_minor_fields(alarm);
                self.persist(&instance)?;
                match instance.state {
                    InstanceState::Notification => self.gateway.show_upcoming_notification(&instance),
                    InstanceState::Snooze => self.gateway.show_snooze_notification(&instance),
                    InstanceState::Fired => self.gateway.show_firing_notification(&instance),
                    InstanceState::Missed => self.gateway.show_missed_notification(&instance),
                    _ => {}
                }
            }
            debug!(alarm_id = alarm.id, "applied minor alarm edit to instances");
            return Ok(true);
        }

        self.delete_all_locked(alarm.id, DeleteReason::AlarmChanged)?;
        if alarm.enabled {
            self.setup_instance(alarm)?;
        }
        Ok(true)
    }

    /// Insert `instance`, or overwrite an existing instance of the same alarm
    /// at the same fire time. `exclude` is never chosen as the duplicate.
    fn add_instance(
        &self,
        instance: &mut AlarmInstance,
        exclude: Option<InstanceId>,
    ) -> Result<()> {
        if let Some(alarm_id) = instance.alarm_id {
            let duplicate = self
                .store
                .instances_for_alarm(alarm_id)?
                .into_iter()
                .find(|other| {
                    Some(other.id) != exclude && other.fire_time() == instance.fire_time()
                });
            if let Some(existing) = duplicate {
                info!(
                    instance_id = existing.id,
                    alarm_id,
                    fire_time = %existing.fire_time(),
                    "duplicate instance found; updating it instead"
                );
                instance.id = existing.id;
                self.store.update_instance(instance)?;
                return Ok(());
            }
        }

        instance.id = self.store.add_instance(instance)?;
        self.emit(Event::InstanceCreated {
            instance_id: instance.id,
            alarm_id: instance.alarm_id,
            fire_time: instance.fire_time(),
        });
        Ok(())
    }

    fn persist(&self, instance: &AlarmInstance) -> Result<()> {
        if !self.store.update_instance(instance)? {
            warn!(instance_id = instance.id, "instance vanished while updating");
        }
        Ok(())
    }

    fn schedule(
        &self,
        instance: &AlarmInstance,
        at: NaiveDateTime,
        target: InstanceState,
    ) -> Result<()> {
        let transition = ScheduledTransition {
            instance_id: instance.id,
            target,
            at,
            epoch: self.store.epoch()?,
        };
        debug!(instance_id = instance.id, %target, %at, "scheduled transition");
        self.scheduler.schedule(transition)?;
        Ok(())
    }

    fn state_changed(&self, instance: &AlarmInstance, from: InstanceState) {
        info!(
            instance_id = instance.id,
            alarm_id = ?instance.alarm_id,
            %from,
            to = %instance.state,
            fire_time = %instance.fire_time(),
            "instance state changed"
        );
        self.emit(Event::StateChanged {
            instance_id: instance.id,
            alarm_id: instance.alarm_id,
            from,
            to: instance.state,
            fire_time: instance.fire_time(),
        });
    }

    fn update_next_alarm(&self) -> Result<()> {
        let next = self.next_firing_instance()?;
        self.gateway.update_next_alarm_indicator(next.as_ref());

        let key = next.as_ref().map(|i| (i.id, i.fire_time()));
        let mut last = self
            .last_next_alarm
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if *last != key {
            *last = key;
            self.emit(Event::NextAlarmChanged {
                instance_id: key.map(|(id, _)| id),
                fire_time: key.map(|(_, at)| at),
            });
        }
        Ok(())
    }
}
