//! Integration tests for the correction sweep run after clock, timezone
//! or restart events.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use common::{at, harness};
use deskclock_core::{
    Alarm, AlarmId, AlarmInstance, AlarmStateManager, AlarmStore, DeleteReason, Event,
    IgnoreReason, InstanceFilter, InstanceId, InstanceState, ManualClock, MemoryScheduler,
    MemoryStore, Outcome, RecordingGateway, StoreError, TransitionScheduler, Weekdays,
};

fn daily_alarm(hour: u32, minute: u32) -> Alarm {
    let mut alarm = Alarm::new(hour, minute).unwrap();
    alarm.repeat = Weekdays::ALL;
    alarm
}

#[test]
fn test_sweep_deletes_orphans() {
    let h = harness(at(19, 6, 0, 0));
    let ghost = h.stored(Alarm::new(7, 0).unwrap());
    let instance = h.seed(Some(&ghost), at(19, 7, 0, 0), InstanceState::Silent);
    h.store.delete_alarm(ghost.id).unwrap();

    let summary = h.manager.fix_all_instances().unwrap();

    assert_eq!(summary.examined, 1);
    assert_eq!(summary.deleted, 1);
    assert!(h.instance(instance.id).is_none());
}

#[test]
fn test_backward_jump_recreates_earlier_occurrence() {
    let h = harness(at(20, 7, 0, 0));
    let alarm = h.stored(daily_alarm(7, 0));
    let tuesday = h.seed(Some(&alarm), at(21, 7, 0, 0), InstanceState::Silent);

    // Back to Sunday noon: Tuesday's instance skips Monday's occurrence.
    h.clock.set(at(18, 12, 0, 0));
    h.manager.fix_all_instances().unwrap();

    let all = h.instances();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].fire_time(), at(19, 7, 0, 0));
    assert_eq!(all[0].state, InstanceState::Silent);
    assert!(h.gateway.events().contains(&Event::TimeChangeCorrected {
        instance_id: tuesday.id,
        old_fire_time: at(21, 7, 0, 0),
        new_fire_time: Some(at(19, 7, 0, 0)),
    }));
}

#[test]
fn test_sweep_processes_latest_first() {
    let h = harness(at(19, 6, 0, 0));
    let alarm = h.stored(daily_alarm(7, 0));
    h.seed(Some(&alarm), at(19, 7, 0, 0), InstanceState::Silent);
    h.seed(Some(&alarm), at(20, 7, 0, 0), InstanceState::Silent);
    h.seed(Some(&alarm), at(21, 7, 0, 0), InstanceState::Silent);

    h.clock.set(at(18, 12, 0, 0));
    let summary = h.manager.fix_all_instances().unwrap();

    assert_eq!(summary.examined, 3);
    let all = h.instances();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].fire_time(), at(19, 7, 0, 0));
}

#[test]
fn test_forward_jump_past_ttl_consumes_one_shot() {
    let h = harness(at(19, 6, 0, 0));
    let alarm = h.one_shot(7, 0);

    h.clock.set(at(20, 8, 0, 0));
    h.manager.fix_all_instances().unwrap();

    assert!(h.instances().is_empty());
    assert!(!h.alarm(alarm.id).unwrap().enabled);
}

#[test]
fn test_forward_jump_within_ttl_marks_missed() {
    let h = harness(at(19, 6, 0, 0));
    let alarm = h.daily(7, 0);

    h.clock.set(at(19, 9, 0, 0));
    h.manager.fix_all_instances().unwrap();

    let all = h.instances();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].state, InstanceState::Missed);
    assert_eq!(all[1].fire_time(), at(20, 7, 0, 0));
    assert!(h.alarm(alarm.id).unwrap().enabled);
}

#[test]
fn test_restart_keeps_firing_instance() {
    let h = harness(at(19, 7, 3, 0));
    let alarm = h.stored(Alarm::new(7, 0).unwrap());
    let instance = h.seed(Some(&alarm), at(19, 7, 0, 0), InstanceState::Fired);

    let summary = h.manager.fix_all_instances().unwrap();

    assert_eq!(summary.registered, 1);
    assert_eq!(h.instance(instance.id).unwrap().state, InstanceState::Fired);
}

#[test]
fn test_sweep_fences_earlier_wake_ups() {
    let h = harness(at(19, 6, 0, 0));
    h.one_shot(7, 0);
    let before = h.scheduler.snapshot();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].epoch, 0);

    let summary = h.manager.fix_all_instances().unwrap();
    assert_eq!(summary.epoch, 1);
    assert!(h.scheduler.snapshot().iter().all(|t| t.epoch == 1));

    let outcome = h.manager.deliver(&before[0]).unwrap();
    assert_eq!(
        outcome,
        Outcome::Ignored {
            reason: IgnoreReason::StaleEpoch {
                scheduled: 0,
                current: 1
            }
        }
    );
}

#[test]
fn test_sweep_recomputes_next_alarm_once() {
    let h = harness(at(19, 4, 0, 0));
    h.daily(7, 0);
    h.daily(8, 0);
    h.gateway.clear();

    h.manager.fix_all_instances().unwrap();

    let indicator_updates = h
        .gateway
        .calls()
        .into_iter()
        .filter(|call| matches!(call, deskclock_core::gateway::GatewayCall::NextAlarm(_)))
        .count();
    assert_eq!(indicator_updates, 1);
}

/// Memory store that reports chosen alarm rows as undecodable and fails the
/// next read of chosen instances.
struct FaultyStore {
    inner: MemoryStore,
    unreadable_alarms: Mutex<HashSet<AlarmId>>,
    failing_reads: Mutex<HashSet<InstanceId>>,
}

impl FaultyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            unreadable_alarms: Mutex::new(HashSet::new()),
            failing_reads: Mutex::new(HashSet::new()),
        }
    }

    fn corrupt_alarm(&self, id: AlarmId) {
        self.unreadable_alarms.lock().unwrap().insert(id);
    }

    fn fail_next_read(&self, id: InstanceId) {
        self.failing_reads.lock().unwrap().insert(id);
    }
}

impl AlarmStore for FaultyStore {
    fn get_alarm(&self, id: AlarmId) -> Result<Option<Alarm>, StoreError> {
        if self.unreadable_alarms.lock().unwrap().contains(&id) {
            return Err(StoreError::Corrupt {
                table: "alarms",
                id,
                message: "Invalid repeat schedule bits 0xc8".into(),
            });
        }
        self.inner.get_alarm(id)
    }

    fn alarms(&self) -> Result<Vec<Alarm>, StoreError> {
        self.inner.alarms()
    }

    fn add_alarm(&self, alarm: &Alarm) -> Result<AlarmId, StoreError> {
        self.inner.add_alarm(alarm)
    }

    fn update_alarm(&self, alarm: &Alarm) -> Result<bool, StoreError> {
        self.inner.update_alarm(alarm)
    }

    fn delete_alarm(&self, id: AlarmId) -> Result<bool, StoreError> {
        self.inner.delete_alarm(id)
    }

    fn get_instance(&self, id: InstanceId) -> Result<Option<AlarmInstance>, StoreError> {
        if self.failing_reads.lock().unwrap().remove(&id) {
            return Err(StoreError::Locked);
        }
        self.inner.get_instance(id)
    }

    fn instances(&self, filter: InstanceFilter) -> Result<Vec<AlarmInstance>, StoreError> {
        self.inner.instances(filter)
    }

    fn add_instance(&self, instance: &AlarmInstance) -> Result<InstanceId, StoreError> {
        self.inner.add_instance(instance)
    }

    fn update_instance(&self, instance: &AlarmInstance) -> Result<bool, StoreError> {
        self.inner.update_instance(instance)
    }

    fn delete_instance(&self, id: InstanceId) -> Result<bool, StoreError> {
        self.inner.delete_instance(id)
    }

    fn delete_other_instances(
        &self,
        alarm_id: AlarmId,
        keep: InstanceId,
    ) -> Result<usize, StoreError> {
        self.inner.delete_other_instances(alarm_id, keep)
    }

    fn epoch(&self) -> Result<u64, StoreError> {
        self.inner.epoch()
    }

    fn set_epoch(&self, epoch: u64) -> Result<(), StoreError> {
        self.inner.set_epoch(epoch)
    }
}

struct Faulty {
    manager: AlarmStateManager,
    store: Arc<FaultyStore>,
    scheduler: Arc<MemoryScheduler>,
    gateway: Arc<RecordingGateway>,
    clock: Arc<ManualClock>,
}

fn faulty(now: chrono::NaiveDateTime) -> Faulty {
    let store = Arc::new(FaultyStore::new());
    let scheduler = Arc::new(MemoryScheduler::new());
    let gateway = Arc::new(RecordingGateway::new());
    let clock = Arc::new(ManualClock::new(now));
    let manager = AlarmStateManager::new(
        store.clone(),
        scheduler.clone(),
        gateway.clone(),
        clock.clone(),
    );
    Faulty {
        manager,
        store,
        scheduler,
        gateway,
        clock,
    }
}

fn only_instance_of(f: &Faulty, alarm_id: AlarmId) -> AlarmInstance {
    let instances = f.store.inner.instances_for_alarm(alarm_id).unwrap();
    assert_eq!(instances.len(), 1);
    instances[0].clone()
}

#[test]
fn test_sweep_deletes_instance_of_unreadable_alarm_and_continues() {
    let f = faulty(at(19, 6, 0, 0));
    let broken = f.manager.create_alarm(daily_alarm(7, 0)).unwrap();
    let healthy = f.manager.create_alarm(Alarm::new(6, 30).unwrap()).unwrap();
    let doomed = only_instance_of(&f, broken.id);
    let kept = only_instance_of(&f, healthy.id);
    f.store.corrupt_alarm(broken.id);

    let summary = f.manager.fix_all_instances().unwrap();

    assert_eq!(summary.epoch, 1);
    assert_eq!(summary.examined, 2);
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.registered, 1);
    assert!(f.store.get_instance(doomed.id).unwrap().is_none());
    assert!(f.gateway.events().contains(&Event::InstanceDeleted {
        instance_id: doomed.id,
        alarm_id: Some(broken.id),
        reason: DeleteReason::Corrupt,
    }));

    // The healthy alarm was re-armed at the new epoch and still fires.
    let pending = f.scheduler.pending(kept.id).unwrap().unwrap();
    assert_eq!(pending.epoch, 1);
    f.clock.set(at(19, 6, 30, 0));
    let applied = f.manager.run_due().unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].0.instance_id, kept.id);
    assert_eq!(applied[0].1, Outcome::Applied { state: InstanceState::Fired });
}

#[test]
fn test_timeout_with_unreadable_parent_deletes_instance() {
    let f = faulty(at(19, 6, 0, 0));
    let alarm = f.manager.create_alarm(daily_alarm(7, 0)).unwrap();
    let instance = only_instance_of(&f, alarm.id);
    f.clock.set(at(19, 7, 0, 0));
    f.manager.run_due().unwrap();
    f.store.corrupt_alarm(alarm.id);

    f.clock.set(at(19, 7, 10, 0));
    let applied = f.manager.run_due().unwrap();

    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].0.target, InstanceState::Missed);
    assert_eq!(applied[0].1, Outcome::Deleted);
    assert!(f.store.get_instance(instance.id).unwrap().is_none());
    assert!(f.scheduler.pending(instance.id).unwrap().is_none());
}

#[test]
fn test_failed_delivery_is_requeued_and_others_still_apply() {
    let f = faulty(at(19, 6, 0, 0));
    let first = f.manager.create_alarm(Alarm::new(7, 0).unwrap()).unwrap();
    let second = f.manager.create_alarm(Alarm::new(7, 5).unwrap()).unwrap();
    let flaky = only_instance_of(&f, first.id);
    let steady = only_instance_of(&f, second.id);
    f.store.fail_next_read(flaky.id);

    f.clock.set(at(19, 7, 6, 0));
    assert!(f.manager.run_due().is_err());

    let steady = f.store.get_instance(steady.id).unwrap().unwrap();
    assert_eq!(steady.state, InstanceState::Fired);
    let retry = f.scheduler.pending(flaky.id).unwrap().unwrap();
    assert_eq!(retry.target, InstanceState::Fired);
    assert_eq!(retry.at, at(19, 7, 0, 0));

    let applied = f.manager.run_due().unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].0.instance_id, flaky.id);
    assert_eq!(applied[0].1, Outcome::Applied { state: InstanceState::Fired });
}
