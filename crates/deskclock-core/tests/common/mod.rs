//! Shared harness: a manager wired to in-memory collaborators and a clock
//! that only moves when the test says so.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use deskclock_core::{
    Alarm, AlarmInstance, AlarmStateManager, AlarmStore, InstanceFilter, InstanceState,
    ManualClock, MemoryScheduler, MemoryStore, RecordingGateway, Weekdays,
};

pub struct Harness {
    pub manager: AlarmStateManager,
    pub store: Arc<MemoryStore>,
    pub scheduler: Arc<MemoryScheduler>,
    pub gateway: Arc<RecordingGateway>,
    pub clock: Arc<ManualClock>,
}

/// 2026-10-19 is a Monday.
pub fn at(day: u32, hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, day)
        .unwrap()
        .and_hms_opt(hour, minute, second)
        .unwrap()
}

pub fn harness(now: NaiveDateTime) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let scheduler = Arc::new(MemoryScheduler::new());
    let gateway = Arc::new(RecordingGateway::new());
    let clock = Arc::new(ManualClock::new(now));
    let manager = AlarmStateManager::new(
        store.clone(),
        scheduler.clone(),
        gateway.clone(),
        clock.clone(),
    );
    Harness {
        manager,
        store,
        scheduler,
        gateway,
        clock,
    }
}

impl Harness {
    pub fn one_shot(&self, hour: u32, minute: u32) -> Alarm {
        self.manager
            .create_alarm(Alarm::new(hour, minute).unwrap())
            .unwrap()
    }

    pub fn daily(&self, hour: u32, minute: u32) -> Alarm {
        let mut alarm = Alarm::new(hour, minute).unwrap();
        alarm.repeat = Weekdays::ALL;
        self.manager.create_alarm(alarm).unwrap()
    }

    /// Persist an alarm directly, without arming any instance.
    pub fn stored(&self, mut alarm: Alarm) -> Alarm {
        alarm.id = self.store.add_alarm(&alarm).unwrap();
        alarm
    }

    /// Persist an instance in `state` directly, bypassing the manager.
    pub fn seed(
        &self,
        alarm: Option<&Alarm>,
        fire_time: NaiveDateTime,
        state: InstanceState,
    ) -> AlarmInstance {
        let mut instance = match alarm {
            Some(alarm) => AlarmInstance::from_alarm(alarm, fire_time),
            None => AlarmInstance::new(None, fire_time),
        };
        instance.state = state;
        instance.id = self.store.add_instance(&instance).unwrap();
        instance
    }

    pub fn instance(&self, id: i64) -> Option<AlarmInstance> {
        self.store.get_instance(id).unwrap()
    }

    pub fn instances(&self) -> Vec<AlarmInstance> {
        let mut all = self.store.instances(InstanceFilter::All).unwrap();
        all.sort_by_key(|i| (i.fire_time(), i.id));
        all
    }

    pub fn alarm(&self, id: i64) -> Option<Alarm> {
        self.store.get_alarm(id).unwrap()
    }
}
