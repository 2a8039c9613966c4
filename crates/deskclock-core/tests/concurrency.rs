//! Racing triggers against the same instance.

mod common;

use std::thread;

use common::{at, harness};
use deskclock_core::{
    Alarm, AlarmStore, Event, InstanceState, Outcome, ScheduledTransition, Weekdays,
};

#[test]
fn test_timeout_and_dismiss_race_updates_parent_once() {
    for _ in 0..50 {
        let h = harness(at(19, 7, 10, 0));
        let mut alarm = Alarm::new(7, 0).unwrap();
        alarm.repeat = Weekdays::ALL;
        let alarm = h.stored(alarm);
        let instance = h.seed(Some(&alarm), at(19, 7, 0, 0), InstanceState::Fired);
        let timeout = ScheduledTransition {
            instance_id: instance.id,
            target: InstanceState::Missed,
            at: at(19, 7, 10, 0),
            epoch: h.store.epoch().unwrap(),
        };

        let (timed_out, dismissed) = thread::scope(|s| {
            let a = s.spawn(|| h.manager.deliver(&timeout).unwrap());
            let b = s.spawn(|| h.manager.dismiss(instance.id).unwrap());
            (a.join().unwrap(), b.join().unwrap())
        });

        let deletions = [&timed_out, &dismissed]
            .iter()
            .filter(|outcome| ***outcome == Outcome::Deleted)
            .count();
        assert_eq!(deletions, 1, "timeout={timed_out:?} dismiss={dismissed:?}");
        assert!(h.instance(instance.id).is_none());

        let remaining = h.instances();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].fire_time(), at(20, 7, 0, 0));

        let created = h
            .gateway
            .events()
            .into_iter()
            .filter(|event| matches!(event, Event::InstanceCreated { .. }))
            .count();
        assert_eq!(created, 1);
    }
}

#[test]
fn test_parallel_commands_never_persist_dismissed() {
    let h = harness(at(19, 6, 0, 0));
    let alarms: Vec<Alarm> = (0..8).map(|i| h.daily(7, i * 5)).collect();
    let ids: Vec<i64> = h.instances().iter().map(|i| i.id).collect();
    assert_eq!(ids.len(), alarms.len());

    thread::scope(|s| {
        for id in &ids {
            s.spawn(|| h.manager.predismiss(*id).unwrap());
            s.spawn(|| h.manager.dismiss(*id).unwrap());
        }
    });

    for instance in h.instances() {
        assert_ne!(instance.state, InstanceState::Dismissed);
    }
}
