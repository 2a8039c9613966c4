use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDateTime;

use super::{ScheduledTransition, TransitionScheduler};
use crate::alarm::InstanceId;
use crate::error::StoreError;

/// Volatile scheduler keyed by instance id.
#[derive(Debug, Default)]
pub struct MemoryScheduler {
    pending: Mutex<HashMap<InstanceId, ScheduledTransition>>,
}

impl MemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything pending, earliest first.
    pub fn snapshot(&self) -> Vec<ScheduledTransition> {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = pending.values().cloned().collect();
        all.sort_by_key(|t| (t.at, t.instance_id));
        all
    }
}

impl TransitionScheduler for MemoryScheduler {
    fn schedule(&self, transition: ScheduledTransition) -> Result<(), StoreError> {
        self.pending
            .lock()?
            .insert(transition.instance_id, transition);
        Ok(())
    }

    fn cancel(&self, instance_id: InstanceId) -> Result<bool, StoreError> {
        Ok(self.pending.lock()?.remove(&instance_id).is_some())
    }

    fn pending(&self, instance_id: InstanceId) -> Result<Option<ScheduledTransition>, StoreError> {
        Ok(self.pending.lock()?.get(&instance_id).cloned())
    }

    fn take_due(&self, now: NaiveDateTime) -> Result<Vec<ScheduledTransition>, StoreError> {
        let mut pending = self.pending.lock()?;
        let due_ids: Vec<InstanceId> = pending
            .values()
            .filter(|t| t.at <= now)
            .map(|t| t.instance_id)
            .collect();
        let mut due: Vec<ScheduledTransition> = due_ids
            .into_iter()
            .filter_map(|id| pending.remove(&id))
            .collect();
        due.sort_by_key(|t| (t.at, t.instance_id));
        Ok(due)
    }

    fn next_deadline(&self) -> Result<Option<NaiveDateTime>, StoreError> {
        Ok(self.pending.lock()?.values().map(|t| t.at).min())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::InstanceState;
    use chrono::{Duration, NaiveDate};

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(7, 0, 0)
            .unwrap()
    }

    fn transition(id: InstanceId, minutes: i64, target: InstanceState) -> ScheduledTransition {
        ScheduledTransition {
            instance_id: id,
            target,
            at: base() + Duration::minutes(minutes),
            epoch: 0,
        }
    }

    #[test]
    fn rescheduling_supersedes() {
        let scheduler = MemoryScheduler::new();
        scheduler.schedule(transition(1, 0, InstanceState::Notification)).unwrap();
        scheduler.schedule(transition(1, 30, InstanceState::Fired)).unwrap();
        assert_eq!(scheduler.snapshot().len(), 1);
        assert_eq!(
            scheduler.pending(1).unwrap().map(|t| t.target),
            Some(InstanceState::Fired)
        );
    }

    #[test]
    fn take_due_is_at_most_once() {
        let scheduler = MemoryScheduler::new();
        scheduler.schedule(transition(2, 5, InstanceState::Fired)).unwrap();
        scheduler.schedule(transition(1, 0, InstanceState::Fired)).unwrap();
        scheduler.schedule(transition(3, 60, InstanceState::Fired)).unwrap();

        let due = scheduler.take_due(base() + Duration::minutes(5)).unwrap();
        assert_eq!(due.iter().map(|t| t.instance_id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(scheduler.take_due(base() + Duration::minutes(5)).unwrap().is_empty());
        assert_eq!(
            scheduler.next_deadline().unwrap(),
            Some(base() + Duration::minutes(60))
        );
    }

    #[test]
    fn cancel_is_idempotent() {
        let scheduler = MemoryScheduler::new();
        scheduler.schedule(transition(1, 0, InstanceState::Fired)).unwrap();
        assert!(scheduler.cancel(1).unwrap());
        assert!(!scheduler.cancel(1).unwrap());
    }
}
