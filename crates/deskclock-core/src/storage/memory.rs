//! In-process store, used by tests and by embedders that bring their own
//! persistence.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{AlarmStore, InstanceFilter};
use crate::alarm::{Alarm, AlarmId, AlarmInstance, InstanceId};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct Tables {
    alarms: BTreeMap<AlarmId, Alarm>,
    instances: BTreeMap<InstanceId, AlarmInstance>,
    last_alarm_id: AlarmId,
    last_instance_id: InstanceId,
    epoch: u64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlarmStore for MemoryStore {
    fn get_alarm(&self, id: AlarmId) -> Result<Option<Alarm>, StoreError> {
        Ok(self.tables.lock()?.alarms.get(&id).cloned())
    }

    fn alarms(&self) -> Result<Vec<Alarm>, StoreError> {
        Ok(self.tables.lock()?.alarms.values().cloned().collect())
    }

    fn add_alarm(&self, alarm: &Alarm) -> Result<AlarmId, StoreError> {
        let mut tables = self.tables.lock()?;
        tables.last_alarm_id += 1;
        let id = tables.last_alarm_id;
        let mut stored = alarm.clone();
        stored.id = id;
        tables.alarms.insert(id, stored);
        Ok(id)
    }

    fn update_alarm(&self, alarm: &Alarm) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock()?;
        match tables.alarms.get_mut(&alarm.id) {
            Some(slot) => {
                *slot = alarm.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_alarm(&self, id: AlarmId) -> Result<bool, StoreError> {
        Ok(self.tables.lock()?.alarms.remove(&id).is_some())
    }

    fn get_instance(&self, id: InstanceId) -> Result<Option<AlarmInstance>, StoreError> {
        Ok(self.tables.lock()?.instances.get(&id).cloned())
    }

    fn instances(&self, filter: InstanceFilter) -> Result<Vec<AlarmInstance>, StoreError> {
        Ok(self
            .tables
            .lock()?
            .instances
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect())
    }

    fn add_instance(&self, instance: &AlarmInstance) -> Result<InstanceId, StoreError> {
        let mut tables = self.tables.lock()?;
        tables.last_instance_id += 1;
        let id = tables.last_instance_id;
        let mut stored = instance.clone();
        stored.id = id;
        tables.instances.insert(id, stored);
        Ok(id)
    }

    fn update_instance(&self, instance: &AlarmInstance) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock()?;
        match tables.instances.get_mut(&instance.id) {
            Some(slot) => {
                *slot = instance.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_instance(&self, id: InstanceId) -> Result<bool, StoreError> {
        Ok(self.tables.lock()?.instances.remove(&id).is_some())
    }

    fn delete_other_instances(
        &self,
        alarm_id: AlarmId,
        keep: InstanceId,
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables.lock()?;
        let before = tables.instances.len();
        tables
            .instances
            .retain(|id, i| *id == keep || i.alarm_id != Some(alarm_id));
        Ok(before - tables.instances.len())
    }

    fn epoch(&self) -> Result<u64, StoreError> {
        Ok(self.tables.lock()?.epoch)
    }

    fn set_epoch(&self, epoch: u64) -> Result<(), StoreError> {
        self.tables.lock()?.epoch = epoch;
        Ok(())
    }
}
