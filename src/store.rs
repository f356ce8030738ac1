//! Document store: where prescriptions and schedules are persisted.
//!
//! The pipeline talks to persistence only through [`DocumentStore`], so a
//! database-backed implementation can be injected without touching any
//! stage. [`MemoryStore`] is the bundled implementation, used by the CLI
//! and the tests.

use crate::error::StoreError;
use crate::model::{PrescriptionRecord, ScheduleRecord};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// CRUD operations over the prescription and schedule collections.
pub trait DocumentStore: Send + Sync {
    /// Whether `user_id` names a known user.
    fn user_exists(&self, user_id: &str) -> Result<bool, StoreError>;

    fn insert_prescription(&self, record: &PrescriptionRecord) -> Result<(), StoreError>;

    fn insert_schedule(&self, record: &ScheduleRecord) -> Result<(), StoreError>;

    fn find_prescription(&self, id: Uuid) -> Result<Option<PrescriptionRecord>, StoreError>;

    fn find_schedule(&self, id: Uuid) -> Result<Option<ScheduleRecord>, StoreError>;

    /// Schedules owned by `user_id`, oldest first.
    fn schedules_for_user(&self, user_id: &str) -> Result<Vec<ScheduleRecord>, StoreError>;

    /// Prescriptions owned by `user_id`, newest first.
    fn prescriptions_for_user(&self, user_id: &str)
        -> Result<Vec<PrescriptionRecord>, StoreError>;

    /// Set `enabled`; returns `false` when no schedule has this id.
    fn set_schedule_enabled(&self, id: Uuid, enabled: bool) -> Result<bool, StoreError>;

    /// Returns `false` when no schedule has this id.
    fn delete_schedule(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Returns `false` when no schedule has this id.
    fn set_last_reminder_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;
}

/// In-memory [`DocumentStore`].
///
/// Schedules keep insertion order so listings are stable.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashSet<String>>,
    prescriptions: RwLock<HashMap<Uuid, PrescriptionRecord>>,
    schedules: RwLock<Vec<ScheduleRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `user_id` known to the store.
    pub fn register_user(&self, user_id: impl Into<String>) -> Result<(), StoreError> {
        write(&self.users)?.insert(user_id.into());
        Ok(())
    }

    pub fn prescription_count(&self) -> Result<usize, StoreError> {
        Ok(read(&self.prescriptions)?.len())
    }

    pub fn schedule_count(&self) -> Result<usize, StoreError> {
        Ok(read(&self.schedules)?.len())
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Backend("store lock poisoned".into()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Backend("store lock poisoned".into()))
}

impl DocumentStore for MemoryStore {
    fn user_exists(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(read(&self.users)?.contains(user_id))
    }

    fn insert_prescription(&self, record: &PrescriptionRecord) -> Result<(), StoreError> {
        write(&self.prescriptions)?.insert(record.id, record.clone());
        Ok(())
    }

    fn insert_schedule(&self, record: &ScheduleRecord) -> Result<(), StoreError> {
        write(&self.schedules)?.push(record.clone());
        Ok(())
    }

    fn find_prescription(&self, id: Uuid) -> Result<Option<PrescriptionRecord>, StoreError> {
        Ok(read(&self.prescriptions)?.get(&id).cloned())
    }

    fn find_schedule(&self, id: Uuid) -> Result<Option<ScheduleRecord>, StoreError> {
        Ok(read(&self.schedules)?.iter().find(|s| s.id == id).cloned())
    }

    fn schedules_for_user(&self, user_id: &str) -> Result<Vec<ScheduleRecord>, StoreError> {
        Ok(read(&self.schedules)?
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    fn prescriptions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<PrescriptionRecord>, StoreError> {
        let mut out: Vec<PrescriptionRecord> = read(&self.prescriptions)?
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    fn set_schedule_enabled(&self, id: Uuid, enabled: bool) -> Result<bool, StoreError> {
        let mut schedules = write(&self.schedules)?;
        Ok(match schedules.iter_mut().find(|s| s.id == id) {
            Some(s) => {
                s.enabled = enabled;
                true
            }
            None => false,
        })
    }

    fn delete_schedule(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut schedules = write(&self.schedules)?;
        let before = schedules.len();
        schedules.retain(|s| s.id != id);
        Ok(schedules.len() != before)
    }

    fn set_last_reminder_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut schedules = write(&self.schedules)?;
        Ok(match schedules.iter_mut().find(|s| s.id == id) {
            Some(s) => {
                s.last_reminder_sent = Some(at);
                true
            }
            None => false,
        })
    }
}
