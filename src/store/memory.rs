use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    CostEntry, GenerationRecord, GenerationStatus, NewGeneration, RideNote, RiderPreferences,
};

use super::{GenerationStore, NoteStore, PreferenceStore, StatusUpdate, StoreError};

#[derive(Default)]
struct Inner {
    records: HashMap<Uuid, GenerationRecord>,
    notes: HashMap<Uuid, RideNote>,
    preferences: HashMap<Uuid, RiderPreferences>,
    ledger: Vec<CostEntry>,
}

/// In-process backend used when no `DATABASE_URL` is configured and by the
/// test suite. One mutex guards all maps, so the active-job assertion and
/// version allocation in `create` are naturally a single atomic step.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn active_for(&self, owner: Uuid, note_id: Uuid) -> Option<&GenerationRecord> {
        self.records
            .values()
            .find(|r| r.owner_id == owner && r.note_id == note_id && r.status.is_active())
    }

    fn next_version(&self, owner: Uuid, note_id: Uuid) -> i32 {
        self.records
            .values()
            .filter(|r| r.owner_id == owner && r.note_id == note_id)
            .map(|r| r.version)
            .max()
            .unwrap_or(0)
            + 1
    }
}

#[async_trait]
impl GenerationStore for MemoryStore {
    async fn find_by_request_id(
        &self,
        owner: Uuid,
        request_id: Uuid,
    ) -> Result<Option<GenerationRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .records
            .values()
            .find(|r| r.owner_id == owner && r.request_id == request_id)
            .cloned())
    }

    async fn find_active(
        &self,
        owner: Uuid,
        note_id: Uuid,
    ) -> Result<Option<GenerationRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.active_for(owner, note_id).cloned())
    }

    async fn create(&self, new: NewGeneration) -> Result<GenerationRecord, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(existing) = inner
            .records
            .values()
            .find(|r| r.owner_id == new.owner_id && r.request_id == new.request_id)
        {
            return Err(StoreError::DuplicateRequest {
                itinerary_id: existing.itinerary_id,
            });
        }
        if let Some(active) = inner.active_for(new.owner_id, new.note_id) {
            return Err(StoreError::ActiveJobExists {
                itinerary_id: active.itinerary_id,
            });
        }

        let now = Utc::now();
        let record = GenerationRecord {
            itinerary_id: new.itinerary_id,
            note_id: new.note_id,
            owner_id: new.owner_id,
            version: inner.next_version(new.owner_id, new.note_id),
            status: GenerationStatus::Pending,
            progress: None,
            request_id: new.request_id,
            created_at: now,
            updated_at: now,
            terminated_at: None,
            route: None,
            error: None,
            cancel_requested: false,
            cost_estimate: None,
        };
        inner.records.insert(record.itinerary_id, record.clone());
        Ok(record)
    }

    async fn update_status(
        &self,
        itinerary_id: Uuid,
        from: GenerationStatus,
        to: GenerationStatus,
        update: StatusUpdate,
    ) -> Result<GenerationRecord, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .records
            .get_mut(&itinerary_id)
            .ok_or(StoreError::NotFound)?;

        if record.status != from || !from.can_transition_to(to) {
            return Err(StoreError::StatusConflict { expected: from });
        }

        let now = Utc::now();
        record.status = to;
        record.updated_at = now;
        if to.is_terminal() {
            record.terminated_at = Some(now);
        }
        if let Some(progress) = update.progress {
            let current = record.progress.unwrap_or(0);
            record.progress = Some(current.max(progress.min(100)));
        }
        if to == GenerationStatus::Completed {
            record.route = update.route;
        }
        if to == GenerationStatus::Failed {
            record.error = update.error;
        }
        if let Some(cost) = update.cost_estimate {
            record.cost_estimate = Some(cost);
        }
        Ok(record.clone())
    }

    async fn set_progress(&self, itinerary_id: Uuid, progress: u8) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .records
            .get_mut(&itinerary_id)
            .ok_or(StoreError::NotFound)?;
        if record.status.is_active() {
            let current = record.progress.unwrap_or(0);
            if progress > current {
                record.progress = Some(progress.min(100));
                record.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn set_cancel_requested(
        &self,
        itinerary_id: Uuid,
    ) -> Result<GenerationRecord, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .records
            .get_mut(&itinerary_id)
            .ok_or(StoreError::NotFound)?;
        if !record.cancel_requested {
            record.cancel_requested = true;
            record.updated_at = Utc::now();
        }
        Ok(record.clone())
    }

    async fn get(&self, itinerary_id: Uuid) -> Result<Option<GenerationRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.records.get(&itinerary_id).cloned())
    }

    async fn list_for_note(
        &self,
        owner: Uuid,
        note_id: Uuid,
        status: Option<GenerationStatus>,
        limit: i64,
    ) -> Result<Vec<GenerationRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut records: Vec<GenerationRecord> = inner
            .records
            .values()
            .filter(|r| r.owner_id == owner && r.note_id == note_id)
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.version.cmp(&a.version));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }

    async fn record_cost(&self, entry: CostEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.ledger.push(entry);
        Ok(())
    }

    async fn spend_since(
        &self,
        owner: Uuid,
        window_start: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .ledger
            .iter()
            .filter(|e| e.owner_id == owner && e.recorded_at > window_start)
            .map(|e| e.amount)
            .sum())
    }

    async fn oldest_cost_since(
        &self,
        owner: Uuid,
        window_start: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .ledger
            .iter()
            .filter(|e| e.owner_id == owner && e.recorded_at > window_start)
            .map(|e| e.recorded_at)
            .min())
    }
}

#[async_trait]
impl NoteStore for MemoryStore {
    async fn note(&self, note_id: Uuid) -> Result<Option<RideNote>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.notes.get(&note_id).cloned())
    }

    async fn upsert_note(&self, note: RideNote) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.notes.insert(note.id, note);
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn preferences(&self, owner: Uuid) -> Result<Option<RiderPreferences>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.preferences.get(&owner).cloned())
    }

    async fn upsert_preferences(&self, prefs: RiderPreferences) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.preferences.insert(prefs.owner_id, prefs);
        Ok(())
    }
}
