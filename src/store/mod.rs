pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    CostEntry, GenerationFailure, GenerationRecord, GenerationStatus, NewGeneration, RideNote,
    RiderPreferences, RouteDocument,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("an active generation already exists for this note")]
    ActiveJobExists { itinerary_id: Uuid },
    #[error("a generation with this request id already exists")]
    DuplicateRequest { itinerary_id: Uuid },
    #[error("record is not in the expected {expected} state")]
    StatusConflict { expected: GenerationStatus },
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Fields written alongside a status transition. `route` is applied only on
/// entry to `completed`, `error` only on entry to `failed`.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub progress: Option<u8>,
    pub route: Option<RouteDocument>,
    pub error: Option<GenerationFailure>,
    pub cost_estimate: Option<f64>,
}

impl StatusUpdate {
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn completed(route: RouteDocument, cost_estimate: f64) -> Self {
        Self {
            progress: Some(100),
            route: Some(route),
            cost_estimate: Some(cost_estimate),
            ..Self::default()
        }
    }

    pub fn failed(error: GenerationFailure, cost_estimate: Option<f64>) -> Self {
        Self {
            error: Some(error),
            cost_estimate,
            ..Self::default()
        }
    }

    pub fn cancelled(cost_estimate: Option<f64>) -> Self {
        Self {
            cost_estimate,
            ..Self::default()
        }
    }
}

/// Durable home of generation records, the active-job index and the cost
/// ledger. The compare-and-swap in [`update_status`] is the only way a
/// status ever changes.
///
/// [`update_status`]: GenerationStore::update_status
#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// Idempotency lookup.
    async fn find_by_request_id(
        &self,
        owner: Uuid,
        request_id: Uuid,
    ) -> Result<Option<GenerationRecord>, StoreError>;

    /// The single pending/running record for `(owner, note_id)`, if any.
    async fn find_active(
        &self,
        owner: Uuid,
        note_id: Uuid,
    ) -> Result<Option<GenerationRecord>, StoreError>;

    /// Atomic creation: asserts no active record exists for the note,
    /// rejects duplicate request ids, and allocates the next dense version.
    async fn create(&self, new: NewGeneration) -> Result<GenerationRecord, StoreError>;

    /// Compare-and-swap on `status`; fails with [`StoreError::StatusConflict`]
    /// when the current status is not `from`. Stamps `updated_at`, and
    /// `terminated_at` on entry to a terminal state.
    async fn update_status(
        &self,
        itinerary_id: Uuid,
        from: GenerationStatus,
        to: GenerationStatus,
        update: StatusUpdate,
    ) -> Result<GenerationRecord, StoreError>;

    /// Raise `progress`, never lowering it; a no-op once the record is
    /// terminal or when the reported value is behind the stored one.
    async fn set_progress(&self, itinerary_id: Uuid, progress: u8) -> Result<(), StoreError>;

    /// Idempotent; the flag is never cleared.
    async fn set_cancel_requested(&self, itinerary_id: Uuid)
        -> Result<GenerationRecord, StoreError>;

    async fn get(&self, itinerary_id: Uuid) -> Result<Option<GenerationRecord>, StoreError>;

    /// Past itineraries for a note, newest version first.
    async fn list_for_note(
        &self,
        owner: Uuid,
        note_id: Uuid,
        status: Option<GenerationStatus>,
        limit: i64,
    ) -> Result<Vec<GenerationRecord>, StoreError>;

    /// Append-only.
    async fn record_cost(&self, entry: CostEntry) -> Result<(), StoreError>;

    /// Sum of ledger amounts recorded after `window_start`.
    async fn spend_since(
        &self,
        owner: Uuid,
        window_start: DateTime<Utc>,
    ) -> Result<f64, StoreError>;

    /// Timestamp of the oldest in-window entry, for `retry_after` math.
    async fn oldest_cost_since(
        &self,
        owner: Uuid,
        window_start: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// Read surface the coordinator needs from the note subsystem.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn note(&self, note_id: Uuid) -> Result<Option<RideNote>, StoreError>;

    async fn upsert_note(&self, note: RideNote) -> Result<(), StoreError>;
}

/// Read surface the coordinator needs from the profile subsystem.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn preferences(&self, owner: Uuid) -> Result<Option<RiderPreferences>, StoreError>;

    async fn upsert_preferences(&self, prefs: RiderPreferences) -> Result<(), StoreError>;
}
