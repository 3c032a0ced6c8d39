pub mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Duration as ChronoDuration, Utc};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ai::RouteModel;
use crate::config::GenerationSettings;
use crate::export::{self, ExportError, RenderHints};
use crate::models::{GenerationRecord, GenerationStatus, NewGeneration};
use crate::store::{GenerationStore, NoteStore, PreferenceStore, StoreError};

/// Structured outcome of a coordinator operation that went wrong. The HTTP
/// surface maps each variant to a status code and the error envelope.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("{message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("you do not have access to this itinerary")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    #[error("fill in terrain, road type, duration and distance in your riding profile first")]
    ProfileIncomplete,
    #[error("unarchive the note before generating an itinerary")]
    NoteArchived,
    #[error("a generation is already in progress for this note")]
    GenerationInProgress { itinerary_id: Uuid },
    #[error("this generation has already finished")]
    CannotCancel,
    #[error("the generation budget for this period is used up")]
    ServiceLimitReached { retry_after: u64 },
    #[error("the itinerary is not completed")]
    Incomplete,
    #[error("the route does not fit this map service")]
    TooManyPoints { count: usize, limit: usize },
    #[error("internal error")]
    Internal(anyhow::Error),
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            other => Self::Internal(other.into()),
        }
    }
}

/// Requested download/deep-link flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Gpx,
    Geojson,
    Mapy,
    Google,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gpx" => Some(Self::Gpx),
            "geojson" => Some(Self::Geojson),
            "mapy" => Some(Self::Mapy),
            "google" => Some(Self::Google),
            _ => None,
        }
    }
}

/// What an export produced: a downloadable body or a deep link.
#[derive(Debug)]
pub enum ExportOutcome {
    File {
        bytes: Vec<u8>,
        content_type: &'static str,
        filename: String,
    },
    Link { url: String },
}

/// The state-machine engine behind the generation endpoints. It is the only
/// component that transitions `GenerationRecord.status`, always through the
/// store's compare-and-swap.
pub struct Coordinator {
    store: Arc<dyn GenerationStore>,
    notes: Arc<dyn NoteStore>,
    preferences: Arc<dyn PreferenceStore>,
    model: Arc<dyn RouteModel>,
    settings: GenerationSettings,
    worker_slots: Arc<Semaphore>,
    active_jobs: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn GenerationStore>,
        notes: Arc<dyn NoteStore>,
        preferences: Arc<dyn PreferenceStore>,
        model: Arc<dyn RouteModel>,
        settings: GenerationSettings,
    ) -> Self {
        let worker_slots = Arc::new(Semaphore::new(settings.worker_concurrency.max(1)));
        Self {
            store,
            notes,
            preferences,
            model,
            settings,
            worker_slots,
            active_jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Accept a generation request. Preconditions run in order and the
    /// first failure wins; on success the record is created in `pending`
    /// and a worker task is spawned. Never blocks on the worker bound.
    pub async fn generate(
        &self,
        owner: Uuid,
        note_id: Uuid,
        request_id: Uuid,
    ) -> Result<GenerationRecord, CoordinatorError> {
        // Idempotency: a replayed request returns the prior record as-is.
        if let Some(existing) = self.store.find_by_request_id(owner, request_id).await? {
            tracing::debug!(%request_id, itinerary_id = %existing.itinerary_id, "replayed request");
            return Ok(existing);
        }

        let profile = self
            .preferences
            .preferences(owner)
            .await?
            .filter(|p| p.is_complete())
            .ok_or(CoordinatorError::ProfileIncomplete)?;

        let note = self
            .notes
            .note(note_id)
            .await?
            .filter(|n| n.owner_id == owner)
            .ok_or(CoordinatorError::NotFound)?;
        if note.archived {
            return Err(CoordinatorError::NoteArchived);
        }

        if let Some(active) = self.store.find_active(owner, note_id).await? {
            return Err(CoordinatorError::GenerationInProgress {
                itinerary_id: active.itinerary_id,
            });
        }

        self.check_spend_cap(owner).await?;

        let record = match self
            .store
            .create(NewGeneration {
                itinerary_id: Uuid::new_v4(),
                note_id,
                owner_id: owner,
                request_id,
            })
            .await
        {
            Ok(record) => record,
            // Lost a race with a concurrent submitter.
            Err(StoreError::ActiveJobExists { itinerary_id }) => {
                return Err(CoordinatorError::GenerationInProgress { itinerary_id })
            }
            Err(StoreError::DuplicateRequest { itinerary_id }) => {
                return self
                    .store
                    .get(itinerary_id)
                    .await?
                    .ok_or(CoordinatorError::NotFound)
            }
            Err(other) => return Err(other.into()),
        };

        tracing::info!(
            itinerary_id = %record.itinerary_id,
            %note_id,
            version = record.version,
            "generation accepted"
        );

        let cancel = CancellationToken::new();
        self.active_jobs
            .lock()
            .unwrap()
            .insert(record.itinerary_id, cancel.clone());

        tokio::spawn(worker::run(worker::JobContext {
            store: Arc::clone(&self.store),
            model: Arc::clone(&self.model),
            settings: self.settings.clone(),
            worker_slots: Arc::clone(&self.worker_slots),
            active_jobs: Arc::clone(&self.active_jobs),
            record: record.clone(),
            note,
            profile,
            cancel,
        }));

        Ok(record)
    }

    async fn check_spend_cap(&self, owner: Uuid) -> Result<(), CoordinatorError> {
        let window = ChronoDuration::from_std(self.settings.spend_window)
            .map_err(|e| CoordinatorError::Internal(e.into()))?;
        let window_start = Utc::now() - window;

        let spend = self.store.spend_since(owner, window_start).await?;
        if spend + self.settings.cost_per_call_estimate <= self.settings.spend_cap {
            return Ok(());
        }

        // Retryable once the oldest in-window entry rolls out of the window.
        let retry_after = match self.store.oldest_cost_since(owner, window_start).await? {
            Some(oldest) => (oldest + window - Utc::now()).num_seconds().max(1) as u64,
            None => self.settings.spend_window.as_secs(),
        };
        tracing::warn!(%owner, spend, "spend cap reached");
        Err(CoordinatorError::ServiceLimitReached { retry_after })
    }

    /// Read-only snapshot for the polling client.
    pub async fn poll_status(
        &self,
        itinerary_id: Uuid,
        viewer: Uuid,
    ) -> Result<GenerationRecord, CoordinatorError> {
        let record = self
            .store
            .get(itinerary_id)
            .await?
            .ok_or(CoordinatorError::NotFound)?;
        if record.owner_id != viewer {
            return Err(CoordinatorError::Unauthorized);
        }
        Ok(record)
    }

    /// Request cancellation. Sets the flag, fires the job's token and
    /// returns the current snapshot; observing the flag is the worker's
    /// business and this call never waits for it.
    pub async fn cancel(
        &self,
        itinerary_id: Uuid,
        viewer: Uuid,
    ) -> Result<GenerationRecord, CoordinatorError> {
        let record = self
            .store
            .get(itinerary_id)
            .await?
            .ok_or(CoordinatorError::NotFound)?;
        if record.owner_id != viewer {
            return Err(CoordinatorError::Unauthorized);
        }
        if record.status.is_terminal() {
            return Err(CoordinatorError::CannotCancel);
        }

        let record = self.store.set_cancel_requested(itinerary_id).await?;
        if let Some(token) = self.active_jobs.lock().unwrap().get(&itinerary_id) {
            token.cancel();
        }
        tracing::info!(%itinerary_id, "cancellation requested");
        Ok(record)
    }

    /// Derive a wire artifact from a completed record.
    pub async fn export(
        &self,
        itinerary_id: Uuid,
        viewer: Uuid,
        format: ExportFormat,
        acknowledged: bool,
    ) -> Result<ExportOutcome, CoordinatorError> {
        let record = self
            .store
            .get(itinerary_id)
            .await?
            .ok_or(CoordinatorError::NotFound)?;
        if record.owner_id != viewer {
            return Err(CoordinatorError::Unauthorized);
        }
        let route = match (&record.status, &record.route) {
            (GenerationStatus::Completed, Some(route)) => route,
            _ => return Err(CoordinatorError::Incomplete),
        };
        if !acknowledged {
            return Err(CoordinatorError::Validation {
                field: "acknowledged",
                message: "confirm the route disclaimer before exporting".into(),
            });
        }

        let hints = RenderHints {
            coord_decimals: self.settings.coord_decimals,
            simplify_tolerance_deg: None,
        };

        let outcome = match format {
            ExportFormat::Gpx => ExportOutcome::File {
                bytes: export::gpx_bytes(route, &hints).map_err(map_export_error)?,
                content_type: "application/gpx+xml; charset=utf-8",
                filename: format!("{}.gpx", sanitize_filename(&route.properties.title)),
            },
            ExportFormat::Geojson => ExportOutcome::File {
                bytes: export::geojson_string(route).into_bytes(),
                content_type: "application/geo+json; charset=utf-8",
                filename: format!("{}.geojson", sanitize_filename(&route.properties.title)),
            },
            ExportFormat::Mapy => ExportOutcome::Link {
                url: export::mapy_url(route, self.settings.mapy_point_limit)
                    .map_err(map_export_error)?,
            },
            ExportFormat::Google => ExportOutcome::Link {
                url: export::google_url(route, self.settings.google_point_limit)
                    .map_err(map_export_error)?,
            },
        };
        Ok(outcome)
    }

    /// Past itineraries for a note, newest first.
    pub async fn list_itineraries(
        &self,
        owner: Uuid,
        note_id: Uuid,
        status: Option<GenerationStatus>,
        limit: i64,
    ) -> Result<Vec<GenerationRecord>, CoordinatorError> {
        Ok(self
            .store
            .list_for_note(owner, note_id, status, limit)
            .await?)
    }

}

fn map_export_error(err: ExportError) -> CoordinatorError {
    match err {
        ExportError::TooManyPoints { count, limit } => {
            CoordinatorError::TooManyPoints { count, limit }
        }
        other => CoordinatorError::Internal(other.into()),
    }
}

/// Attachment filename from a route title: ASCII word characters, dots and
/// dashes survive, runs of anything else collapse to one underscore.
pub fn sanitize_filename(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_was_filler = true;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
            out.push(ch);
            last_was_filler = false;
        } else if !last_was_filler {
            out.push('_');
            last_was_filler = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "itinerary".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_keep_word_characters() {
        assert_eq!(sanitize_filename("Alpine loop 2026"), "Alpine_loop_2026");
        assert_eq!(sanitize_filename("Côte d'Azur!"), "C_te_d_Azur");
        assert_eq!(sanitize_filename("   "), "itinerary");
        assert_eq!(sanitize_filename("v1.2-final"), "v1.2-final");
    }

    #[test]
    fn export_format_parses_known_values_only() {
        assert_eq!(ExportFormat::parse("gpx"), Some(ExportFormat::Gpx));
        assert_eq!(ExportFormat::parse("geojson"), Some(ExportFormat::Geojson));
        assert_eq!(ExportFormat::parse("mapy"), Some(ExportFormat::Mapy));
        assert_eq!(ExportFormat::parse("google"), Some(ExportFormat::Google));
        assert_eq!(ExportFormat::parse("kml"), None);
    }
}
