use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    CostEntry, FailureKind, GenerationFailure, GenerationRecord, GenerationStatus, NewGeneration,
    PreferenceOverrides, RideNote, RiderPreferences, RouteDocument,
};

use super::{GenerationStore, NoteStore, PreferenceStore, StatusUpdate, StoreError};

const RECORD_COLUMNS: &str = "itinerary_id, note_id, owner_id, version, status, progress, \
     request_id, created_at, updated_at, terminated_at, route, error_kind, error_message, \
     cancel_requested, cost_estimate";

/// Postgres backend. The partial unique index on active records is what
/// makes the single-active-job invariant hold under concurrent inserts; the
/// conditional UPDATE in `update_status` is the CAS.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn record_from_row(row: &PgRow) -> Result<GenerationRecord, StoreError> {
    let status_raw: String = row.try_get("status")?;
    let status = GenerationStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown status {status_raw}")))?;

    let route = row
        .try_get::<Option<serde_json::Value>, _>("route")?
        .map(|value| RouteDocument::from_json_value(&value))
        .transpose()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    let error_kind: Option<String> = row.try_get("error_kind")?;
    let error = match error_kind {
        Some(kind_raw) => {
            let kind = FailureKind::parse(&kind_raw)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown failure kind {kind_raw}")))?;
            Some(GenerationFailure {
                kind,
                message: row
                    .try_get::<Option<String>, _>("error_message")?
                    .unwrap_or_default(),
            })
        }
        None => None,
    };

    Ok(GenerationRecord {
        itinerary_id: row.try_get("itinerary_id")?,
        note_id: row.try_get("note_id")?,
        owner_id: row.try_get("owner_id")?,
        version: row.try_get("version")?,
        status,
        progress: row
            .try_get::<Option<i32>, _>("progress")?
            .map(|p| p.clamp(0, 100) as u8),
        request_id: row.try_get("request_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        terminated_at: row.try_get("terminated_at")?,
        route,
        error,
        cancel_requested: row.try_get("cancel_requested")?,
        cost_estimate: row.try_get("cost_estimate")?,
    })
}

#[async_trait]
impl GenerationStore for PgStore {
    async fn find_by_request_id(
        &self,
        owner: Uuid,
        request_id: Uuid,
    ) -> Result<Option<GenerationRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM generation_records WHERE owner_id = $1 AND request_id = $2"
        ))
        .bind(owner)
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_active(
        &self,
        owner: Uuid,
        note_id: Uuid,
    ) -> Result<Option<GenerationRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM generation_records \
             WHERE owner_id = $1 AND note_id = $2 AND status IN ('pending', 'running')"
        ))
        .bind(owner)
        .bind(note_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn create(&self, new: NewGeneration) -> Result<GenerationRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = sqlx::query_scalar::<_, Uuid>(
            "SELECT itinerary_id FROM generation_records WHERE owner_id = $1 AND request_id = $2",
        )
        .bind(new.owner_id)
        .bind(new.request_id)
        .fetch_optional(&mut *tx)
        .await?
        {
            return Err(StoreError::DuplicateRequest {
                itinerary_id: existing,
            });
        }

        // Version allocation and the active-job assertion happen inside one
        // transaction; the partial unique index backstops concurrent racers.
        let insert = sqlx::query(&format!(
            "INSERT INTO generation_records \
                 (itinerary_id, note_id, owner_id, version, status, request_id, \
                  created_at, updated_at, cancel_requested) \
             VALUES ($1, $2, $3, \
                 (SELECT COALESCE(MAX(version), 0) + 1 FROM generation_records \
                  WHERE owner_id = $3 AND note_id = $2), \
                 'pending', $4, now(), now(), false) \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(new.itinerary_id)
        .bind(new.note_id)
        .bind(new.owner_id)
        .bind(new.request_id)
        .fetch_one(&mut *tx)
        .await;

        let row = match insert {
            Ok(row) => row,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await.ok();
                if let Some(active) = self.find_active(new.owner_id, new.note_id).await? {
                    return Err(StoreError::ActiveJobExists {
                        itinerary_id: active.itinerary_id,
                    });
                }
                if let Some(existing) =
                    self.find_by_request_id(new.owner_id, new.request_id).await?
                {
                    return Err(StoreError::DuplicateRequest {
                        itinerary_id: existing.itinerary_id,
                    });
                }
                return Err(StoreError::Corrupt(
                    "unique violation without a matching record".into(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let record = record_from_row(&row)?;
        tx.commit().await?;
        Ok(record)
    }

    async fn update_status(
        &self,
        itinerary_id: Uuid,
        from: GenerationStatus,
        to: GenerationStatus,
        update: StatusUpdate,
    ) -> Result<GenerationRecord, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::StatusConflict { expected: from });
        }

        let route_json = match (&update.route, to) {
            (Some(route), GenerationStatus::Completed) => Some(route.to_json_value()),
            _ => None,
        };
        let (error_kind, error_message) = match (&update.error, to) {
            (Some(err), GenerationStatus::Failed) => {
                (Some(err.kind.as_str()), Some(err.message.clone()))
            }
            _ => (None, None),
        };

        let row = sqlx::query(&format!(
            "UPDATE generation_records SET \
                 status = $3, \
                 updated_at = now(), \
                 terminated_at = CASE WHEN $4 THEN now() ELSE terminated_at END, \
                 progress = CASE WHEN $5::int IS NULL THEN progress \
                                 ELSE GREATEST(COALESCE(progress, 0), LEAST($5::int, 100)) END, \
                 route = COALESCE($6, route), \
                 error_kind = COALESCE($7, error_kind), \
                 error_message = COALESCE($8, error_message), \
                 cost_estimate = COALESCE($9, cost_estimate) \
             WHERE itinerary_id = $1 AND status = $2 \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(itinerary_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(to.is_terminal())
        .bind(update.progress.map(i32::from))
        .bind(route_json)
        .bind(error_kind)
        .bind(error_message)
        .bind(update.cost_estimate)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => record_from_row(&row),
            None => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM generation_records WHERE itinerary_id = $1)",
                )
                .bind(itinerary_id)
                .fetch_one(&self.pool)
                .await?;
                if exists {
                    Err(StoreError::StatusConflict { expected: from })
                } else {
                    Err(StoreError::NotFound)
                }
            }
        }
    }

    async fn set_progress(&self, itinerary_id: Uuid, progress: u8) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE generation_records SET \
                 progress = LEAST($2::int, 100), updated_at = now() \
             WHERE itinerary_id = $1 AND status IN ('pending', 'running') \
               AND COALESCE(progress, 0) < $2::int",
        )
        .bind(itinerary_id)
        .bind(i32::from(progress))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_cancel_requested(
        &self,
        itinerary_id: Uuid,
    ) -> Result<GenerationRecord, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE generation_records SET \
                 updated_at = CASE WHEN cancel_requested THEN updated_at ELSE now() END, \
                 cancel_requested = true \
             WHERE itinerary_id = $1 \
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(itinerary_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;

        record_from_row(&row)
    }

    async fn get(&self, itinerary_id: Uuid) -> Result<Option<GenerationRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM generation_records WHERE itinerary_id = $1"
        ))
        .bind(itinerary_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_for_note(
        &self,
        owner: Uuid,
        note_id: Uuid,
        status: Option<GenerationStatus>,
        limit: i64,
    ) -> Result<Vec<GenerationRecord>, StoreError> {
        let mut sql = format!(
            "SELECT {RECORD_COLUMNS} FROM generation_records \
             WHERE owner_id = $1 AND note_id = $2"
        );
        if status.is_some() {
            sql.push_str(" AND status = $4");
        }
        sql.push_str(" ORDER BY version DESC LIMIT $3");

        let mut query = sqlx::query(&sql).bind(owner).bind(note_id).bind(limit);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn record_cost(&self, entry: CostEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO cost_ledger (owner_id, itinerary_id, amount, recorded_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.owner_id)
        .bind(entry.itinerary_id)
        .bind(entry.amount)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn spend_since(
        &self,
        owner: Uuid,
        window_start: DateTime<Utc>,
    ) -> Result<f64, StoreError> {
        let sum = sqlx::query_scalar::<_, f64>(
            "SELECT COALESCE(SUM(amount), 0) FROM cost_ledger \
             WHERE owner_id = $1 AND recorded_at > $2",
        )
        .bind(owner)
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    async fn oldest_cost_since(
        &self,
        owner: Uuid,
        window_start: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let oldest = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MIN(recorded_at) FROM cost_ledger \
             WHERE owner_id = $1 AND recorded_at > $2",
        )
        .bind(owner)
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;
        Ok(oldest)
    }
}

#[async_trait]
impl NoteStore for PgStore {
    async fn note(&self, note_id: Uuid) -> Result<Option<RideNote>, StoreError> {
        let row = sqlx::query(
            "SELECT id, owner_id, title, body, archived, terrain, road_type, \
                    typical_duration_h, typical_distance_km, created_at, updated_at \
             FROM ride_notes WHERE id = $1",
        )
        .bind(note_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(RideNote {
                id: row.try_get("id")?,
                owner_id: row.try_get("owner_id")?,
                title: row.try_get("title")?,
                body: row.try_get("body")?,
                archived: row.try_get("archived")?,
                overrides: PreferenceOverrides {
                    terrain: row.try_get("terrain")?,
                    road_type: row.try_get("road_type")?,
                    typical_duration_h: row.try_get("typical_duration_h")?,
                    typical_distance_km: row.try_get("typical_distance_km")?,
                },
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn upsert_note(&self, note: RideNote) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO ride_notes \
                 (id, owner_id, title, body, archived, terrain, road_type, \
                  typical_duration_h, typical_distance_km, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO UPDATE SET \
                 title = EXCLUDED.title, body = EXCLUDED.body, \
                 archived = EXCLUDED.archived, terrain = EXCLUDED.terrain, \
                 road_type = EXCLUDED.road_type, \
                 typical_duration_h = EXCLUDED.typical_duration_h, \
                 typical_distance_km = EXCLUDED.typical_distance_km, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(note.id)
        .bind(note.owner_id)
        .bind(note.title)
        .bind(note.body)
        .bind(note.archived)
        .bind(note.overrides.terrain)
        .bind(note.overrides.road_type)
        .bind(note.overrides.typical_duration_h)
        .bind(note.overrides.typical_distance_km)
        .bind(note.created_at)
        .bind(note.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for PgStore {
    async fn preferences(&self, owner: Uuid) -> Result<Option<RiderPreferences>, StoreError> {
        let row = sqlx::query(
            "SELECT owner_id, terrain, road_type, typical_duration_h, \
                    typical_distance_km, updated_at \
             FROM rider_preferences WHERE owner_id = $1",
        )
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(RiderPreferences {
                owner_id: row.try_get("owner_id")?,
                terrain: row.try_get("terrain")?,
                road_type: row.try_get("road_type")?,
                typical_duration_h: row.try_get("typical_duration_h")?,
                typical_distance_km: row.try_get("typical_distance_km")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn upsert_preferences(&self, prefs: RiderPreferences) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO rider_preferences \
                 (owner_id, terrain, road_type, typical_duration_h, typical_distance_km, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (owner_id) DO UPDATE SET \
                 terrain = EXCLUDED.terrain, road_type = EXCLUDED.road_type, \
                 typical_duration_h = EXCLUDED.typical_duration_h, \
                 typical_distance_km = EXCLUDED.typical_distance_km, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(prefs.owner_id)
        .bind(prefs.terrain)
        .bind(prefs.road_type)
        .bind(prefs.typical_duration_h)
        .bind(prefs.typical_distance_km)
        .bind(prefs.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
