use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinator::{ExportFormat, ExportOutcome};
use crate::middleware::AuthUser;
use crate::models::{ExtractedSummary, GenerationFailure, GenerationRecord, GenerationStatus};
use crate::AppState;

use super::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateItineraryRequest {
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct ItinerarySnapshot {
    pub itinerary_id: Uuid,
    pub note_id: Uuid,
    pub version: i32,
    pub status: GenerationStatus,
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// `POST /api/notes/{note_id}/itineraries` — accept a generation.
pub async fn create_itinerary(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(note_id): Path<Uuid>,
    Json(payload): Json<CreateItineraryRequest>,
) -> Result<(StatusCode, Json<ItinerarySnapshot>), ApiError> {
    let request_id = Uuid::parse_str(&payload.request_id)
        .map_err(|_| ApiError::validation("request_id", "request_id must be a UUID"))?;

    let record = state
        .coordinator
        .generate(auth_user.id, note_id, request_id)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ItinerarySnapshot {
            itinerary_id: record.itinerary_id,
            note_id: record.note_id,
            version: record.version,
            status: record.status,
            request_id: record.request_id,
            created_at: record.created_at,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub itinerary_id: Uuid,
    pub status: GenerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_geojson: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<GenerationFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// The snapshot shape varies by status: progress while active, the route on
/// completion, the structured error on failure.
fn status_response(record: GenerationRecord) -> StatusResponse {
    let mut response = StatusResponse {
        itinerary_id: record.itinerary_id,
        status: record.status,
        progress: None,
        route_geojson: None,
        error: None,
        cancelled_at: None,
    };
    match record.status {
        GenerationStatus::Pending | GenerationStatus::Running => {
            response.progress = Some(record.progress.unwrap_or(0));
        }
        GenerationStatus::Completed => {
            response.route_geojson = record.route.as_ref().map(|r| r.to_json_value());
        }
        GenerationStatus::Failed => {
            response.error = record.error;
        }
        GenerationStatus::Cancelled => {
            response.cancelled_at = record.terminated_at;
        }
    }
    response
}

/// `GET /api/itineraries/{itinerary_id}/status`
pub async fn get_status(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(itinerary_id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    let record = state
        .coordinator
        .poll_status(itinerary_id, auth_user.id)
        .await?;
    Ok(Json(status_response(record)))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub itinerary_id: Uuid,
    pub status: GenerationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// `POST /api/itineraries/{itinerary_id}/cancel`
pub async fn cancel_itinerary(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(itinerary_id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    let record = state.coordinator.cancel(itinerary_id, auth_user.id).await?;
    Ok(Json(CancelResponse {
        itinerary_id: record.itinerary_id,
        status: record.status,
        cancelled_at: record.terminated_at.filter(|_| {
            record.status == GenerationStatus::Cancelled
        }),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub format: Option<String>,
    pub acknowledged: Option<String>,
}

/// Only the literal string "true" counts as acknowledged; the coordinator
/// turns anything else into a `validation_failed` on the field.
fn acknowledged(raw: &Option<String>) -> bool {
    raw.as_deref() == Some("true")
}

/// `GET /api/itineraries/{itinerary_id}/download?format=gpx|geojson&acknowledged=true`
pub async fn download_itinerary(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(itinerary_id): Path<Uuid>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let format = query
        .format
        .as_deref()
        .and_then(ExportFormat::parse)
        .filter(|f| matches!(f, ExportFormat::Gpx | ExportFormat::Geojson))
        .ok_or_else(|| ApiError::validation("format", "format must be gpx or geojson"))?;

    let outcome = state
        .coordinator
        .export(itinerary_id, auth_user.id, format, acknowledged(&query.acknowledged))
        .await?;

    match outcome {
        ExportOutcome::File {
            bytes,
            content_type,
            filename,
        } => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            )
            .body(Body::from(bytes))
            .map_err(|e| {
                tracing::error!("failed to build download response: {}", e);
                ApiError::internal("could not produce the download")
            }),
        ExportOutcome::Link { .. } => Err(ApiError::internal("unexpected export outcome")),
    }
}

#[derive(Debug, Deserialize)]
pub struct LinkQuery {
    pub acknowledged: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub url: String,
}

async fn deep_link(
    state: AppState,
    auth_user: AuthUser,
    itinerary_id: Uuid,
    query: LinkQuery,
    format: ExportFormat,
) -> Result<Json<LinkResponse>, ApiError> {
    let outcome = state
        .coordinator
        .export(itinerary_id, auth_user.id, format, acknowledged(&query.acknowledged))
        .await?;
    match outcome {
        ExportOutcome::Link { url } => Ok(Json(LinkResponse { url })),
        ExportOutcome::File { .. } => Err(ApiError::internal("unexpected export outcome")),
    }
}

/// `GET /api/itineraries/{itinerary_id}/mapy?acknowledged=true`
pub async fn mapy_link(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(itinerary_id): Path<Uuid>,
    Query(query): Query<LinkQuery>,
) -> Result<Json<LinkResponse>, ApiError> {
    deep_link(state, auth_user, itinerary_id, query, ExportFormat::Mapy).await
}

/// `GET /api/itineraries/{itinerary_id}/google?acknowledged=true`
pub async fn google_link(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(itinerary_id): Path<Uuid>,
    Query(query): Query<LinkQuery>,
) -> Result<Json<LinkResponse>, ApiError> {
    deep_link(state, auth_user, itinerary_id, query, ExportFormat::Google).await
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListedItinerary {
    pub itinerary_id: Uuid,
    pub note_id: Uuid,
    pub version: i32,
    pub status: GenerationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Derived from the route on the fly; nothing is persisted twice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ExtractedSummary>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub data: Vec<ListedItinerary>,
}

/// `GET /api/notes/{note_id}/itineraries?status=completed&limit=N`
pub async fn list_itineraries(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(note_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|raw| {
            GenerationStatus::parse(raw)
                .ok_or_else(|| ApiError::validation("status", "unknown status"))
        })
        .transpose()?;

    let limit = match query.limit.as_deref() {
        None => 20,
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|n| (1..=100).contains(n))
            .ok_or_else(|| {
                ApiError::validation("limit", "limit must be an integer between 1 and 100")
            })?,
    };

    let records = state
        .coordinator
        .list_itineraries(auth_user.id, note_id, status, limit)
        .await?;

    Ok(Json(ListResponse {
        data: records
            .into_iter()
            .map(|r| ListedItinerary {
                itinerary_id: r.itinerary_id,
                note_id: r.note_id,
                version: r.version,
                status: r.status,
                created_at: r.created_at,
                updated_at: r.updated_at,
                summary: r.route.as_ref().map(ExtractedSummary::from),
            })
            .collect(),
    }))
}
