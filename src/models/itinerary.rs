use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::route_document::RouteDocument;

/// Lifecycle state of a generation job.
///
/// Legal transitions: pending → running → {completed, failed, cancelled}
/// and pending → cancelled. Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl GenerationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether `self → to` is a legal lifecycle edge.
    pub fn can_transition_to(self, to: GenerationStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a generation ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ModelError,
    Network,
    RateLimited,
    InvalidRoute,
}

impl FailureKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "timeout" => Some(Self::Timeout),
            "model_error" => Some(Self::ModelError),
            "network" => Some(Self::Network),
            "rate_limited" => Some(Self::RateLimited),
            "invalid_route" => Some(Self::InvalidRoute),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ModelError => "model_error",
            Self::Network => "network",
            Self::RateLimited => "rate_limited",
            Self::InvalidRoute => "invalid_route",
        }
    }
}

/// Structured error captured into a failed record. The message is already
/// sanitized; raw provider text never lands here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// One generation job, from submission to its terminal state.
#[derive(Debug, Clone)]
pub struct GenerationRecord {
    pub itinerary_id: Uuid,
    pub note_id: Uuid,
    pub owner_id: Uuid,
    pub version: i32,
    pub status: GenerationStatus,
    pub progress: Option<u8>,
    pub request_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub route: Option<RouteDocument>,
    pub error: Option<GenerationFailure>,
    pub cancel_requested: bool,
    pub cost_estimate: Option<f64>,
}

/// Creation payload; the store assigns version and timestamps.
#[derive(Debug, Clone)]
pub struct NewGeneration {
    pub itinerary_id: Uuid,
    pub note_id: Uuid,
    pub owner_id: Uuid,
    pub request_id: Uuid,
}

/// Append-only spend record; the rolling-window sum feeds the cap check.
#[derive(Debug, Clone)]
pub struct CostEntry {
    pub owner_id: Uuid,
    pub itinerary_id: Uuid,
    pub amount: f64,
    pub recorded_at: DateTime<Utc>,
}
