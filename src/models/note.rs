use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-note planning overrides. Any field left empty falls back to the
/// rider's profile defaults when the prompt is resolved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceOverrides {
    pub terrain: Option<String>,
    pub road_type: Option<String>,
    pub typical_duration_h: Option<f64>,
    pub typical_distance_km: Option<f64>,
}

/// A free-text ride note, the source material for a generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideNote {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub body: String,
    pub archived: bool,
    #[serde(default)]
    pub overrides: PreferenceOverrides,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
