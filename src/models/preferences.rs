use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A rider's planning profile. Generation requires all four planning fields
/// to be filled in; partial profiles are rejected up front so the model is
/// never prompted with guesswork.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiderPreferences {
    pub owner_id: Uuid,
    pub terrain: Option<String>,
    pub road_type: Option<String>,
    pub typical_duration_h: Option<f64>,
    pub typical_distance_km: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl RiderPreferences {
    pub fn is_complete(&self) -> bool {
        self.terrain.is_some()
            && self.road_type.is_some()
            && self.typical_duration_h.is_some()
            && self.typical_distance_km.is_some()
    }
}
