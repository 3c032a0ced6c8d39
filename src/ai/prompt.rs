use crate::models::{RideNote, RiderPreferences};

/// Built-in fallbacks for riders who never touched their profile overrides.
const DEFAULT_TERRAIN: &str = "mixed tarmac";
const DEFAULT_ROAD_TYPE: &str = "scenic secondary roads";
const DEFAULT_DURATION_H: f64 = 6.0;
const DEFAULT_DISTANCE_KM: f64 = 300.0;

/// Planning preferences after the override chain has been applied:
/// per-note overrides, then profile defaults, then built-ins.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPreferences {
    pub terrain: String,
    pub road_type: String,
    pub typical_duration_h: f64,
    pub typical_distance_km: f64,
}

impl ResolvedPreferences {
    pub fn resolve(note: &RideNote, profile: &RiderPreferences) -> Self {
        Self {
            terrain: note
                .overrides
                .terrain
                .clone()
                .or_else(|| profile.terrain.clone())
                .unwrap_or_else(|| DEFAULT_TERRAIN.to_string()),
            road_type: note
                .overrides
                .road_type
                .clone()
                .or_else(|| profile.road_type.clone())
                .unwrap_or_else(|| DEFAULT_ROAD_TYPE.to_string()),
            typical_duration_h: note
                .overrides
                .typical_duration_h
                .or(profile.typical_duration_h)
                .unwrap_or(DEFAULT_DURATION_H),
            typical_distance_km: note
                .overrides
                .typical_distance_km
                .or(profile.typical_distance_km)
                .unwrap_or(DEFAULT_DISTANCE_KM),
        }
    }
}

/// Render the user turn sent to the model: the rider's note plus the
/// resolved planning envelope and the output contract.
pub fn build_prompt(note: &RideNote, prefs: &ResolvedPreferences) -> String {
    format!(
        "Plan a motorcycle itinerary from the rider's notes below.\n\
         \n\
         Rider notes ({title}):\n\
         {body}\n\
         \n\
         Planning envelope:\n\
         - preferred terrain: {terrain}\n\
         - preferred roads: {road_type}\n\
         - typical riding time per day: {duration:.1} h\n\
         - typical distance per day: {distance:.0} km\n\
         \n\
         Respond with a single GeoJSON FeatureCollection and nothing else.\n\
         The collection carries a top-level \"properties\" object with\n\
         \"title\", \"total_distance_km\", \"total_duration_h\", \"highlights\"\n\
         (array of strings) and \"days\". Each riding leg is a LineString\n\
         feature with properties \"name\", \"description\", \"day\" (from 1),\n\
         \"segment\" (from 1, per day), \"distance_km\" and \"duration_h\";\n\
         coordinates are [longitude, latitude] in WGS84 and consecutive\n\
         segments of a day share their boundary coordinate. Points of\n\
         interest are Point features with \"name\", \"description\", \"day\"\n\
         and \"kind\". Order features by day, then segment.",
        title = note.title,
        body = note.body,
        terrain = prefs.terrain,
        road_type = prefs.road_type,
        duration = prefs.typical_duration_h,
        distance = prefs.typical_distance_km,
    )
}
