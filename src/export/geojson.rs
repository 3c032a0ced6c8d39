use crate::models::RouteDocument;

/// GeoJSON download body: the FeatureCollection wire form, compact.
///
/// Feature order matches the in-memory document and floats use serde_json's
/// shortest round-trip formatting, so parsing the output back yields an
/// equal document.
pub fn geojson_string(doc: &RouteDocument) -> String {
    serde_json::to_string(&doc.to_feature_collection()).unwrap_or_else(|_| "null".to_string())
}
