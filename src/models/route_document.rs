use geo::HaversineLength;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue};
use thiserror::Error;

/// A WGS84 coordinate. Longitude first, matching GeoJSON positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
}

impl Coordinate {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }

    pub fn in_range(&self) -> bool {
        (-180.0..=180.0).contains(&self.lon) && (-90.0..=90.0).contains(&self.lat)
    }
}

/// Aggregate itinerary properties carried at the top of the feature collection.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteProperties {
    pub title: String,
    pub total_distance_km: f64,
    pub total_duration_h: f64,
    pub highlights: Vec<String>,
    pub days: u32,
}

/// One rideable leg: an ordered LineString within a day.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSegment {
    pub coordinates: Vec<Coordinate>,
    pub name: String,
    pub description: String,
    pub day: u32,
    pub segment: u32,
    pub distance_km: f64,
    pub duration_h: f64,
}

/// An annotation point (viewpoint, fuel stop, lunch...). Never part of the track.
#[derive(Debug, Clone, PartialEq)]
pub struct PointOfInterest {
    pub coordinate: Coordinate,
    pub name: String,
    pub description: String,
    pub day: u32,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteFeature {
    Segment(RouteSegment),
    Poi(PointOfInterest),
}

/// Canonical in-memory representation of a completed itinerary.
///
/// All export formats (GPX, GeoJSON, quick-preview URLs) derive from this;
/// the wire form is a GeoJSON FeatureCollection with the aggregate
/// properties as a top-level `properties` member.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDocument {
    pub properties: RouteProperties,
    pub features: Vec<RouteFeature>,
}

#[derive(Debug, Error, PartialEq)]
pub enum RouteValidationError {
    #[error("route has no features")]
    Empty,
    #[error("route has no line segments")]
    NoSegments,
    #[error("feature {index}: coordinate is not a finite number")]
    NonFiniteCoordinate { index: usize },
    #[error("feature {index}: coordinate outside WGS84 bounds")]
    CoordinateOutOfRange { index: usize },
    #[error("feature {index}: segment has fewer than 2 coordinates")]
    TooFewCoordinates { index: usize },
    #[error("feature {index}: day and segment numbers start at 1")]
    BadOrdinal { index: usize },
    #[error("feature {index}: distance and duration must be positive")]
    NonPositiveMetric { index: usize },
    #[error("total distance and duration must be positive")]
    NonPositiveTotals,
    #[error("route must span at least one day")]
    NoDays,
    #[error("feature {index}: segments are not ordered by (day, segment)")]
    OutOfOrder { index: usize },
    #[error("feature {index}: segment does not touch the previous segment of the same day")]
    SegmentGap { index: usize },
    #[error("malformed route geometry: {0}")]
    Malformed(String),
}

impl RouteDocument {
    /// Segments only, in document order.
    pub fn segments(&self) -> impl Iterator<Item = &RouteSegment> {
        self.features.iter().filter_map(|f| match f {
            RouteFeature::Segment(s) => Some(s),
            RouteFeature::Poi(_) => None,
        })
    }

    /// Points of interest only, in document order.
    pub fn pois(&self) -> impl Iterator<Item = &PointOfInterest> {
        self.features.iter().filter_map(|f| match f {
            RouteFeature::Poi(p) => Some(p),
            RouteFeature::Segment(_) => None,
        })
    }

    /// Validate a document arriving from the model before it may be stored.
    ///
    /// Rejects non-finite or out-of-range coordinates, degenerate segments,
    /// non-positive metrics, misordered features and same-day gaps.
    pub fn validate(&self) -> Result<(), RouteValidationError> {
        if self.features.is_empty() {
            return Err(RouteValidationError::Empty);
        }
        if self.properties.days < 1 {
            return Err(RouteValidationError::NoDays);
        }
        if self.properties.total_distance_km <= 0.0 || self.properties.total_duration_h <= 0.0 {
            return Err(RouteValidationError::NonPositiveTotals);
        }

        let mut prev: Option<&RouteSegment> = None;
        let mut seen_segment = false;

        for (index, feature) in self.features.iter().enumerate() {
            match feature {
                RouteFeature::Segment(seg) => {
                    seen_segment = true;
                    if seg.day < 1 || seg.segment < 1 {
                        return Err(RouteValidationError::BadOrdinal { index });
                    }
                    if seg.coordinates.len() < 2 {
                        return Err(RouteValidationError::TooFewCoordinates { index });
                    }
                    for c in &seg.coordinates {
                        if !c.is_finite() {
                            return Err(RouteValidationError::NonFiniteCoordinate { index });
                        }
                        if !c.in_range() {
                            return Err(RouteValidationError::CoordinateOutOfRange { index });
                        }
                    }
                    if seg.distance_km <= 0.0 || seg.duration_h <= 0.0 {
                        return Err(RouteValidationError::NonPositiveMetric { index });
                    }

                    if let Some(p) = prev {
                        let ordered = (seg.day, seg.segment) > (p.day, p.segment);
                        if !ordered {
                            return Err(RouteValidationError::OutOfOrder { index });
                        }
                        // Consecutive segments of one day share their boundary
                        // coordinate; day boundaries may skip.
                        if seg.day == p.day {
                            let tail = p.coordinates.last();
                            let head = seg.coordinates.first();
                            if tail != head {
                                return Err(RouteValidationError::SegmentGap { index });
                            }
                        }
                    }

                    warn_on_implausible_distance(seg);
                    prev = Some(seg);
                }
                RouteFeature::Poi(poi) => {
                    if !poi.coordinate.is_finite() {
                        return Err(RouteValidationError::NonFiniteCoordinate { index });
                    }
                    if !poi.coordinate.in_range() {
                        return Err(RouteValidationError::CoordinateOutOfRange { index });
                    }
                    if poi.day < 1 {
                        return Err(RouteValidationError::BadOrdinal { index });
                    }
                }
            }
        }

        if !seen_segment {
            return Err(RouteValidationError::NoSegments);
        }
        Ok(())
    }

    /// Wire form: a GeoJSON FeatureCollection with the aggregate properties
    /// as a top-level foreign member.
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self.features.iter().map(feature_to_geojson).collect();

        let mut foreign = JsonObject::new();
        foreign.insert(
            "properties".to_string(),
            serde_json::json!({
                "title": self.properties.title,
                "total_distance_km": self.properties.total_distance_km,
                "total_duration_h": self.properties.total_duration_h,
                "highlights": self.properties.highlights,
                "days": self.properties.days,
            }),
        );

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: Some(foreign),
        }
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::to_value(self.to_feature_collection())
            .unwrap_or_else(|_| serde_json::Value::Null)
    }

    /// Parse the wire form back into a document. Structural problems come
    /// back as `Malformed`; semantic problems are left to [`Self::validate`].
    pub fn from_json_str(input: &str) -> Result<Self, RouteValidationError> {
        let geojson: GeoJson = input
            .parse()
            .map_err(|e: geojson::Error| RouteValidationError::Malformed(e.to_string()))?;
        let fc = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            other => {
                return Err(RouteValidationError::Malformed(format!(
                    "expected FeatureCollection, got {}",
                    geojson_kind(&other)
                )))
            }
        };
        Self::from_feature_collection(fc)
    }

    pub fn from_json_value(value: &serde_json::Value) -> Result<Self, RouteValidationError> {
        let geojson = GeoJson::try_from(value.clone())
            .map_err(|e: geojson::Error| RouteValidationError::Malformed(e.to_string()))?;
        match geojson {
            GeoJson::FeatureCollection(fc) => Self::from_feature_collection(fc),
            other => Err(RouteValidationError::Malformed(format!(
                "expected FeatureCollection, got {}",
                geojson_kind(&other)
            ))),
        }
    }

    pub fn from_feature_collection(fc: FeatureCollection) -> Result<Self, RouteValidationError> {
        let props_value = fc
            .foreign_members
            .as_ref()
            .and_then(|m| m.get("properties"))
            .ok_or_else(|| RouteValidationError::Malformed("missing collection properties".into()))?;

        let properties = RouteProperties {
            title: required_str(props_value, "title")?,
            total_distance_km: required_f64(props_value, "total_distance_km")?,
            total_duration_h: required_f64(props_value, "total_duration_h")?,
            highlights: props_value
                .get("highlights")
                .and_then(JsonValue::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(JsonValue::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            days: required_u32(props_value, "days")?,
        };

        let features = fc
            .features
            .into_iter()
            .map(feature_from_geojson)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { properties, features })
    }
}

/// The denormalized slice of a completed route that note-list read surfaces
/// show, derived on demand so nothing is persisted twice.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ExtractedSummary {
    pub title: String,
    pub total_distance_km: f64,
    pub total_duration_h: f64,
    pub highlights: Vec<String>,
}

impl From<&RouteDocument> for ExtractedSummary {
    fn from(doc: &RouteDocument) -> Self {
        Self {
            title: doc.properties.title.clone(),
            total_distance_km: doc.properties.total_distance_km,
            total_duration_h: doc.properties.total_duration_h,
            highlights: doc.properties.highlights.clone(),
        }
    }
}

fn warn_on_implausible_distance(seg: &RouteSegment) {
    let line = geo_types::LineString::from(
        seg.coordinates
            .iter()
            .map(|c| (c.lon, c.lat))
            .collect::<Vec<_>>(),
    );
    let geodesic_km = line.haversine_length() / 1000.0;
    if geodesic_km > 1.0 && seg.distance_km < geodesic_km * 0.5 {
        tracing::warn!(
            day = seg.day,
            segment = seg.segment,
            declared_km = seg.distance_km,
            geodesic_km,
            "segment distance is implausibly short for its geometry"
        );
    }
}

fn feature_to_geojson(feature: &RouteFeature) -> Feature {
    match feature {
        RouteFeature::Segment(seg) => {
            let coords = seg
                .coordinates
                .iter()
                .map(|c| vec![c.lon, c.lat])
                .collect::<Vec<_>>();
            let mut props = JsonObject::new();
            props.insert("name".into(), seg.name.clone().into());
            props.insert("description".into(), seg.description.clone().into());
            props.insert("day".into(), seg.day.into());
            props.insert("segment".into(), seg.segment.into());
            props.insert("distance_km".into(), seg.distance_km.into());
            props.insert("duration_h".into(), seg.duration_h.into());
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::LineString(coords))),
                id: None,
                properties: Some(props),
                foreign_members: None,
            }
        }
        RouteFeature::Poi(poi) => {
            let mut props = JsonObject::new();
            props.insert("name".into(), poi.name.clone().into());
            props.insert("description".into(), poi.description.clone().into());
            props.insert("day".into(), poi.day.into());
            props.insert("kind".into(), poi.kind.clone().into());
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::Point(vec![
                    poi.coordinate.lon,
                    poi.coordinate.lat,
                ]))),
                id: None,
                properties: Some(props),
                foreign_members: None,
            }
        }
    }
}

fn feature_from_geojson(feature: Feature) -> Result<RouteFeature, RouteValidationError> {
    let geometry = feature
        .geometry
        .ok_or_else(|| RouteValidationError::Malformed("feature without geometry".into()))?;
    let props = feature.properties.unwrap_or_default();
    let props = JsonValue::Object(props);

    match geometry.value {
        geojson::Value::LineString(coords) => Ok(RouteFeature::Segment(RouteSegment {
            coordinates: coords
                .iter()
                .map(|p| position_to_coordinate(p))
                .collect::<Result<Vec<_>, _>>()?,
            name: required_str(&props, "name")?,
            description: optional_str(&props, "description"),
            day: required_u32(&props, "day")?,
            segment: required_u32(&props, "segment")?,
            distance_km: required_f64(&props, "distance_km")?,
            duration_h: required_f64(&props, "duration_h")?,
        })),
        geojson::Value::Point(pos) => Ok(RouteFeature::Poi(PointOfInterest {
            coordinate: position_to_coordinate(&pos)?,
            name: required_str(&props, "name")?,
            description: optional_str(&props, "description"),
            day: required_u32(&props, "day")?,
            kind: optional_str(&props, "kind"),
        })),
        _ => Err(RouteValidationError::Malformed(
            "unsupported geometry type".into(),
        )),
    }
}

fn position_to_coordinate(pos: &[f64]) -> Result<Coordinate, RouteValidationError> {
    if pos.len() < 2 {
        return Err(RouteValidationError::Malformed(
            "position with fewer than 2 ordinates".into(),
        ));
    }
    Ok(Coordinate::new(pos[0], pos[1]))
}

fn geojson_kind(value: &GeoJson) -> &'static str {
    match value {
        GeoJson::Geometry(_) => "Geometry",
        GeoJson::Feature(_) => "Feature",
        GeoJson::FeatureCollection(_) => "FeatureCollection",
    }
}

fn required_str(value: &JsonValue, key: &str) -> Result<String, RouteValidationError> {
    value
        .get(key)
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| RouteValidationError::Malformed(format!("missing string property {key}")))
}

fn optional_str(value: &JsonValue, key: &str) -> String {
    value
        .get(key)
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string()
}

fn required_f64(value: &JsonValue, key: &str) -> Result<f64, RouteValidationError> {
    value
        .get(key)
        .and_then(JsonValue::as_f64)
        .ok_or_else(|| RouteValidationError::Malformed(format!("missing numeric property {key}")))
}

fn required_u32(value: &JsonValue, key: &str) -> Result<u32, RouteValidationError> {
    value
        .get(key)
        .and_then(JsonValue::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| RouteValidationError::Malformed(format!("missing integer property {key}")))
}
