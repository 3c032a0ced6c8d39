use crate::models::{Coordinate, RouteDocument};

use super::ExportError;

/// All LineString coordinates in `(day, segment)` order with adjacent
/// duplicates removed — touching segments contribute their shared boundary
/// coordinate once.
pub fn flatten_route(doc: &RouteDocument) -> Vec<Coordinate> {
    let mut flat: Vec<Coordinate> = Vec::new();
    for seg in doc.segments() {
        for &coord in &seg.coordinates {
            if flat.last() != Some(&coord) {
                flat.push(coord);
            }
        }
    }
    flat
}

/// Uniform index sampling down to `limit` points, always keeping the first
/// and last. For `k` in `0..limit` the source index is
/// `round(k * (n - 1) / (limit - 1))`, so the picks are monotonic in the
/// source.
pub fn sample_route(coords: &[Coordinate], limit: usize) -> Vec<Coordinate> {
    let n = coords.len();
    if n <= limit {
        return coords.to_vec();
    }
    (0..limit)
        .map(|k| {
            let index = (k as f64 * (n - 1) as f64 / (limit - 1) as f64).round() as usize;
            coords[index]
        })
        .collect()
}

fn sampled_for_limit(doc: &RouteDocument, limit: usize) -> Result<Vec<Coordinate>, ExportError> {
    let flat = flatten_route(doc);
    if flat.len() < 2 {
        return Err(ExportError::EmptyRoute);
    }
    let sampled = sample_route(&flat, limit.max(2));
    if sampled.len() > limit {
        return Err(ExportError::TooManyPoints {
            count: sampled.len(),
            limit,
        });
    }
    Ok(sampled)
}

/// Mapy.com deep link. Coordinates are `lon,lat` — the opposite of Google.
pub fn mapy_url(doc: &RouteDocument, limit: usize) -> Result<String, ExportError> {
    let points = sampled_for_limit(doc, limit)?;

    let start = points.first().expect("at least two points");
    let end = points.last().expect("at least two points");
    let mut url = format!(
        "https://mapy.com/fnc/v1/route?start={},{}&end={},{}",
        start.lon, start.lat, end.lon, end.lat,
    );

    let middle = &points[1..points.len() - 1];
    if !middle.is_empty() {
        let waypoints = middle
            .iter()
            .map(|c| format!("{},{}", c.lon, c.lat))
            .collect::<Vec<_>>()
            .join(";");
        url.push_str("&waypoints=");
        url.push_str(&waypoints);
    }
    url.push_str("&routeType=car_fast");
    Ok(url)
}

/// Google Maps directions deep link. Coordinates are `lat,lon`.
pub fn google_url(doc: &RouteDocument, limit: usize) -> Result<String, ExportError> {
    let points = sampled_for_limit(doc, limit)?;

    let origin = points.first().expect("at least two points");
    let destination = points.last().expect("at least two points");
    let mut url = format!(
        "https://www.google.com/maps/dir/?api=1&origin={},{}&destination={},{}",
        origin.lat, origin.lon, destination.lat, destination.lon,
    );

    let middle = &points[1..points.len() - 1];
    if !middle.is_empty() {
        let waypoints = middle
            .iter()
            .map(|c| format!("{},{}", c.lat, c.lon))
            .collect::<Vec<_>>()
            .join("|");
        url.push_str("&waypoints=");
        url.push_str(&waypoints);
    }
    url.push_str("&travelmode=driving");
    Ok(url)
}
