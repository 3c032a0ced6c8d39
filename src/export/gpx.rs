use geo::algorithm::simplify::Simplify;
use geo::LineString;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::models::{Coordinate, RouteDocument, RouteSegment};

use super::{ExportError, RenderHints};

const GPX_NS: &str = "http://www.topografix.com/GPX/1/1";
const CREATOR: &str = "ride-planner";

/// Render a document as GPX 1.1: waypoints for the points of interest, one
/// `<trk>` per day, one `<trkseg>` per segment. Output is indented UTF-8
/// with no comments; coordinates are fixed-precision per the render hints.
pub fn gpx_bytes(doc: &RouteDocument, hints: &RenderHints) -> Result<Vec<u8>, ExportError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let decimals = hints.coord_decimals;

    write(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    let mut gpx = BytesStart::new("gpx");
    gpx.push_attribute(("version", "1.1"));
    gpx.push_attribute(("creator", CREATOR));
    gpx.push_attribute(("xmlns", GPX_NS));
    write(&mut writer, Event::Start(gpx))?;

    // metadata
    write(&mut writer, Event::Start(BytesStart::new("metadata")))?;
    text_element(&mut writer, "name", &doc.properties.title)?;
    let desc = format!(
        "{:.0} km, {:.1} h over {} day{}",
        doc.properties.total_distance_km,
        doc.properties.total_duration_h,
        doc.properties.days,
        if doc.properties.days == 1 { "" } else { "s" },
    );
    text_element(&mut writer, "desc", &desc)?;
    write(&mut writer, Event::End(BytesEnd::new("metadata")))?;

    // GPX 1.1 element order puts waypoints before tracks.
    for poi in doc.pois() {
        let mut wpt = BytesStart::new("wpt");
        wpt.push_attribute(("lat", fixed(poi.coordinate.lat, decimals).as_str()));
        wpt.push_attribute(("lon", fixed(poi.coordinate.lon, decimals).as_str()));
        write(&mut writer, Event::Start(wpt))?;
        text_element(&mut writer, "name", &poi.name)?;
        if !poi.description.is_empty() {
            text_element(&mut writer, "desc", &poi.description)?;
        }
        if !poi.kind.is_empty() {
            text_element(&mut writer, "type", &poi.kind)?;
        }
        write(&mut writer, Event::End(BytesEnd::new("wpt")))?;
    }

    let mut segments = doc.segments().peekable();
    while let Some(first_of_day) = segments.peek() {
        let day = first_of_day.day;
        write(&mut writer, Event::Start(BytesStart::new("trk")))?;
        text_element(&mut writer, "name", &format!("Day {day}"))?;

        while let Some(seg) = segments.peek() {
            if seg.day != day {
                break;
            }
            let seg = segments.next().unwrap();
            write(&mut writer, Event::Start(BytesStart::new("trkseg")))?;
            for coord in segment_coordinates(seg, hints) {
                let mut trkpt = BytesStart::new("trkpt");
                trkpt.push_attribute(("lat", fixed(coord.lat, decimals).as_str()));
                trkpt.push_attribute(("lon", fixed(coord.lon, decimals).as_str()));
                write(&mut writer, Event::Empty(trkpt))?;
            }
            write(&mut writer, Event::End(BytesEnd::new("trkseg")))?;
        }

        write(&mut writer, Event::End(BytesEnd::new("trk")))?;
    }

    write(&mut writer, Event::End(BytesEnd::new("gpx")))?;
    Ok(writer.into_inner())
}

fn xml_error(e: impl std::fmt::Display) -> ExportError {
    ExportError::Xml(e.to_string())
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), ExportError> {
    writer.write_event(event).map_err(xml_error)
}

fn text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    value: &str,
) -> Result<(), ExportError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_error)
}

fn fixed(value: f64, decimals: usize) -> String {
    format!("{value:.decimals$}")
}

/// Apply the optional Douglas-Peucker hint. Endpoints survive, so same-day
/// segments still touch after simplification.
fn segment_coordinates(seg: &RouteSegment, hints: &RenderHints) -> Vec<Coordinate> {
    match hints.simplify_tolerance_deg {
        Some(epsilon) if seg.coordinates.len() > 2 => {
            let line = LineString::from(
                seg.coordinates
                    .iter()
                    .map(|c| (c.lon, c.lat))
                    .collect::<Vec<_>>(),
            );
            line.simplify(&epsilon)
                .0
                .iter()
                .map(|p| Coordinate::new(p.x, p.y))
                .collect()
        }
        _ => seg.coordinates.clone(),
    }
}
