pub mod geojson;
pub mod gpx;
pub mod links;

pub use self::geojson::geojson_string;
pub use self::gpx::gpx_bytes;
pub use self::links::{google_url, mapy_url};

use thiserror::Error;

/// Optional presentation knobs for file exports. Downloads use the defaults;
/// callers that feed navigation devices with tight point budgets can ask for
/// Douglas-Peucker simplification first.
#[derive(Debug, Clone)]
pub struct RenderHints {
    /// Decimal places for exported coordinates.
    pub coord_decimals: usize,
    /// Simplification tolerance in degrees; `None` emits the geometry verbatim.
    pub simplify_tolerance_deg: Option<f64>,
}

impl Default for RenderHints {
    fn default() -> Self {
        Self {
            coord_decimals: 6,
            simplify_tolerance_deg: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("route has no exportable coordinates")]
    EmptyRoute,
    #[error("route needs {count} points but the provider accepts {limit}")]
    TooManyPoints { count: usize, limit: usize },
    #[error("gpx serialization failed: {0}")]
    Xml(String),
}
