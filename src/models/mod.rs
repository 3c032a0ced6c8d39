pub mod itinerary;
pub mod note;
pub mod preferences;
pub mod route_document;

pub use itinerary::*;
pub use note::*;
pub use preferences::*;
pub use route_document::*;
