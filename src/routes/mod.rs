pub mod error;
pub mod itineraries;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Generation
        .route(
            "/notes/{note_id}/itineraries",
            post(itineraries::create_itinerary).get(itineraries::list_itineraries),
        )
        .route(
            "/itineraries/{itinerary_id}/status",
            get(itineraries::get_status),
        )
        .route(
            "/itineraries/{itinerary_id}/cancel",
            post(itineraries::cancel_itinerary),
        )
        // Exports
        .route(
            "/itineraries/{itinerary_id}/download",
            get(itineraries::download_itinerary),
        )
        .route(
            "/itineraries/{itinerary_id}/mapy",
            get(itineraries::mapy_link),
        )
        .route(
            "/itineraries/{itinerary_id}/google",
            get(itineraries::google_link),
        )
}
