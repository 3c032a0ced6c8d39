use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ride_planner_backend::ai::{AnthropicRoutePlanner, RouteModel};
use ride_planner_backend::config::Config;
use ride_planner_backend::coordinator::Coordinator;
use ride_planner_backend::routes;
use ride_planner_backend::store::{
    GenerationStore, MemoryStore, NoteStore, PgStore, PreferenceStore,
};
use ride_planner_backend::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ride_planner_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load config
    let config = Config::from_env()?;
    tracing::info!("Starting server on {}:{}", config.host, config.port);
    tracing::info!("Allowed CORS origins: {:?}", config.allowed_origins);

    // Pick the persistence backend
    let (store, notes, preferences): (
        Arc<dyn GenerationStore>,
        Arc<dyn NoteStore>,
        Arc<dyn PreferenceStore>,
    ) = match &config.database_url {
        Some(url) => {
            let pg = Arc::new(PgStore::connect(url).await?);
            tracing::info!("Database connection established");
            (pg.clone(), pg.clone(), pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, falling back to the in-memory store");
            let memory = Arc::new(MemoryStore::new());
            (memory.clone(), memory.clone(), memory)
        }
    };

    // Model provider
    if config.anthropic_api_key.is_empty() {
        tracing::warn!("ANTHROPIC_API_KEY not set, generations will fail");
    }
    let mut planner = AnthropicRoutePlanner::new(
        config.anthropic_api_key.clone(),
        config.anthropic_model.clone(),
    );
    if let Some(base_url) = &config.anthropic_base_url {
        planner = planner.with_base_url(base_url.clone());
    }
    let model: Arc<dyn RouteModel> = Arc::new(planner);

    let coordinator = Arc::new(Coordinator::new(
        store,
        notes,
        preferences,
        model,
        config.generation.clone(),
    ));

    // CORS configuration with wildcard support
    let allowed_origins = config.allowed_origins.clone();

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::AllowOrigin::predicate(
            move |origin: &HeaderValue, _request_parts| {
                let origin_str = origin.to_str().unwrap_or("");

                // Check exact matches
                if allowed_origins.contains(&origin_str.to_string()) {
                    return true;
                }

                // Check wildcard patterns (e.g., *.vercel.app)
                for pattern in &allowed_origins {
                    if let Some(domain) = pattern.strip_prefix("*.") {
                        if origin_str.ends_with(domain) {
                            return true;
                        }
                    }
                }

                false
            },
        ))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(false);

    // Build router
    let app = Router::new()
        .nest("/api", routes::api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { coordinator });

    // Start server
    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.host, config.port)).await?;

    tracing::info!("Server listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
