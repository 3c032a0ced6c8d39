use std::time::Duration;

use anyhow::Result;

/// Process-level configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means the in-memory store (dev mode).
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub anthropic_api_key: String,
    pub anthropic_model: String,
    pub anthropic_base_url: Option<String>,
    pub generation: GenerationSettings,
}

/// Operator knobs for the generation coordinator. Every recognized option,
/// its env var and its default:
///
/// | env var                | default | effect |
/// |------------------------|---------|--------|
/// | `WORKER_CONCURRENCY`   | 4       | jobs running at once; excess stays pending, FIFO |
/// | `JOB_DEADLINE_SECS`    | 300     | wall-clock deadline since submission |
/// | `RETRY_BACKOFF_SECS`   | 2       | pause before the single transient-failure retry |
/// | `SPEND_WINDOW_DAYS`    | 30      | rolling window the cap is summed over |
/// | `SPEND_CAP`            | 100.0   | per-owner ceiling on windowed spend |
/// | `COST_PER_CALL_ESTIMATE` | 0.25  | preflight increment and recorded amount |
/// | `MAPY_POINT_LIMIT`     | 15      | max points in a Mapy.com deep link |
/// | `GOOGLE_POINT_LIMIT`   | 25      | max points in a Google Maps deep link |
/// | `COORD_DECIMALS`       | 6       | decimal places in exported coordinates |
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub worker_concurrency: usize,
    pub job_deadline: Duration,
    pub retry_backoff: Duration,
    pub spend_window: Duration,
    pub spend_cap: f64,
    pub cost_per_call_estimate: f64,
    pub mapy_point_limit: usize,
    pub google_point_limit: usize,
    pub coord_decimals: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            job_deadline: Duration::from_secs(300),
            retry_backoff: Duration::from_secs(2),
            spend_window: Duration::from_secs(30 * 24 * 3600),
            spend_cap: 100.0,
            cost_per_call_estimate: 0.25,
            mapy_point_limit: 15,
            google_point_limit: 25,
            coord_decimals: 6,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {name}: {e}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let allowed_origins_str = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        let allowed_origins = allowed_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let defaults = GenerationSettings::default();
        let generation = GenerationSettings {
            worker_concurrency: env_or("WORKER_CONCURRENCY", defaults.worker_concurrency)?,
            job_deadline: Duration::from_secs(env_or(
                "JOB_DEADLINE_SECS",
                defaults.job_deadline.as_secs(),
            )?),
            retry_backoff: Duration::from_secs(env_or(
                "RETRY_BACKOFF_SECS",
                defaults.retry_backoff.as_secs(),
            )?),
            spend_window: Duration::from_secs(env_or("SPEND_WINDOW_DAYS", 30u64)? * 24 * 3600),
            spend_cap: env_or("SPEND_CAP", defaults.spend_cap)?,
            cost_per_call_estimate: env_or(
                "COST_PER_CALL_ESTIMATE",
                defaults.cost_per_call_estimate,
            )?,
            mapy_point_limit: env_or("MAPY_POINT_LIMIT", defaults.mapy_point_limit)?,
            google_point_limit: env_or("GOOGLE_POINT_LIMIT", defaults.google_point_limit)?,
            coord_decimals: env_or("COORD_DECIMALS", defaults.coord_decimals)?,
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()?,
            allowed_origins,
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            anthropic_model: std::env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5".to_string()),
            anthropic_base_url: std::env::var("ANTHROPIC_BASE_URL").ok(),
            generation,
        })
    }
}
