pub mod anthropic;
pub mod prompt;

pub use anthropic::AnthropicRoutePlanner;
pub use prompt::{build_prompt, ResolvedPreferences};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::RouteDocument;

/// Why a model invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFailureKind {
    RateLimited,
    ModelError,
    Timeout,
    Network,
    Cancelled,
    InvalidOutput,
}

impl ModelFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::ModelError => "model_error",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Cancelled => "cancelled",
            Self::InvalidOutput => "invalid_output",
        }
    }

    /// Transient kinds are worth one more attempt; the retry policy itself
    /// lives in the coordinator.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::RateLimited)
    }
}

/// Typed failure surfaced by a [`RouteModel`]. The message is sanitized for
/// end users; raw provider output never crosses this boundary.
#[derive(Debug, Clone, Error)]
#[error("{}: {message}", .kind.as_str())]
pub struct ModelFailure {
    pub kind: ModelFailureKind,
    pub message: String,
    pub retry_hint: Option<u64>,
}

impl ModelFailure {
    pub fn new(kind: ModelFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_hint: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ModelFailureKind::Cancelled, "generation was cancelled")
    }

    pub fn with_retry_hint(mut self, seconds: u64) -> Self {
        self.retry_hint = Some(seconds);
        self
    }
}

/// A single remote model call producing one route document.
///
/// Implementations must observe `cancel` on every blocking await, report
/// progress (if at all) as non-decreasing integers in 0..=100, never retry
/// internally, and never yield a partial document.
#[async_trait]
pub trait RouteModel: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        progress: mpsc::Sender<u8>,
        cancel: CancellationToken,
    ) -> Result<RouteDocument, ModelFailure>;
}
