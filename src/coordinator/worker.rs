use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ai::{build_prompt, ModelFailure, ModelFailureKind, ResolvedPreferences, RouteModel};
use crate::config::GenerationSettings;
use crate::models::{
    CostEntry, FailureKind, GenerationFailure, GenerationRecord, GenerationStatus, RideNote,
    RiderPreferences, RouteDocument,
};
use crate::store::{GenerationStore, StatusUpdate, StoreError};

/// Everything a worker task needs; one instance per accepted job. Workers
/// share nothing beyond the store handle and the bounded-concurrency
/// semaphore.
pub(crate) struct JobContext {
    pub store: Arc<dyn GenerationStore>,
    pub model: Arc<dyn RouteModel>,
    pub settings: GenerationSettings,
    pub worker_slots: Arc<Semaphore>,
    pub active_jobs: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    pub record: GenerationRecord,
    pub note: RideNote,
    pub profile: RiderPreferences,
    pub cancel: CancellationToken,
}

enum Attempt {
    Route(RouteDocument),
    Failed(ModelFailure),
    DeadlineExceeded,
}

/// Drive one generation from `pending` to a terminal state. Every status
/// write goes through the store CAS; a lost CAS means someone else already
/// landed a terminal state and the worker backs off.
pub(crate) async fn run(ctx: JobContext) {
    let itinerary_id = ctx.record.itinerary_id;
    run_inner(&ctx).await;
    ctx.active_jobs.lock().unwrap().remove(&itinerary_id);
}

async fn run_inner(ctx: &JobContext) {
    let itinerary_id = ctx.record.itinerary_id;

    // FIFO pickup; acceptance already happened, so waiting here only delays
    // the pending -> running edge.
    let _permit = match ctx.worker_slots.acquire().await {
        Ok(permit) => permit,
        Err(_) => return,
    };

    if cancel_requested(ctx).await {
        transition(
            ctx,
            GenerationStatus::Pending,
            GenerationStatus::Cancelled,
            StatusUpdate::cancelled(None),
        )
        .await;
        return;
    }

    if !transition(
        ctx,
        GenerationStatus::Pending,
        GenerationStatus::Running,
        StatusUpdate::progress(0),
    )
    .await
    {
        return;
    }

    let prompt = build_prompt(
        &ctx.note,
        &ResolvedPreferences::resolve(&ctx.note, &ctx.profile),
    );

    let deadline = ctx.record.created_at
        + chrono::Duration::from_std(ctx.settings.job_deadline)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
    let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    let deadline_sleep = tokio::time::sleep(remaining);
    tokio::pin!(deadline_sleep);

    let mut attempts = 0u8;
    let outcome = loop {
        let (progress_tx, mut progress_rx) = mpsc::channel::<u8>(16);
        let generate = ctx.model.generate(&prompt, progress_tx, ctx.cancel.clone());
        tokio::pin!(generate);

        let attempt = loop {
            tokio::select! {
                result = &mut generate => {
                    break match result {
                        Ok(route) => Attempt::Route(route),
                        Err(failure) => Attempt::Failed(failure),
                    };
                }
                Some(progress) = progress_rx.recv() => {
                    let _ = ctx.store.set_progress(itinerary_id, progress).await;
                }
                _ = &mut deadline_sleep => break Attempt::DeadlineExceeded,
            }
        };

        match attempt {
            Attempt::Failed(failure)
                if failure.kind.is_transient() && attempts == 0 && !ctx.cancel.is_cancelled() =>
            {
                attempts += 1;
                tracing::info!(
                    %itinerary_id,
                    kind = failure.kind.as_str(),
                    "transient model failure, retrying once"
                );
                tokio::select! {
                    _ = tokio::time::sleep(ctx.settings.retry_backoff) => continue,
                    _ = ctx.cancel.cancelled() => break Attempt::Failed(ModelFailure::cancelled()),
                    _ = &mut deadline_sleep => break Attempt::DeadlineExceeded,
                }
            }
            other => break other,
        }
    };

    // The model call was dispatched, so spend is recorded whatever the
    // terminal state turns out to be.
    record_cost(ctx).await;
    let cost = Some(ctx.settings.cost_per_call_estimate);

    match outcome {
        Attempt::Route(route) => {
            if cancel_requested(ctx).await {
                transition(
                    ctx,
                    GenerationStatus::Running,
                    GenerationStatus::Cancelled,
                    StatusUpdate::cancelled(cost),
                )
                .await;
                return;
            }
            match route.validate() {
                Ok(()) => {
                    tracing::info!(%itinerary_id, title = %route.properties.title, "generation completed");
                    transition(
                        ctx,
                        GenerationStatus::Running,
                        GenerationStatus::Completed,
                        StatusUpdate::completed(route, ctx.settings.cost_per_call_estimate),
                    )
                    .await;
                }
                Err(reason) => {
                    tracing::warn!(%itinerary_id, %reason, "model route failed validation");
                    transition(
                        ctx,
                        GenerationStatus::Running,
                        GenerationStatus::Failed,
                        StatusUpdate::failed(
                            GenerationFailure {
                                kind: FailureKind::InvalidRoute,
                                message: "the generated route was not usable".into(),
                            },
                            cost,
                        ),
                    )
                    .await;
                }
            }
        }
        Attempt::Failed(failure) if failure.kind == ModelFailureKind::Cancelled => {
            transition(
                ctx,
                GenerationStatus::Running,
                GenerationStatus::Cancelled,
                StatusUpdate::cancelled(cost),
            )
            .await;
        }
        Attempt::Failed(failure) => {
            tracing::warn!(%itinerary_id, kind = failure.kind.as_str(), "generation failed");
            transition(
                ctx,
                GenerationStatus::Running,
                GenerationStatus::Failed,
                StatusUpdate::failed(
                    GenerationFailure {
                        kind: map_failure_kind(failure.kind),
                        message: failure.message,
                    },
                    cost,
                ),
            )
            .await;
        }
        Attempt::DeadlineExceeded => {
            tracing::warn!(%itinerary_id, "generation hit the wall-clock deadline");
            ctx.cancel.cancel();
            transition(
                ctx,
                GenerationStatus::Running,
                GenerationStatus::Failed,
                StatusUpdate::failed(
                    GenerationFailure {
                        kind: FailureKind::Timeout,
                        message: "generation did not finish within the deadline".into(),
                    },
                    cost,
                ),
            )
            .await;
        }
    }
}

fn map_failure_kind(kind: ModelFailureKind) -> FailureKind {
    match kind {
        ModelFailureKind::Timeout => FailureKind::Timeout,
        ModelFailureKind::Network => FailureKind::Network,
        ModelFailureKind::RateLimited => FailureKind::RateLimited,
        ModelFailureKind::InvalidOutput => FailureKind::InvalidRoute,
        ModelFailureKind::ModelError | ModelFailureKind::Cancelled => FailureKind::ModelError,
    }
}

async fn cancel_requested(ctx: &JobContext) -> bool {
    if ctx.cancel.is_cancelled() {
        return true;
    }
    match ctx.store.get(ctx.record.itinerary_id).await {
        Ok(Some(record)) => record.cancel_requested,
        _ => false,
    }
}

async fn record_cost(ctx: &JobContext) {
    let entry = CostEntry {
        owner_id: ctx.record.owner_id,
        itinerary_id: ctx.record.itinerary_id,
        amount: ctx.settings.cost_per_call_estimate,
        recorded_at: Utc::now(),
    };
    if let Err(err) = ctx.store.record_cost(entry).await {
        tracing::error!(itinerary_id = %ctx.record.itinerary_id, %err, "failed to record cost");
    }
}

async fn transition(
    ctx: &JobContext,
    from: GenerationStatus,
    to: GenerationStatus,
    update: StatusUpdate,
) -> bool {
    match ctx
        .store
        .update_status(ctx.record.itinerary_id, from, to, update)
        .await
    {
        Ok(_) => true,
        Err(StoreError::StatusConflict { .. }) => {
            tracing::debug!(
                itinerary_id = %ctx.record.itinerary_id,
                %from,
                %to,
                "status moved underneath the worker"
            );
            false
        }
        Err(err) => {
            tracing::error!(
                itinerary_id = %ctx.record.itinerary_id,
                %err,
                "status transition failed"
            );
            false
        }
    }
}
