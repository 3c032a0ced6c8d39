use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use uuid::Uuid;

use ride_planner_backend::ai::ModelFailureKind;
use ride_planner_backend::coordinator::{CoordinatorError, ExportFormat};
use ride_planner_backend::models::{CostEntry, FailureKind, GenerationRecord, GenerationStatus};
use ride_planner_backend::store::{GenerationStore, NoteStore, PreferenceStore};

mod common;

use common::fixtures::{self, ScriptedCall};
use common::helpers::{self, TestApp};

async fn seed_owner(app: &TestApp) -> (Uuid, Uuid) {
    let owner = Uuid::new_v4();
    let note = fixtures::ride_note(owner);
    let note_id = note.id;
    app.store
        .upsert_preferences(fixtures::complete_preferences(owner))
        .await
        .unwrap();
    app.store.upsert_note(note).await.unwrap();
    (owner, note_id)
}

async fn wait_for_terminal(app: &TestApp, itinerary_id: Uuid) -> GenerationRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let record = app.store.get(itinerary_id).await.unwrap().unwrap();
        if record.status.is_terminal() {
            return record;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job never reached a terminal state: {:?}", record.status);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn spend(app: &TestApp, owner: Uuid) -> f64 {
    app.store
        .spend_since(owner, Utc::now() - chrono::Duration::days(365))
        .await
        .unwrap()
}

#[tokio::test]
async fn deadline_overrun_fails_with_timeout_and_records_cost() {
    let mut settings = helpers::test_settings();
    settings.job_deadline = Duration::from_millis(100);
    let app = helpers::build_test_app_with(settings, vec![ScriptedCall::BlockUntilCancelled]);
    let (owner, note_id) = seed_owner(&app).await;

    let record = app
        .coordinator
        .generate(owner, note_id, Uuid::new_v4())
        .await
        .unwrap();

    let terminal = wait_for_terminal(&app, record.itinerary_id).await;
    assert_eq!(terminal.status, GenerationStatus::Failed);
    assert_eq!(terminal.error.as_ref().unwrap().kind, FailureKind::Timeout);
    assert!(terminal.terminated_at.is_some());
    assert!(spend(&app, owner).await > 0.0);
}

#[tokio::test]
async fn transient_network_failure_is_retried_exactly_once() {
    let app = helpers::build_test_app(vec![
        ScriptedCall::Fail {
            kind: ModelFailureKind::Network,
        },
        ScriptedCall::Succeed {
            route: fixtures::route_document(3),
            progress: vec![],
        },
    ]);
    let (owner, note_id) = seed_owner(&app).await;

    let record = app
        .coordinator
        .generate(owner, note_id, Uuid::new_v4())
        .await
        .unwrap();

    let terminal = wait_for_terminal(&app, record.itinerary_id).await;
    assert_eq!(terminal.status, GenerationStatus::Completed);
    assert!(terminal.route.is_some());
    assert_eq!(app.model.call_count(), 2);
}

#[tokio::test]
async fn rate_limited_gets_the_same_single_retry() {
    let app = helpers::build_test_app(vec![
        ScriptedCall::Fail {
            kind: ModelFailureKind::RateLimited,
        },
        ScriptedCall::Fail {
            kind: ModelFailureKind::RateLimited,
        },
    ]);
    let (owner, note_id) = seed_owner(&app).await;

    let record = app
        .coordinator
        .generate(owner, note_id, Uuid::new_v4())
        .await
        .unwrap();

    let terminal = wait_for_terminal(&app, record.itinerary_id).await;
    assert_eq!(terminal.status, GenerationStatus::Failed);
    assert_eq!(
        terminal.error.as_ref().unwrap().kind,
        FailureKind::RateLimited
    );
    assert_eq!(app.model.call_count(), 2);
}

#[tokio::test]
async fn model_errors_are_not_retried() {
    let app = helpers::build_test_app(vec![ScriptedCall::Fail {
        kind: ModelFailureKind::ModelError,
    }]);
    let (owner, note_id) = seed_owner(&app).await;

    let record = app
        .coordinator
        .generate(owner, note_id, Uuid::new_v4())
        .await
        .unwrap();

    let terminal = wait_for_terminal(&app, record.itinerary_id).await;
    assert_eq!(terminal.status, GenerationStatus::Failed);
    assert_eq!(app.model.call_count(), 1);
}

#[tokio::test]
async fn invalid_model_output_lands_as_invalid_route() {
    let app = helpers::build_test_app(vec![ScriptedCall::Succeed {
        route: fixtures::broken_document(),
        progress: vec![],
    }]);
    let (owner, note_id) = seed_owner(&app).await;

    let record = app
        .coordinator
        .generate(owner, note_id, Uuid::new_v4())
        .await
        .unwrap();

    let terminal = wait_for_terminal(&app, record.itinerary_id).await;
    assert_eq!(terminal.status, GenerationStatus::Failed);
    assert_eq!(
        terminal.error.as_ref().unwrap().kind,
        FailureKind::InvalidRoute
    );
    assert!(terminal.route.is_none());
}

#[tokio::test]
async fn cancelling_a_queued_job_records_no_cost() {
    let mut settings = helpers::test_settings();
    settings.worker_concurrency = 1;
    let estimate = settings.cost_per_call_estimate;
    let app = helpers::build_test_app_with(
        settings,
        vec![
            ScriptedCall::BlockUntilCancelled,
            ScriptedCall::BlockUntilCancelled,
        ],
    );
    let (owner, first_note) = seed_owner(&app).await;

    // Occupy the only worker slot.
    let first = app
        .coordinator
        .generate(owner, first_note, Uuid::new_v4())
        .await
        .unwrap();

    // Second job for a different note queues behind it.
    let second_note = fixtures::ride_note(owner);
    let second_note_id = second_note.id;
    app.store.upsert_note(second_note).await.unwrap();
    let second = app
        .coordinator
        .generate(owner, second_note_id, Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(second.status, GenerationStatus::Pending);

    app.coordinator
        .cancel(second.itinerary_id, owner)
        .await
        .unwrap();
    app.coordinator
        .cancel(first.itinerary_id, owner)
        .await
        .unwrap();

    let second_terminal = wait_for_terminal(&app, second.itinerary_id).await;
    assert_eq!(second_terminal.status, GenerationStatus::Cancelled);

    let first_terminal = wait_for_terminal(&app, first.itinerary_id).await;
    assert_eq!(first_terminal.status, GenerationStatus::Cancelled);

    // Only the dispatched job cost anything.
    let total = spend(&app, owner).await;
    assert_eq!(total, estimate, "expected exactly one ledger entry");
}

#[tokio::test]
async fn cancelled_running_job_still_records_partial_cost() {
    let app = helpers::build_test_app(vec![ScriptedCall::BlockUntilCancelled]);
    let (owner, note_id) = seed_owner(&app).await;

    let record = app
        .coordinator
        .generate(owner, note_id, Uuid::new_v4())
        .await
        .unwrap();

    // Let the worker reach the model call.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = app.store.get(record.itinerary_id).await.unwrap().unwrap();
        if snapshot.status == GenerationStatus::Running {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "never started running");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    app.coordinator
        .cancel(record.itinerary_id, owner)
        .await
        .unwrap();
    let terminal = wait_for_terminal(&app, record.itinerary_id).await;
    assert_eq!(terminal.status, GenerationStatus::Cancelled);
    assert!(spend(&app, owner).await > 0.0);
}

#[tokio::test]
async fn generate_is_idempotent_per_request_id() {
    let app = helpers::build_test_app(vec![ScriptedCall::Succeed {
        route: fixtures::route_document(3),
        progress: vec![],
    }]);
    let (owner, note_id) = seed_owner(&app).await;
    let request_id = Uuid::new_v4();

    let first = app
        .coordinator
        .generate(owner, note_id, request_id)
        .await
        .unwrap();
    wait_for_terminal(&app, first.itinerary_id).await;

    // The replay returns the same record even after completion.
    let replay = app
        .coordinator
        .generate(owner, note_id, request_id)
        .await
        .unwrap();
    assert_eq!(replay.itinerary_id, first.itinerary_id);
    assert_eq!(replay.status, GenerationStatus::Completed);
    assert_eq!(app.model.call_count(), 1);
}

#[tokio::test]
async fn retry_after_tracks_the_oldest_window_entry() {
    let mut settings = helpers::test_settings();
    settings.spend_cap = 0.5;
    settings.cost_per_call_estimate = 0.4;
    settings.spend_window = Duration::from_secs(3600);
    let app = helpers::build_test_app_with(settings, vec![]);
    let (owner, note_id) = seed_owner(&app).await;

    // Entry recorded 50 minutes ago in a 60 minute window: roughly 10
    // minutes until it rolls out.
    app.store
        .record_cost(CostEntry {
            owner_id: owner,
            itinerary_id: Uuid::new_v4(),
            amount: 0.4,
            recorded_at: Utc::now() - chrono::Duration::minutes(50),
        })
        .await
        .unwrap();

    let err = app
        .coordinator
        .generate(owner, note_id, Uuid::new_v4())
        .await
        .unwrap_err();
    let retry_after = assert_matches!(
        err,
        CoordinatorError::ServiceLimitReached { retry_after } => retry_after
    );
    assert!((540..=600).contains(&retry_after), "retry_after = {retry_after}");
}

#[tokio::test]
async fn degenerate_point_limit_surfaces_too_many_points() {
    let mut settings = helpers::test_settings();
    settings.mapy_point_limit = 1;
    let app = helpers::build_test_app_with(settings, vec![]);
    let owner = Uuid::new_v4();
    let itinerary_id =
        fixtures::seed_completed(&app.store, owner, Uuid::new_v4(), fixtures::route_document(30))
            .await;

    let err = app
        .coordinator
        .export(itinerary_id, owner, ExportFormat::Mapy, true)
        .await
        .unwrap_err();
    assert_matches!(err, CoordinatorError::TooManyPoints { limit: 1, .. });
}

#[tokio::test]
async fn progress_reports_fold_into_the_record_monotonically() {
    let app = helpers::build_test_app(vec![ScriptedCall::Succeed {
        route: fixtures::route_document(3),
        progress: vec![10, 40, 40, 90],
    }]);
    let (owner, note_id) = seed_owner(&app).await;

    let record = app
        .coordinator
        .generate(owner, note_id, Uuid::new_v4())
        .await
        .unwrap();

    let mut observed = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = app
            .coordinator
            .poll_status(record.itinerary_id, owner)
            .await
            .unwrap();
        if let Some(progress) = snapshot.progress {
            observed.push(progress);
        }
        if snapshot.status.is_terminal() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "never finished");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert!(
        observed.windows(2).all(|w| w[0] <= w[1]),
        "progress regressed: {observed:?}"
    );
    let terminal = wait_for_terminal(&app, record.itinerary_id).await;
    assert_eq!(terminal.progress, Some(100));
}

#[tokio::test]
async fn concurrent_submissions_admit_exactly_one_active_job() {
    let app = helpers::build_test_app(vec![ScriptedCall::BlockUntilCancelled]);
    let (owner, note_id) = seed_owner(&app).await;

    let results = futures::future::join_all((0..8).map(|_| {
        let coordinator = app.coordinator.clone();
        async move { coordinator.generate(owner, note_id, Uuid::new_v4()).await }
    }))
    .await;

    let accepted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(accepted.len(), 1, "exactly one submission wins");
    let winner = accepted[0].itinerary_id;

    for result in &results {
        if let Err(err) = result {
            let itinerary_id = assert_matches!(
                err,
                CoordinatorError::GenerationInProgress { itinerary_id } => *itinerary_id
            );
            assert_eq!(itinerary_id, winner, "losers point at the active job");
        }
    }
}

#[tokio::test]
async fn poll_and_cancel_enforce_ownership() {
    let app = helpers::build_test_app(vec![ScriptedCall::BlockUntilCancelled]);
    let (owner, note_id) = seed_owner(&app).await;
    let record = app
        .coordinator
        .generate(owner, note_id, Uuid::new_v4())
        .await
        .unwrap();

    let stranger = Uuid::new_v4();
    assert_matches!(
        app.coordinator
            .poll_status(record.itinerary_id, stranger)
            .await,
        Err(CoordinatorError::Unauthorized)
    );
    assert_matches!(
        app.coordinator.cancel(record.itinerary_id, stranger).await,
        Err(CoordinatorError::Unauthorized)
    );
    assert_matches!(
        app.coordinator
            .export(record.itinerary_id, stranger, ExportFormat::Gpx, true)
            .await,
        Err(CoordinatorError::Unauthorized)
    );
}
