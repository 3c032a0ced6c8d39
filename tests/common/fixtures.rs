use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use ride_planner_backend::ai::{ModelFailure, ModelFailureKind, RouteModel};
use ride_planner_backend::models::{
    Coordinate, GenerationStatus, NewGeneration, PointOfInterest, PreferenceOverrides, RideNote,
    RiderPreferences, RouteDocument, RouteFeature, RouteProperties, RouteSegment,
};
use ride_planner_backend::store::{GenerationStore, MemoryStore, StatusUpdate};

/// One scripted model invocation; the scripted model pops these per call.
pub enum ScriptedCall {
    /// Report the given progress marks, then return the route.
    Succeed {
        route: RouteDocument,
        progress: Vec<u8>,
    },
    /// Sleep (cancellable), then return the route.
    SucceedAfter {
        route: RouteDocument,
        delay: Duration,
    },
    /// Return a typed failure immediately.
    Fail { kind: ModelFailureKind },
    /// Park until the cancellation token fires.
    BlockUntilCancelled,
}

/// Deterministic stand-in for the remote model.
pub struct ScriptedModel {
    calls: Mutex<VecDeque<ScriptedCall>>,
    pub calls_made: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(calls: Vec<ScriptedCall>) -> Self {
        Self {
            calls: Mutex::new(calls.into()),
            calls_made: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls_made.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteModel for ScriptedModel {
    async fn generate(
        &self,
        _prompt: &str,
        progress: mpsc::Sender<u8>,
        cancel: CancellationToken,
    ) -> Result<RouteDocument, ModelFailure> {
        self.calls_made.fetch_add(1, Ordering::SeqCst);
        let call = self.calls.lock().unwrap().pop_front();
        match call {
            Some(ScriptedCall::Succeed {
                route,
                progress: marks,
            }) => {
                for mark in marks {
                    let _ = progress.send(mark).await;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    if cancel.is_cancelled() {
                        return Err(ModelFailure::cancelled());
                    }
                }
                Ok(route)
            }
            Some(ScriptedCall::SucceedAfter { route, delay }) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ModelFailure::cancelled()),
                    _ = tokio::time::sleep(delay) => Ok(route),
                }
            }
            Some(ScriptedCall::Fail { kind }) => Err(ModelFailure::new(kind, "scripted failure")),
            Some(ScriptedCall::BlockUntilCancelled) | None => {
                cancel.cancelled().await;
                Err(ModelFailure::cancelled())
            }
        }
    }
}

/// A complete riding profile for `owner`.
pub fn complete_preferences(owner: Uuid) -> RiderPreferences {
    RiderPreferences {
        owner_id: owner,
        terrain: Some("alpine passes".into()),
        road_type: Some("twisty tarmac".into()),
        typical_duration_h: Some(6.0),
        typical_distance_km: Some(300.0),
        updated_at: Utc::now(),
    }
}

pub fn ride_note(owner: Uuid) -> RideNote {
    RideNote {
        id: Uuid::new_v4(),
        owner_id: owner,
        title: "Dolomites weekend".into(),
        body: "Two days around Passo Giau and Sella, avoid motorways".into(),
        archived: false,
        overrides: PreferenceOverrides::default(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn line(coords: &[(f64, f64)], day: u32, segment: u32) -> RouteFeature {
    RouteFeature::Segment(RouteSegment {
        coordinates: coords
            .iter()
            .map(|&(lon, lat)| Coordinate::new(lon, lat))
            .collect(),
        name: format!("Leg {day}.{segment}"),
        description: "Scripted leg".into(),
        day,
        segment,
        distance_km: 90.0,
        duration_h: 2.0,
    })
}

/// One-day document with a single LineString of `points` coordinates.
pub fn route_document(points: usize) -> RouteDocument {
    let coords: Vec<(f64, f64)> = (0..points)
        .map(|i| (11.0 + i as f64 / 10.0, 46.0 + i as f64 / 20.0))
        .collect();
    RouteDocument {
        properties: RouteProperties {
            title: "Dolomites weekend".into(),
            total_distance_km: 320.0,
            total_duration_h: 7.5,
            highlights: vec!["Passo Giau".into(), "Passo Sella".into()],
            days: 1,
        },
        features: vec![line(&coords, 1, 1)],
    }
}

/// Two-day document with touching same-day segments and a waypoint.
pub fn multi_day_document() -> RouteDocument {
    RouteDocument {
        properties: RouteProperties {
            title: "Dolomites weekend".into(),
            total_distance_km: 520.0,
            total_duration_h: 12.0,
            highlights: vec!["Passo Giau".into()],
            days: 2,
        },
        features: vec![
            line(&[(11.0, 46.0), (11.1, 46.1)], 1, 1),
            line(&[(11.1, 46.1), (11.2, 46.2)], 1, 2),
            RouteFeature::Poi(PointOfInterest {
                coordinate: Coordinate::new(11.15, 46.15),
                name: "Rifugio lunch".into(),
                description: "Pasta with a view".into(),
                day: 1,
                kind: "food".into(),
            }),
            line(&[(11.3, 46.3), (11.4, 46.4)], 2, 1),
        ],
    }
}

/// An invalid document: a single-coordinate segment.
pub fn broken_document() -> RouteDocument {
    RouteDocument {
        properties: RouteProperties {
            title: "Broken".into(),
            total_distance_km: 10.0,
            total_duration_h: 1.0,
            highlights: vec![],
            days: 1,
        },
        features: vec![line(&[(11.0, 46.0)], 1, 1)],
    }
}

/// Drive a record straight to `completed` through the store CAS, bypassing
/// the worker. Returns the itinerary id.
pub async fn seed_completed(
    store: &MemoryStore,
    owner: Uuid,
    note_id: Uuid,
    route: RouteDocument,
) -> Uuid {
    let record = store
        .create(NewGeneration {
            itinerary_id: Uuid::new_v4(),
            note_id,
            owner_id: owner,
            request_id: Uuid::new_v4(),
        })
        .await
        .expect("seed create");
    store
        .update_status(
            record.itinerary_id,
            GenerationStatus::Pending,
            GenerationStatus::Running,
            StatusUpdate::progress(0),
        )
        .await
        .expect("seed running");
    store
        .update_status(
            record.itinerary_id,
            GenerationStatus::Running,
            GenerationStatus::Completed,
            StatusUpdate::completed(route, 0.25),
        )
        .await
        .expect("seed completed");
    record.itinerary_id
}
