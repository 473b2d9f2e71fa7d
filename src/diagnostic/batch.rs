//! Batched diagnosis with bounded concurrency.
//!
//! Requests are grouped into lanes. Without a store every request is its own
//! lane; with a store, requests for the same student share a lane and run in
//! input order so their loads and saves never interleave. Lanes run as
//! separate tasks, each diagnosis holding a semaphore permit, and results are
//! written back by input index.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::diagnostic::engine::DiagnosticEngine;
use crate::diagnostic::error::DiagnosticError;
use crate::diagnostic::types::{DiagnosticRequest, DiagnosticResult};

type Lane = Vec<(usize, DiagnosticRequest)>;
type Outcome = Result<DiagnosticResult, DiagnosticError>;

impl DiagnosticEngine {
    /// One entry per request, in input order. A failed request never affects
    /// its siblings.
    pub async fn diagnose_batch(&self, requests: Vec<DiagnosticRequest>) -> Vec<Outcome> {
        let total = requests.len();
        if total == 0 {
            return Vec::new();
        }

        let max_concurrency = self.config().max_concurrency.max(1);
        let lanes = plan_lanes(requests, self.has_store());
        tracing::info!(
            requests = total,
            lanes = lanes.len(),
            max_concurrency,
            "batch diagnosis started"
        );

        let semaphore = Arc::new(Semaphore::new(max_concurrency));
        let mut join_set = JoinSet::new();
        for lane in lanes {
            let engine = self.clone();
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move { run_lane(engine, semaphore, lane).await });
        }

        let mut results: Vec<Option<Outcome>> = (0..total).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcomes) => {
                    for (index, outcome) in outcomes {
                        results[index] = Some(outcome);
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "batch lane task failed");
                }
            }
        }

        let results: Vec<Outcome> = results
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(DiagnosticError::Internal(
                        "diagnosis task did not complete".to_string(),
                    ))
                })
            })
            .collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        tracing::info!(
            requests = total,
            succeeded = total - failed,
            failed,
            "batch diagnosis finished"
        );
        results
    }
}

fn plan_lanes(requests: Vec<DiagnosticRequest>, serialize_per_student: bool) -> Vec<Lane> {
    if !serialize_per_student {
        return requests
            .into_iter()
            .enumerate()
            .map(|entry| vec![entry])
            .collect();
    }

    let mut lanes: Vec<Lane> = Vec::new();
    let mut by_student: HashMap<String, usize> = HashMap::new();
    for (index, request) in requests.into_iter().enumerate() {
        match by_student.get(&request.student_id) {
            Some(&lane) => lanes[lane].push((index, request)),
            None => {
                by_student.insert(request.student_id.clone(), lanes.len());
                lanes.push(vec![(index, request)]);
            }
        }
    }
    lanes
}

async fn run_lane(
    engine: DiagnosticEngine,
    semaphore: Arc<Semaphore>,
    lane: Lane,
) -> Vec<(usize, Outcome)> {
    let mut outcomes = Vec::with_capacity(lane.len());
    for (index, request) in lane {
        let _permit = match semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                outcomes.push((
                    index,
                    Err(DiagnosticError::Internal("batch scheduler closed".to_string())),
                ));
                continue;
            }
        };

        let outcome = AssertUnwindSafe(engine.diagnose(&request))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    student_id = %request.student_id,
                    index,
                    panic = %message,
                    "diagnosis panicked"
                );
                Err(DiagnosticError::Internal(format!("diagnosis panicked: {message}")))
            });

        if let Err(err) = &outcome {
            tracing::warn!(
                student_id = %request.student_id,
                index,
                code = err.code(),
                error = %err,
                "diagnosis failed"
            );
        }
        outcomes.push((index, outcome));
    }
    outcomes
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
