//! Immediate and scheduled request processing.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use servmatch_core::{
    end_time, quote_price, truncate_to_seconds, AssignmentOutcome, RecordError, RequestKind, RequestStatus,
    ServiceRequest, TransitionError, WorkRef, WorkSlot, Worker,
};
use servmatch_selection::{Candidate, Selection, SelectionContext, SelectionError, SelectionProvider};
use servmatch_storage::{StorageError, WorkerStore};
use strsim::jaro_winkler;
use thiserror::Error;
use tracing::{info, warn};

use crate::matching::{
    assign_workers, filter_workers, score_workers, sort_by_matching_count, FilterCriteria,
};

pub const UNCOVERED_WORKS_PREFIX: &str = "No worker available for the following works: ";
pub const NO_ELIGIBLE_WORKERS: &str = "no eligible workers for the requested services";
pub const NO_WORKERS_AVAILABLE: &str = "no workers available";
pub const NO_WORKERS_ASSIGNED: &str = "no workers assigned";
pub const MISSING_SCHEDULE: &str = "scheduled request has no scheduled date/time";

/// Minimum similarity for suggesting a candidate id after a typo.
const SUGGESTION_THRESHOLD: f64 = 0.85;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request {id} is {status}; only pending requests can be processed")]
    NotPending { id: u32, status: RequestStatus },
    #[error("request {id} is {actual} but was handed to the {expected} protocol")]
    WrongKind {
        id: u32,
        expected: RequestKind,
        actual: RequestKind,
    },
    #[error("request {0} not found")]
    RequestNotFound(u32),
    #[error("worker {0} not found")]
    WorkerNotFound(String),
    #[error("worker {worker_id} holds no booking for request {request_id}")]
    NotBooked { worker_id: String, request_id: u32 },
    #[error("`{0}` is not a configured service area")]
    UnknownArea(String),
    #[error("worker {0} must keep at least one capable work")]
    NoCapableWorks(String),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
}

/// Result of processing one request, as recorded in batch summaries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestOutcome {
    pub request_id: u32,
    pub kind: RequestKind,
    pub status: RequestStatus,
    pub reason: Option<String>,
    pub assigned_worker_ids: Vec<String>,
    pub price: Option<f64>,
    pub work_date: Option<NaiveDate>,
    pub work_start: Option<NaiveTime>,
    pub work_end: Option<NaiveTime>,
}

impl RequestOutcome {
    pub fn of(request: &ServiceRequest) -> Self {
        Self {
            request_id: request.id,
            kind: request.kind,
            status: request.status(),
            reason: request.rejection_reason().map(str::to_string),
            assigned_worker_ids: request.assigned_worker_ids().to_vec(),
            price: request.price(),
            work_date: request.work_date(),
            work_start: request.work_start(),
            work_end: request.work_end(),
        }
    }
}

pub fn uncovered_reason(uncovered: &[WorkRef]) -> String {
    let names: Vec<&str> = uncovered.iter().map(|w| w.name.as_str()).collect();
    format!("{UNCOVERED_WORKS_PREFIX}{}", names.join(", "))
}

/// Drives a pending request to ASSIGNED or REJECTED. Workers that receive
/// work are persisted immediately; the request itself is only mutated in
/// memory and saved by the caller.
pub struct RequestProcessor {
    worker_store: Arc<dyn WorkerStore>,
}

impl RequestProcessor {
    pub fn new(worker_store: Arc<dyn WorkerStore>) -> Self {
        Self { worker_store }
    }

    pub async fn process(
        &self,
        request: &mut ServiceRequest,
        workers: &mut [Worker],
        now: NaiveDateTime,
        selector: &mut dyn SelectionProvider,
    ) -> Result<RequestOutcome, DispatchError> {
        match request.kind {
            RequestKind::Immediate => self.process_immediate(request, workers, now).await,
            RequestKind::Scheduled => self.process_scheduled(request, workers, selector).await,
        }
    }

    pub async fn process_immediate(
        &self,
        request: &mut ServiceRequest,
        workers: &mut [Worker],
        now: NaiveDateTime,
    ) -> Result<RequestOutcome, DispatchError> {
        ensure_processable(request, RequestKind::Immediate)?;

        let (assigned_ids, longest, uncovered) = {
            let criteria = FilterCriteria::for_request(request, true);
            let eligible = filter_workers(workers, &criteria);
            let assignment = assign_workers(&request.requested_works, &eligible);
            (
                assignment.worker_ids(),
                assignment.longest_duration_minutes(),
                assignment.uncovered(&request.requested_works),
            )
        };

        if !uncovered.is_empty() {
            let reason = uncovered_reason(&uncovered);
            info!(request_id = request.id, %reason, "immediate request rejected");
            request.reject(reason)?;
            return Ok(RequestOutcome::of(request));
        }

        let start = truncate_to_seconds(now.time());
        for worker_id in &assigned_ids {
            let worker = find_worker_mut(workers, worker_id)?;
            worker.available = false;
            worker.add_booking(request.id);
            self.worker_store.update(worker).await?;
        }

        request.assign(AssignmentOutcome {
            slot: WorkSlot {
                date: now.date(),
                start,
                end: end_time(start, longest),
            },
            price: quote_price(&request.requested_works, request.plan),
            worker_ids: assigned_ids,
        })?;
        info!(
            request_id = request.id,
            workers = ?request.assigned_worker_ids(),
            price = request.price(),
            "immediate request assigned"
        );
        Ok(RequestOutcome::of(request))
    }

    pub async fn process_scheduled(
        &self,
        request: &mut ServiceRequest,
        workers: &mut [Worker],
        selector: &mut dyn SelectionProvider,
    ) -> Result<RequestOutcome, DispatchError> {
        ensure_processable(request, RequestKind::Scheduled)?;

        let Some(scheduled_at) = request.scheduled_at else {
            return reject(request, MISSING_SCHEDULE);
        };

        let plan = {
            let criteria = FilterCriteria::for_request(request, false);
            let eligible = filter_workers(workers, &criteria);
            let mut scored = score_workers(&eligible, &request.requested_works);
            sort_by_matching_count(&mut scored);

            if scored.is_empty() {
                return reject(request, NO_ELIGIBLE_WORKERS);
            }

            let candidates: Vec<Candidate> = scored
                .iter()
                .map(|s| Candidate {
                    worker_id: s.worker.id.clone(),
                    gender: s.worker.gender,
                    capable_works: s.worker.capable_work_names(),
                    matching_count: s.matching_count,
                })
                .collect();
            let context = SelectionContext {
                request_id: request.id,
                customer_id: request.customer_id.clone(),
                requested_works: request.requested_work_names(),
            };

            let typed = match selector.prompt(&context, &candidates)? {
                Selection::Unavailable => return reject(request, NO_WORKERS_AVAILABLE),
                Selection::Workers(ids) => ids,
            };
            let ranked: Vec<&Worker> = scored.iter().map(|s| s.worker).collect();
            let selected = resolve_selection(request.id, &typed, &ranked);
            if selected.is_empty() {
                return reject(request, NO_WORKERS_ASSIGNED);
            }

            let assignment = assign_workers(&request.requested_works, &selected);
            let uncovered = assignment.uncovered(&request.requested_works);
            if !uncovered.is_empty() {
                let reason = uncovered_reason(&uncovered);
                info!(request_id = request.id, %reason, "scheduled request rejected");
                request.reject(reason)?;
                return Ok(RequestOutcome::of(request));
            }

            ScheduledPlan {
                selected_ids: selected.iter().map(|w| w.id.clone()).collect(),
                working_ids: assignment.worker_ids(),
                longest: assignment.longest_duration_minutes(),
            }
        };

        let start = scheduled_at.time();
        request.assign(AssignmentOutcome {
            slot: WorkSlot {
                date: scheduled_at.date(),
                start,
                end: end_time(start, plan.longest),
            },
            price: quote_price(&request.requested_works, request.plan),
            // Every selected worker is listed, including any the greedy pass gave no work.
            worker_ids: plan.selected_ids,
        })?;

        // Scheduled work leaves availability untouched.
        for worker_id in &plan.working_ids {
            let worker = find_worker_mut(workers, worker_id)?;
            worker.add_booking(request.id);
            self.worker_store.update(worker).await?;
        }

        info!(
            request_id = request.id,
            workers = ?request.assigned_worker_ids(),
            booked = ?plan.working_ids,
            price = request.price(),
            "scheduled request assigned"
        );
        Ok(RequestOutcome::of(request))
    }
}

struct ScheduledPlan {
    selected_ids: Vec<String>,
    working_ids: Vec<String>,
    longest: u32,
}

fn ensure_processable(request: &ServiceRequest, expected: RequestKind) -> Result<(), DispatchError> {
    if request.status() != RequestStatus::Pending {
        return Err(DispatchError::NotPending {
            id: request.id,
            status: request.status(),
        });
    }
    if request.kind != expected {
        return Err(DispatchError::WrongKind {
            id: request.id,
            expected,
            actual: request.kind,
        });
    }
    Ok(())
}

fn reject(request: &mut ServiceRequest, reason: &str) -> Result<RequestOutcome, DispatchError> {
    info!(request_id = request.id, reason, "request rejected");
    request.reject(reason)?;
    Ok(RequestOutcome::of(request))
}

fn find_worker_mut<'w>(workers: &'w mut [Worker], worker_id: &str) -> Result<&'w mut Worker, DispatchError> {
    workers
        .iter_mut()
        .find(|w| w.id == worker_id)
        .ok_or_else(|| DispatchError::WorkerNotFound(worker_id.to_string()))
}

/// Maps typed ids onto ranked candidates. Unknown ids are dropped with a
/// warning; repeats keep their first position.
pub fn resolve_selection<'a>(request_id: u32, typed: &[String], ranked: &[&'a Worker]) -> Vec<&'a Worker> {
    let mut selected: Vec<&'a Worker> = Vec::new();
    for id in typed {
        match ranked.iter().copied().find(|w| &w.id == id) {
            Some(worker) if selected.iter().any(|s| s.id == worker.id) => {}
            Some(worker) => selected.push(worker),
            None => match closest_candidate(id, ranked) {
                Some(suggestion) => {
                    warn!(request_id, worker_id = %id, %suggestion, "invalid worker id ignored")
                }
                None => warn!(request_id, worker_id = %id, "invalid worker id ignored"),
            },
        }
    }
    selected
}

fn closest_candidate<'a>(typed: &str, ranked: &[&'a Worker]) -> Option<&'a str> {
    ranked
        .iter()
        .map(|w| (w.id.as_str(), jaro_winkler(typed, &w.id)))
        .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use servmatch_core::{Gender, Work, WorkCatalog};

    fn worker(id: &str) -> Worker {
        let (catalog, _) = WorkCatalog::from_works([Work::new(1, "Sweeping", 30, 200.0)]);
        Worker {
            id: id.into(),
            credential: String::new(),
            name: id.into(),
            gender: Gender::Male,
            locality: "Patamata".into(),
            capable_works: catalog.all_works().to_vec(),
            available: true,
            bookings: vec![],
        }
    }

    #[test]
    fn selection_drops_unknown_and_repeated_ids() {
        let workers = vec![worker("W10"), worker("W11"), worker("W12")];
        let ranked: Vec<&Worker> = workers.iter().collect();
        let typed: Vec<String> = ["W12", "W1O", "W10", "W12", "ZZ"].iter().map(|s| s.to_string()).collect();

        let selected = resolve_selection(1, &typed, &ranked);
        let ids: Vec<&str> = selected.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["W12", "W10"]);
    }

    #[test]
    fn close_typos_get_a_suggestion() {
        let workers = vec![worker("W10"), worker("WORKER-77")];
        let ranked: Vec<&Worker> = workers.iter().collect();
        assert_eq!(closest_candidate("WORKER-78", &ranked), Some("WORKER-77"));
        assert_eq!(closest_candidate("QQQ", &ranked), None);
    }
}
