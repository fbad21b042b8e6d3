//! Core domain model for the household service matcher.

use std::fmt;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "servmatch-core";

/// Reason recorded for rejected requests persisted before reasons were stored.
pub const LEGACY_REJECTION_REASON: &str = "no reason recorded";

/// A service type offered by the marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Work {
    pub id: u32,
    pub name: String,
    #[serde(rename = "timeMinutes")]
    pub duration_minutes: u32,
    pub price: f64,
}

impl Work {
    pub fn new(id: u32, name: impl Into<String>, duration_minutes: u32, price: f64) -> Self {
        Self {
            id,
            name: name.into(),
            duration_minutes,
            price,
        }
    }

    /// Catalog names are unique, so the name is the work's identity.
    pub fn same_as(&self, other: &Work) -> bool {
        self.name == other.name
    }
}

/// Shared handle to a catalog entry. Entities never hold their own copy of a work.
pub type WorkRef = Arc<Work>;

/// Immutable, insertion-ordered set of works keyed by name.
#[derive(Debug, Clone, Default)]
pub struct WorkCatalog {
    works: Vec<WorkRef>,
}

impl WorkCatalog {
    /// Builds a catalog, keeping the first work for each name.
    /// Returns the catalog and the names of any ignored duplicates.
    pub fn from_works(works: impl IntoIterator<Item = Work>) -> (Self, Vec<String>) {
        let mut catalog = Self::default();
        let mut duplicates = Vec::new();
        for work in works {
            if catalog.get(&work.name).is_some() {
                duplicates.push(work.name);
            } else {
                catalog.works.push(Arc::new(work));
            }
        }
        (catalog, duplicates)
    }

    pub fn all_works(&self) -> &[WorkRef] {
        &self.works
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.works.iter().map(|w| w.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<WorkRef> {
        self.works.iter().find(|w| w.name == name).cloned()
    }

    pub fn resolve(&self, name: &str, owner: &str) -> Result<WorkRef, RecordError> {
        self.get(name).ok_or_else(|| RecordError::UnknownWork {
            name: name.to_string(),
            owner: owner.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.works.len()
    }

    pub fn is_empty(&self) -> bool {
        self.works.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Gender::Male => "M",
            Gender::Female => "F",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GenderPreference {
    #[default]
    #[serde(rename = "NP")]
    NoPreference,
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl GenderPreference {
    pub fn admits(&self, gender: Gender) -> bool {
        match self {
            GenderPreference::NoPreference => true,
            GenderPreference::Male => gender == Gender::Male,
            GenderPreference::Female => gender == Gender::Female,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Plan {
    #[default]
    #[serde(rename = "Basic", alias = "BASIC", alias = "basic")]
    Basic,
    #[serde(rename = "Intermediate", alias = "INTERMEDIATE", alias = "intermediate")]
    Intermediate,
    #[serde(rename = "Premium", alias = "PREMIUM", alias = "premium")]
    Premium,
}

impl Plan {
    pub fn discount(&self) -> f64 {
        match self {
            Plan::Basic => 0.0,
            Plan::Intermediate => 0.10,
            Plan::Premium => 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    #[serde(rename = "Immediate", alias = "IMMEDIATE")]
    Immediate,
    #[serde(rename = "Scheduled", alias = "Scheduling", alias = "SCHEDULED")]
    Scheduled,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestKind::Immediate => "Immediate",
            RequestKind::Scheduled => "Scheduled",
        })
    }
}

/// Request lifecycle. Persisted as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum RequestStatus {
    Pending,
    Assigned,
    Rejected,
    Completed,
}

impl RequestStatus {
    pub fn code(&self) -> i8 {
        match self {
            RequestStatus::Pending => 0,
            RequestStatus::Assigned => 1,
            RequestStatus::Rejected => -1,
            RequestStatus::Completed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Rejected | RequestStatus::Completed)
    }

    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        matches!(
            (self, next),
            (RequestStatus::Pending, RequestStatus::Assigned)
                | (RequestStatus::Pending, RequestStatus::Rejected)
                | (RequestStatus::Assigned, RequestStatus::Completed)
        )
    }
}

impl From<RequestStatus> for i8 {
    fn from(status: RequestStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i8> for RequestStatus {
    type Error = RecordError;

    fn try_from(code: i8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(RequestStatus::Pending),
            1 => Ok(RequestStatus::Assigned),
            -1 => Ok(RequestStatus::Rejected),
            2 => Ok(RequestStatus::Completed),
            other => Err(RecordError::UnknownStatus(other)),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Assigned => "ASSIGNED",
            RequestStatus::Rejected => "REJECTED",
            RequestStatus::Completed => "COMPLETED",
        })
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("unknown work `{name}` referenced by {owner}")]
    UnknownWork { name: String, owner: String },
    #[error("unknown request status code {0}")]
    UnknownStatus(i8),
    #[error("request {0} has no requested works")]
    NoRequestedWorks(u32),
    #[error("request {id} is {status} but lists no assigned workers")]
    MissingAssignment { id: u32, status: RequestStatus },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("request {id} cannot move from {from} to {to}")]
    Illegal {
        id: u32,
        from: RequestStatus,
        to: RequestStatus,
    },
    #[error("request {0} cannot be assigned without workers")]
    NoWorkers(u32),
    #[error("request {0} cannot be rejected without a reason")]
    MissingReason(u32),
}

/// A worker registered with the marketplace.
#[derive(Debug, Clone, PartialEq)]
pub struct Worker {
    pub id: String,
    pub credential: String,
    pub name: String,
    pub gender: Gender,
    pub locality: String,
    pub capable_works: Vec<WorkRef>,
    pub available: bool,
    pub bookings: Vec<u32>,
}

impl Worker {
    pub fn can_perform(&self, work: &Work) -> bool {
        self.capable_works.iter().any(|w| w.same_as(work))
    }

    /// Number of capable works that also appear in `requested`.
    pub fn matching_count(&self, requested: &[WorkRef]) -> usize {
        self.capable_works
            .iter()
            .filter(|capable| requested.iter().any(|r| r.same_as(capable)))
            .count()
    }

    pub fn add_booking(&mut self, request_id: u32) {
        self.bookings.push(request_id);
    }

    pub fn has_booking(&self, request_id: u32) -> bool {
        self.bookings.contains(&request_id)
    }

    pub fn capable_work_names(&self) -> Vec<String> {
        self.capable_works.iter().map(|w| w.name.clone()).collect()
    }

    pub fn from_record(record: WorkerRecord, catalog: &WorkCatalog) -> Result<Self, RecordError> {
        let owner = format!("worker {}", record.worker_id);
        let capable_works = record
            .capable_works
            .iter()
            .map(|name| catalog.resolve(name, &owner))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            id: record.worker_id,
            credential: record.credential,
            name: record.name,
            gender: record.gender,
            locality: record.area,
            capable_works,
            available: record.is_available,
            bookings: record.bookings,
        })
    }

    pub fn to_record(&self) -> WorkerRecord {
        WorkerRecord {
            worker_id: self.id.clone(),
            credential: self.credential.clone(),
            name: self.name.clone(),
            gender: self.gender,
            area: self.locality.clone(),
            is_available: self.available,
            capable_works: self.capable_work_names(),
            bookings: self.bookings.clone(),
        }
    }
}

/// Persisted worker shape; works are referenced by catalog name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    pub worker_id: String,
    #[serde(rename = "workerPass", alias = "credential")]
    pub credential: String,
    pub name: String,
    pub gender: Gender,
    pub area: String,
    pub is_available: bool,
    #[serde(default)]
    pub capable_works: Vec<String>,
    #[serde(default)]
    pub bookings: Vec<u32>,
}

/// When and for how long the requested work runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSlot {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Everything a successful assignment writes onto a request.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentOutcome {
    pub slot: WorkSlot,
    pub price: f64,
    pub worker_ids: Vec<String>,
}

/// A customer's request for one or more works.
///
/// Status, price, assigned workers and rejection reason only change through
/// [`ServiceRequest::assign`], [`ServiceRequest::reject`] and
/// [`ServiceRequest::complete`], which keeps them consistent with each other.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRequest {
    pub id: u32,
    pub kind: RequestKind,
    pub plan: Plan,
    pub booked_at: NaiveDateTime,
    pub locality: String,
    pub customer_id: String,
    pub customer_gender: String,
    pub address: String,
    pub requested_works: Vec<WorkRef>,
    pub gender_preference: GenderPreference,
    pub scheduled_at: Option<NaiveDateTime>,
    status: RequestStatus,
    work_date: Option<NaiveDate>,
    work_start: Option<NaiveTime>,
    work_end: Option<NaiveTime>,
    price: Option<f64>,
    assigned_worker_ids: Vec<String>,
    rejection_reason: Option<String>,
}

/// Fields a customer supplies when submitting a request.
#[derive(Debug, Clone)]
pub struct NewServiceRequest {
    pub id: u32,
    pub kind: RequestKind,
    pub plan: Plan,
    pub booked_at: NaiveDateTime,
    pub locality: String,
    pub customer_id: String,
    pub customer_gender: String,
    pub address: String,
    pub requested_works: Vec<WorkRef>,
    pub gender_preference: GenderPreference,
    pub scheduled_at: Option<NaiveDateTime>,
}

impl ServiceRequest {
    /// A freshly submitted, pending request.
    pub fn pending(new: NewServiceRequest) -> Result<Self, RecordError> {
        if new.requested_works.is_empty() {
            return Err(RecordError::NoRequestedWorks(new.id));
        }
        Ok(Self {
            id: new.id,
            kind: new.kind,
            plan: new.plan,
            booked_at: new.booked_at,
            locality: new.locality,
            customer_id: new.customer_id,
            customer_gender: new.customer_gender,
            address: new.address,
            requested_works: new.requested_works,
            gender_preference: new.gender_preference,
            scheduled_at: new.scheduled_at,
            status: RequestStatus::Pending,
            work_date: None,
            work_start: None,
            work_end: None,
            price: None,
            assigned_worker_ids: Vec::new(),
            rejection_reason: None,
        })
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn price(&self) -> Option<f64> {
        self.price
    }

    pub fn assigned_worker_ids(&self) -> &[String] {
        &self.assigned_worker_ids
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn work_date(&self) -> Option<NaiveDate> {
        self.work_date
    }

    pub fn work_start(&self) -> Option<NaiveTime> {
        self.work_start
    }

    pub fn work_end(&self) -> Option<NaiveTime> {
        self.work_end
    }

    pub fn requested_work_names(&self) -> Vec<String> {
        self.requested_works.iter().map(|w| w.name.clone()).collect()
    }

    fn check_transition(&self, next: RequestStatus) -> Result<(), TransitionError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError::Illegal {
                id: self.id,
                from: self.status,
                to: next,
            })
        }
    }

    pub fn assign(&mut self, outcome: AssignmentOutcome) -> Result<(), TransitionError> {
        self.check_transition(RequestStatus::Assigned)?;
        if outcome.worker_ids.is_empty() {
            return Err(TransitionError::NoWorkers(self.id));
        }
        self.status = RequestStatus::Assigned;
        self.work_date = Some(outcome.slot.date);
        self.work_start = Some(outcome.slot.start);
        self.work_end = Some(outcome.slot.end);
        self.price = Some(outcome.price);
        self.assigned_worker_ids = outcome.worker_ids;
        Ok(())
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.check_transition(RequestStatus::Rejected)?;
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(TransitionError::MissingReason(self.id));
        }
        self.status = RequestStatus::Rejected;
        self.rejection_reason = Some(reason);
        Ok(())
    }

    /// Marks the job done; the end time becomes the actual finish time.
    pub fn complete(&mut self, finished_at: NaiveTime) -> Result<(), TransitionError> {
        self.check_transition(RequestStatus::Completed)?;
        self.status = RequestStatus::Completed;
        self.work_end = Some(truncate_to_seconds(finished_at));
        Ok(())
    }

    pub fn from_record(record: ServiceRequestRecord, catalog: &WorkCatalog) -> Result<Self, RecordError> {
        let owner = format!("request {}", record.id);
        let requested_works = record
            .requested_services
            .iter()
            .map(|name| catalog.resolve(name, &owner))
            .collect::<Result<Vec<_>, _>>()?;
        if requested_works.is_empty() {
            return Err(RecordError::NoRequestedWorks(record.id));
        }

        let status = record.status;
        let settled = matches!(status, RequestStatus::Assigned | RequestStatus::Completed);
        if settled && record.assigned_worker_ids.is_empty() {
            return Err(RecordError::MissingAssignment {
                id: record.id,
                status,
            });
        }
        let rejection_reason = (status == RequestStatus::Rejected).then(|| {
            record
                .rejection_reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| LEGACY_REJECTION_REASON.to_string())
        });

        let scheduled_at = match (record.scheduled_date, record.scheduled_time) {
            (Some(date), Some(time)) => Some(date.and_time(time)),
            _ => None,
        };

        Ok(Self {
            id: record.id,
            kind: record.kind,
            plan: record.plan,
            booked_at: record.booking_date.and_time(record.booking_time),
            locality: record.locality,
            customer_id: record.customer_id,
            customer_gender: record.customer_gender,
            address: record.address,
            requested_works,
            gender_preference: record.gender_pref,
            scheduled_at,
            status,
            work_date: record.work_date,
            work_start: record.work_start_time,
            work_end: record.work_end_time,
            price: settled.then_some(record.price),
            assigned_worker_ids: if settled {
                record.assigned_worker_ids
            } else {
                Vec::new()
            },
            rejection_reason,
        })
    }

    pub fn to_record(&self) -> ServiceRequestRecord {
        ServiceRequestRecord {
            id: self.id,
            status: self.status,
            kind: self.kind,
            plan: self.plan,
            booking_date: self.booked_at.date(),
            booking_time: self.booked_at.time(),
            locality: self.locality.clone(),
            customer_id: self.customer_id.clone(),
            customer_gender: self.customer_gender.clone(),
            address: self.address.clone(),
            requested_services: self.requested_work_names(),
            gender_pref: self.gender_preference,
            scheduled_date: self.scheduled_at.map(|at| at.date()),
            scheduled_time: self.scheduled_at.map(|at| at.time()),
            work_date: self.work_date,
            work_start_time: self.work_start,
            work_end_time: self.work_end,
            price: self.price.unwrap_or(0.0),
            assigned_worker_ids: self.assigned_worker_ids.clone(),
            rejection_reason: self.rejection_reason.clone(),
        }
    }
}

/// Persisted request shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequestRecord {
    pub id: u32,
    pub status: RequestStatus,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub plan: Plan,
    pub booking_date: NaiveDate,
    pub booking_time: NaiveTime,
    pub locality: String,
    #[serde(rename = "customerID")]
    pub customer_id: String,
    pub customer_gender: String,
    pub address: String,
    pub requested_services: Vec<String>,
    #[serde(default)]
    pub gender_pref: GenderPreference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_start_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_end_time: Option<NaiveTime>,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub assigned_worker_ids: Vec<String>,
    #[serde(default, alias = "reason", skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

/// Adds `minutes` to `start` on a 24-hour clock; seconds are kept.
pub fn end_time(start: NaiveTime, minutes: u32) -> NaiveTime {
    let (end, _wrapped) = start.overflowing_add_signed(Duration::minutes(i64::from(minutes)));
    end
}

pub fn truncate_to_seconds(time: NaiveTime) -> NaiveTime {
    time.with_nanosecond(0).unwrap_or(time)
}

/// Sum of work prices less the plan discount, rounded to cents.
pub fn quote_price(works: &[WorkRef], plan: Plan) -> f64 {
    let total: f64 = works.iter().map(|w| w.price).sum();
    round_cents(total * (1.0 - plan.discount()))
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> WorkCatalog {
        let (catalog, duplicates) = WorkCatalog::from_works([
            Work::new(1, "Sweeping", 30, 200.0),
            Work::new(2, "Mopping", 40, 300.0),
            Work::new(3, "Window Cleaning", 60, 600.0),
        ]);
        assert!(duplicates.is_empty());
        catalog
    }

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn pending_request(catalog: &WorkCatalog) -> ServiceRequest {
        ServiceRequest::pending(NewServiceRequest {
            id: 7,
            kind: RequestKind::Immediate,
            plan: Plan::Intermediate,
            booked_at: NaiveDate::from_ymd_opt(2026, 3, 1)
                .unwrap()
                .and_hms_opt(9, 15, 0)
                .unwrap(),
            locality: "Patamata".into(),
            customer_id: "C1".into(),
            customer_gender: "F".into(),
            address: "12 Canal Rd".into(),
            requested_works: vec![catalog.get("Sweeping").unwrap(), catalog.get("Mopping").unwrap()],
            gender_preference: GenderPreference::NoPreference,
            scheduled_at: None,
        })
        .unwrap()
    }

    #[test]
    fn duplicate_catalog_names_keep_first_entry() {
        let (catalog, duplicates) = WorkCatalog::from_works([
            Work::new(1, "Sweeping", 30, 200.0),
            Work::new(9, "Sweeping", 99, 1.0),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(duplicates, vec!["Sweeping".to_string()]);
        assert_eq!(catalog.get("Sweeping").unwrap().id, 1);
    }

    #[test]
    fn end_time_wraps_past_midnight_and_keeps_seconds() {
        assert_eq!(end_time(hms(23, 50, 0), 70), hms(1, 0, 0));
        assert_eq!(end_time(hms(10, 15, 42), 45), hms(11, 0, 42));
        assert_eq!(end_time(hms(0, 0, 0), 24 * 60), hms(0, 0, 0));
    }

    #[test]
    fn prices_apply_plan_discount() {
        let catalog = catalog();
        let both = vec![catalog.get("Sweeping").unwrap(), catalog.get("Mopping").unwrap()];
        assert_eq!(quote_price(&both, Plan::Basic), 500.0);
        assert_eq!(quote_price(&both, Plan::Intermediate), 450.0);
        let window = vec![catalog.get("Window Cleaning").unwrap()];
        assert_eq!(quote_price(&window, Plan::Premium), 480.0);
    }

    #[test]
    fn gender_preference_filters_only_when_set() {
        assert!(GenderPreference::NoPreference.admits(Gender::Male));
        assert!(GenderPreference::NoPreference.admits(Gender::Female));
        assert!(GenderPreference::Female.admits(Gender::Female));
        assert!(!GenderPreference::Female.admits(Gender::Male));
    }

    #[test]
    fn status_transitions_follow_lifecycle() {
        let catalog = catalog();
        let mut request = pending_request(&catalog);
        let slot = WorkSlot {
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            start: hms(9, 15, 0),
            end: hms(10, 25, 0),
        };

        let err = request.complete(hms(10, 0, 0)).unwrap_err();
        assert!(matches!(err, TransitionError::Illegal { to: RequestStatus::Completed, .. }));

        let no_workers = AssignmentOutcome {
            slot,
            price: 450.0,
            worker_ids: vec![],
        };
        assert_eq!(request.assign(no_workers), Err(TransitionError::NoWorkers(7)));
        assert_eq!(request.status(), RequestStatus::Pending);

        request
            .assign(AssignmentOutcome {
                slot,
                price: 450.0,
                worker_ids: vec!["W1".into()],
            })
            .unwrap();
        assert_eq!(request.status(), RequestStatus::Assigned);
        assert!(request.reject("late").is_err());

        request.complete(hms(10, 5, 0)).unwrap();
        assert_eq!(request.status(), RequestStatus::Completed);
        assert_eq!(request.work_end(), Some(hms(10, 5, 0)));
        assert!(request.status().is_terminal());
    }

    #[test]
    fn reject_requires_reason() {
        let catalog = catalog();
        let mut request = pending_request(&catalog);
        assert_eq!(request.reject("  "), Err(TransitionError::MissingReason(7)));
        request.reject("no workers assigned").unwrap();
        assert_eq!(request.rejection_reason(), Some("no workers assigned"));
        assert_eq!(request.price(), None);
        assert!(request.assigned_worker_ids().is_empty());
    }

    #[test]
    fn request_record_uses_legacy_field_names() {
        let catalog = catalog();
        let mut request = pending_request(&catalog);
        request.reject("No worker available for the following works: Mopping").unwrap();

        let json = serde_json::to_value(request.to_record()).unwrap();
        assert_eq!(json["status"], -1);
        assert_eq!(json["type"], "Immediate");
        assert_eq!(json["plan"], "Intermediate");
        assert_eq!(json["customerID"], "C1");
        assert_eq!(json["genderPref"], "NP");
        assert_eq!(json["bookingTime"], "09:15:00");
        assert_eq!(json["requestedServices"][1], "Mopping");
        assert!(json.get("scheduledDate").is_none());

        let record: ServiceRequestRecord = serde_json::from_value(json).unwrap();
        let restored = ServiceRequest::from_record(record, &catalog).unwrap();
        assert_eq!(restored, request);
    }

    #[test]
    fn legacy_scheduling_type_and_missing_reason_are_accepted() {
        let catalog = catalog();
        let json = serde_json::json!({
            "id": 3, "status": -1, "type": "Scheduling", "plan": "Premium",
            "bookingDate": "2026-02-01", "bookingTime": "08:00:00",
            "locality": "Patamata", "customerID": "C9", "customerGender": "M",
            "address": "x", "requestedServices": ["Window Cleaning"], "genderPref": "F",
            "scheduledDate": "2026-02-03", "scheduledTime": "14:30:00", "price": 0.0,
            "assignedWorkerIds": []
        });
        let record: ServiceRequestRecord = serde_json::from_value(json).unwrap();
        let request = ServiceRequest::from_record(record, &catalog).unwrap();
        assert_eq!(request.kind, RequestKind::Scheduled);
        assert_eq!(request.gender_preference, GenderPreference::Female);
        assert_eq!(request.rejection_reason(), Some(LEGACY_REJECTION_REASON));
        assert_eq!(request.scheduled_at.unwrap().time(), hms(14, 30, 0));
    }

    #[test]
    fn unknown_work_names_fail_to_resolve() {
        let catalog = catalog();
        let record = WorkerRecord {
            worker_id: "W1".into(),
            credential: "secret".into(),
            name: "Ravi".into(),
            gender: Gender::Male,
            area: "Patamata".into(),
            is_available: true,
            capable_works: vec!["Gardening".into()],
            bookings: vec![],
        };
        let err = Worker::from_record(record, &catalog).unwrap_err();
        assert_eq!(
            err,
            RecordError::UnknownWork {
                name: "Gardening".into(),
                owner: "worker W1".into()
            }
        );
    }

    #[test]
    fn unknown_status_code_is_rejected() {
        assert_eq!(RequestStatus::try_from(5), Err(RecordError::UnknownStatus(5)));
        assert_eq!(RequestStatus::try_from(-1), Ok(RequestStatus::Rejected));
    }

    #[test]
    fn worker_record_writes_legacy_password_key() {
        let catalog = catalog();
        let json = serde_json::json!({
            "workerId": "W4", "workerPass": "hunter2", "name": "Latha", "gender": "F",
            "area": "SN Puram", "isAvailable": false, "capableWorks": ["Mopping"], "bookings": [3]
        });
        let record: WorkerRecord = serde_json::from_value(json).unwrap();
        let worker = Worker::from_record(record, &catalog).unwrap();
        assert_eq!(worker.credential, "hunter2");

        let written = serde_json::to_value(worker.to_record()).unwrap();
        assert_eq!(written["workerPass"], "hunter2");
        assert!(written.get("credential").is_none());

        let older = serde_json::json!({
            "workerId": "W5", "credential": "pw", "name": "Ravi", "gender": "M",
            "area": "Patamata", "isAvailable": true
        });
        let record: WorkerRecord = serde_json::from_value(older).unwrap();
        assert_eq!(record.credential, "pw");
    }
}
