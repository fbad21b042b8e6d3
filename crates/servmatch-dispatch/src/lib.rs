//! Worker and request matching engine: filtering, greedy assignment, the
//! immediate and scheduled protocols, and the batch run that drives them.

pub mod matching;
pub mod protocol;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use servmatch_core::{RequestStatus, ServiceRequest, WorkCatalog, WorkRef, Worker};
use servmatch_selection::SelectionProvider;
use servmatch_storage::{
    load_catalog, DataLayout, JsonRequestStore, JsonWorkerStore, RequestStore, WorkerStore,
};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub use matching::{
    assign_workers, filter_by_availability, filter_by_gender, filter_by_locality, filter_by_skills,
    filter_workers, score_workers, sort_by_matching_count, FilterCriteria, ScoredWorker,
    WorkAssignment,
};
pub use protocol::{
    resolve_selection, uncovered_reason, DispatchError, RequestOutcome, RequestProcessor,
    MISSING_SCHEDULE, NO_ELIGIBLE_WORKERS, NO_WORKERS_ASSIGNED, NO_WORKERS_AVAILABLE,
    UNCOVERED_WORKS_PREFIX,
};

pub const CRATE_NAME: &str = "servmatch-dispatch";

pub const DEFAULT_SERVICE_AREAS: [&str; 6] = [
    "Moghalrajpuram",
    "Bhavanipuram",
    "Patamata",
    "Gayatri Nagar",
    "Benz Circle",
    "SN Puram",
];

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub data_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub write_reports: bool,
    pub workspace_root: PathBuf,
}

impl DispatchConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("SERVMATCH_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            reports_dir: std::env::var("SERVMATCH_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./reports")),
            write_reports: std::env::var("SERVMATCH_WRITE_REPORTS")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(true),
            workspace_root: std::env::var("SERVMATCH_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

/// Optional `servmatch.yaml` settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSettings {
    #[serde(default = "default_service_areas")]
    pub service_areas: Vec<String>,
}

fn default_service_areas() -> Vec<String> {
    DEFAULT_SERVICE_AREAS.iter().map(|a| a.to_string()).collect()
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            service_areas: default_service_areas(),
        }
    }
}

impl DispatchSettings {
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let path = workspace_root.join("servmatch.yaml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn is_known_area(&self, area: &str) -> bool {
        self.service_areas.iter().any(|a| a == area)
    }
}

/// Source of the processing timestamp for immediate requests and completions.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub fn local_clock() -> Clock {
    Arc::new(|| Local::now().naive_local())
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<RequestOutcome>,
    /// False when the empty-collection guard skipped the final write.
    pub saved: bool,
}

impl BatchSummary {
    pub fn processed_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn assigned_count(&self) -> usize {
        self.count_status(RequestStatus::Assigned)
    }

    pub fn rejected_count(&self) -> usize {
        self.count_status(RequestStatus::Rejected)
    }

    fn count_status(&self, status: RequestStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Requests booked to `worker` that are still assigned.
pub fn ongoing_bookings<'a>(worker: &Worker, requests: &'a [ServiceRequest]) -> Vec<&'a ServiceRequest> {
    bookings_with_status(worker, requests, RequestStatus::Assigned)
}

/// Requests booked to `worker` that have been completed.
pub fn booking_history<'a>(worker: &Worker, requests: &'a [ServiceRequest]) -> Vec<&'a ServiceRequest> {
    bookings_with_status(worker, requests, RequestStatus::Completed)
}

fn bookings_with_status<'a>(
    worker: &Worker,
    requests: &'a [ServiceRequest],
    status: RequestStatus,
) -> Vec<&'a ServiceRequest> {
    requests
        .iter()
        .filter(|r| worker.has_booking(r.id) && r.status() == status)
        .collect()
}

pub struct Dispatcher {
    worker_store: Arc<dyn WorkerStore>,
    request_store: Arc<dyn RequestStore>,
    processor: RequestProcessor,
    settings: DispatchSettings,
    clock: Clock,
}

impl Dispatcher {
    pub fn new(worker_store: Arc<dyn WorkerStore>, request_store: Arc<dyn RequestStore>) -> Self {
        Self {
            processor: RequestProcessor::new(worker_store.clone()),
            worker_store,
            request_store,
            settings: DispatchSettings::default(),
            clock: local_clock(),
        }
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Processes every pending request in load order, then writes the whole
    /// request collection once. Workers are persisted as they are booked.
    pub async fn process_all_pending(
        &self,
        catalog: &WorkCatalog,
        selector: &mut dyn SelectionProvider,
    ) -> Result<BatchSummary, DispatchError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("dispatch_batch", %run_id);

        async {
            let mut workers = self.worker_store.load_all(catalog).await?;
            let mut requests = self.request_store.load_all(catalog).await?;
            for worker in workers.iter().filter(|w| !self.settings.is_known_area(&w.locality)) {
                warn!(worker_id = %worker.id, area = %worker.locality, "worker area is not a configured service area");
            }

            let mut outcomes = Vec::new();
            for request in requests
                .iter_mut()
                .filter(|r| r.status() == RequestStatus::Pending)
            {
                if !self.settings.is_known_area(&request.locality) {
                    warn!(request_id = request.id, area = %request.locality, "request area is not a configured service area");
                }
                let request_span = info_span!("process_request", request_id = request.id, kind = %request.kind);
                let now = (self.clock)();
                let outcome = self
                    .processor
                    .process(request, &mut workers, now, selector)
                    .instrument(request_span)
                    .await?;
                outcomes.push(outcome);
            }

            let saved = if requests.is_empty() {
                warn!("refusing to overwrite the request store with an empty collection");
                false
            } else {
                self.request_store.save_all(&requests).await?;
                true
            };

            let summary = BatchSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                outcomes,
                saved,
            };
            info!(
                processed = summary.processed_count(),
                assigned = summary.assigned_count(),
                rejected = summary.rejected_count(),
                "dispatch batch finished"
            );
            Ok::<_, DispatchError>(summary)
        }
        .instrument(span)
        .await
    }

    /// A worker reports an assigned job done: the request becomes COMPLETED
    /// and the worker is available again.
    pub async fn complete_request(
        &self,
        catalog: &WorkCatalog,
        request_id: u32,
        worker_id: &str,
        now: NaiveDateTime,
    ) -> Result<ServiceRequest, DispatchError> {
        let mut request = self
            .request_store
            .find_by_id(request_id, catalog)
            .await?
            .ok_or(DispatchError::RequestNotFound(request_id))?;
        let mut worker = self
            .worker_store
            .find_by_id(worker_id, catalog)
            .await?
            .ok_or_else(|| DispatchError::WorkerNotFound(worker_id.to_string()))?;
        if !worker.has_booking(request_id) {
            return Err(DispatchError::NotBooked {
                worker_id: worker_id.to_string(),
                request_id,
            });
        }

        request.complete(now.time())?;
        self.request_store.update(&request).await?;
        worker.available = true;
        self.worker_store.update(&worker).await?;
        info!(request_id, worker_id, "request completed");
        Ok(request)
    }

    pub fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    pub async fn pending_requests(&self, catalog: &WorkCatalog) -> Result<Vec<ServiceRequest>, DispatchError> {
        Ok(self
            .request_store
            .find_by_status(RequestStatus::Pending, catalog)
            .await?)
    }

    pub async fn worker_bookings(
        &self,
        catalog: &WorkCatalog,
        worker_id: &str,
        history: bool,
    ) -> Result<Vec<ServiceRequest>, DispatchError> {
        let worker = self
            .worker_store
            .find_by_id(worker_id, catalog)
            .await?
            .ok_or_else(|| DispatchError::WorkerNotFound(worker_id.to_string()))?;
        let requests = self.request_store.load_all(catalog).await?;
        let selected = if history {
            booking_history(&worker, &requests)
        } else {
            ongoing_bookings(&worker, &requests)
        };
        Ok(selected.into_iter().cloned().collect())
    }

    /// Takes a worker in or out of the immediate pool.
    pub async fn set_availability(
        &self,
        catalog: &WorkCatalog,
        worker_id: &str,
        available: bool,
    ) -> Result<Worker, DispatchError> {
        let mut worker = self.load_worker(catalog, worker_id).await?;
        worker.available = available;
        self.worker_store.update(&worker).await?;
        info!(worker_id, available, "worker availability updated");
        Ok(worker)
    }

    /// Applies a worker's profile edit. A new area must be a configured
    /// service area; a new work list replaces the old one and may not be empty.
    pub async fn update_profile(
        &self,
        catalog: &WorkCatalog,
        worker_id: &str,
        edit: ProfileEdit,
    ) -> Result<Worker, DispatchError> {
        let mut worker = self.load_worker(catalog, worker_id).await?;

        if let Some(locality) = edit.locality {
            if !self.settings.is_known_area(&locality) {
                return Err(DispatchError::UnknownArea(locality));
            }
            worker.locality = locality;
        }

        if let Some(names) = edit.capable_works {
            let owner = format!("worker {worker_id}");
            let mut works: Vec<WorkRef> = Vec::new();
            for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
                let work = catalog.resolve(name, &owner)?;
                if !works.iter().any(|w| w.same_as(&work)) {
                    works.push(work);
                }
            }
            if works.is_empty() {
                return Err(DispatchError::NoCapableWorks(worker_id.to_string()));
            }
            worker.capable_works = works;
        }

        self.worker_store.update(&worker).await?;
        info!(
            worker_id,
            area = %worker.locality,
            works = ?worker.capable_work_names(),
            "worker profile updated"
        );
        Ok(worker)
    }

    async fn load_worker(&self, catalog: &WorkCatalog, worker_id: &str) -> Result<Worker, DispatchError> {
        self.worker_store
            .find_by_id(worker_id, catalog)
            .await?
            .ok_or_else(|| DispatchError::WorkerNotFound(worker_id.to_string()))
    }
}

/// Fields a worker may change on their own profile; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileEdit {
    pub locality: Option<String>,
    pub capable_works: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct BatchRun {
    pub summary: BatchSummary,
    pub reports_dir: Option<PathBuf>,
}

/// File-backed dispatcher built from [`DispatchConfig`].
pub struct DispatchPipeline {
    config: DispatchConfig,
    catalog: WorkCatalog,
    dispatcher: Dispatcher,
}

impl DispatchPipeline {
    pub async fn open(config: DispatchConfig) -> Result<Self> {
        let layout = DataLayout::new(config.data_dir.clone());
        let catalog = load_catalog(layout.catalog_path())
            .await
            .context("loading work catalog")?;
        let settings = DispatchSettings::load(&config.workspace_root)?;
        let dispatcher = Dispatcher::new(
            Arc::new(JsonWorkerStore::new(layout.workers_path())),
            Arc::new(JsonRequestStore::new(layout.services_path())),
        )
        .with_settings(settings);
        info!(
            data_dir = %layout.root().display(),
            works = catalog.len(),
            "dispatch pipeline ready"
        );
        Ok(Self {
            config,
            catalog,
            dispatcher,
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.dispatcher = self.dispatcher.with_clock(clock);
        self
    }

    pub fn catalog(&self) -> &WorkCatalog {
        &self.catalog
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn run_once(&self, selector: &mut dyn SelectionProvider) -> Result<BatchRun> {
        let summary = self
            .dispatcher
            .process_all_pending(&self.catalog, selector)
            .await
            .context("processing pending requests")?;
        let reports_dir = if self.config.write_reports {
            Some(write_reports(&self.config.reports_dir, &summary).await?)
        } else {
            None
        };
        Ok(BatchRun {
            summary,
            reports_dir,
        })
    }

    pub async fn complete(&self, request_id: u32, worker_id: &str) -> Result<ServiceRequest> {
        self.dispatcher
            .complete_request(&self.catalog, request_id, worker_id, self.dispatcher.now())
            .await
            .with_context(|| format!("completing request {request_id} for worker {worker_id}"))
    }

    pub async fn pending(&self) -> Result<Vec<ServiceRequest>> {
        Ok(self.dispatcher.pending_requests(&self.catalog).await?)
    }

    pub async fn set_availability(&self, worker_id: &str, available: bool) -> Result<Worker> {
        self.dispatcher
            .set_availability(&self.catalog, worker_id, available)
            .await
            .with_context(|| format!("updating availability of worker {worker_id}"))
    }

    pub async fn update_profile(&self, worker_id: &str, edit: ProfileEdit) -> Result<Worker> {
        self.dispatcher
            .update_profile(&self.catalog, worker_id, edit)
            .await
            .with_context(|| format!("editing worker {worker_id}"))
    }

    pub async fn bookings(&self, worker_id: &str, history: bool) -> Result<Vec<ServiceRequest>> {
        Ok(self
            .dispatcher
            .worker_bookings(&self.catalog, worker_id, history)
            .await?)
    }
}

pub async fn run_once_from_env(selector: &mut dyn SelectionProvider) -> Result<BatchRun> {
    let pipeline = DispatchPipeline::open(DispatchConfig::from_env()).await?;
    pipeline.run_once(selector).await
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportManifest {
    pub schema_version: u32,
    pub files: Vec<ReportManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Writes `<root>/<run_id>/{batch_summary.json, brief.md, manifest.json}`.
pub async fn write_reports(reports_root: &Path, summary: &BatchSummary) -> Result<PathBuf> {
    let run_dir = reports_root.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let summary_json = serde_json::to_vec_pretty(summary).context("serializing batch summary")?;
    fs::write(run_dir.join("batch_summary.json"), &summary_json)
        .await
        .context("writing batch_summary.json")?;

    let brief = render_brief(summary);
    fs::write(run_dir.join("brief.md"), brief.as_bytes())
        .await
        .context("writing brief.md")?;

    let manifest = ReportManifest {
        schema_version: 1,
        files: vec![
            manifest_entry("batch_summary", "batch_summary.json", &summary_json),
            manifest_entry("brief", "brief.md", brief.as_bytes()),
        ],
    };
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing report manifest")?;
    fs::write(run_dir.join("manifest.json"), bytes)
        .await
        .context("writing manifest.json")?;
    Ok(run_dir)
}

fn manifest_entry(name: &str, path: &str, bytes: &[u8]) -> ReportManifestFile {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    ReportManifestFile {
        name: name.to_string(),
        path: path.to_string(),
        sha256: hex::encode(hasher.finalize()),
        bytes: bytes.len() as u64,
    }
}

fn render_brief(summary: &BatchSummary) -> String {
    let rows = summary
        .outcomes
        .iter()
        .map(|o| {
            let detail = match (&o.reason, o.price) {
                (Some(reason), _) => reason.clone(),
                (None, Some(price)) => format!("{} for {price:.2}", o.assigned_worker_ids.join(", ")),
                (None, None) => String::new(),
            };
            format!("- #{} ({}) {}: {}", o.request_id, o.kind, o.status, detail)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "# Dispatch Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Processed: {}\n- Assigned: {}\n- Rejected: {}\n- Saved: {}\n\n## Requests\n{}\n",
        summary.run_id,
        summary.started_at,
        summary.finished_at,
        summary.processed_count(),
        summary.assigned_count(),
        summary.rejected_count(),
        summary.saved,
        rows
    )
}

/// Markdown digest of the most recent `runs` report directories.
pub fn report_recent(runs: usize, reports_root: &Path) -> Result<String> {
    let mut dirs = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();

    let mut lines = vec!["# Dispatch Runs".to_string(), String::new()];
    for dir in dirs.into_iter().take(runs.max(1)) {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let summary_path = dir.path().join("batch_summary.json");
        let value: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&summary_path)
                .with_context(|| format!("reading {}", summary_path.display()))?,
        )
        .with_context(|| format!("parsing {}", summary_path.display()))?;

        let outcomes = value
            .get("outcomes")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let with_status = |code: i8| {
            outcomes
                .iter()
                .filter(|o| o.get("status").and_then(|s| s.as_i64()) == Some(i64::from(code)))
                .count()
        };

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!("- processed: {}", outcomes.len()));
        lines.push(format!("- assigned: {}", with_status(RequestStatus::Assigned.code())));
        lines.push(format!("- rejected: {}", with_status(RequestStatus::Rejected.code())));
        lines.push(format!("- summary: `{}`", summary_path.display()));
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn summary() -> BatchSummary {
        BatchSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcomes: vec![
                RequestOutcome {
                    request_id: 1,
                    kind: servmatch_core::RequestKind::Immediate,
                    status: RequestStatus::Assigned,
                    reason: None,
                    assigned_worker_ids: vec!["W1".into()],
                    price: Some(500.0),
                    work_date: None,
                    work_start: None,
                    work_end: None,
                },
                RequestOutcome {
                    request_id: 2,
                    kind: servmatch_core::RequestKind::Scheduled,
                    status: RequestStatus::Rejected,
                    reason: Some(NO_WORKERS_AVAILABLE.into()),
                    assigned_worker_ids: vec![],
                    price: None,
                    work_date: None,
                    work_start: None,
                    work_end: None,
                },
            ],
            saved: true,
        }
    }

    #[test]
    fn settings_default_to_builtin_areas() {
        let dir = tempdir().expect("tempdir");
        let settings = DispatchSettings::load(dir.path()).expect("settings");
        assert!(settings.is_known_area("Benz Circle"));
        assert!(!settings.is_known_area("benz circle"));
    }

    #[test]
    fn settings_read_service_areas_from_yaml() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("servmatch.yaml"), "service_areas:\n  - Kukatpally\n")
            .expect("write yaml");
        let settings = DispatchSettings::load(dir.path()).expect("settings");
        assert_eq!(settings.service_areas, vec!["Kukatpally".to_string()]);
        assert!(!settings.is_known_area("Patamata"));
    }

    #[tokio::test]
    async fn reports_are_written_with_checksummed_manifest() {
        let dir = tempdir().expect("tempdir");
        let summary = summary();
        let run_dir = write_reports(dir.path(), &summary).await.expect("reports");

        let brief = std::fs::read_to_string(run_dir.join("brief.md")).expect("brief");
        assert!(brief.contains("- Assigned: 1"));
        assert!(brief.contains("#2 (Scheduled) REJECTED: no workers available"));
        assert!(brief.contains("W1 for 500.00"));

        let manifest: ReportManifest = serde_json::from_str(
            &std::fs::read_to_string(run_dir.join("manifest.json")).expect("manifest"),
        )
        .expect("parse manifest");
        let on_disk = std::fs::read(run_dir.join("batch_summary.json")).expect("summary");
        let entry = &manifest.files[0];
        assert_eq!(entry.bytes, on_disk.len() as u64);
        assert_eq!(entry.sha256, manifest_entry("x", "y", &on_disk).sha256);

        let digest = report_recent(5, dir.path()).expect("digest");
        assert!(digest.contains(&summary.run_id.to_string()));
        assert!(digest.contains("- assigned: 1"));
        assert!(digest.contains("- rejected: 1"));
    }
}
