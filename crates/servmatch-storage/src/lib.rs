//! Catalog loading and JSON-file persistence for workers and service requests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use servmatch_core::{
    RecordError, RequestStatus, ServiceRequest, ServiceRequestRecord, Work, WorkCatalog, Worker,
    WorkerRecord,
};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "servmatch-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serializing records for {}: {source}", path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Record(#[from] RecordError),
}

fn io_err(action: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> StorageError {
    let path = path.to_path_buf();
    move |source| StorageError::Io {
        action,
        path,
        source,
    }
}

/// File names inside a data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join("works_config.json")
    }

    pub fn workers_path(&self) -> PathBuf {
        self.root.join("workers.json")
    }

    pub fn services_path(&self) -> PathBuf {
        self.root.join("services.json")
    }
}

/// A JSON array on disk, replaced wholesale on every write.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file as a list; a missing or empty file is an empty list.
    pub async fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, StorageError> {
        match read_optional(&self.path).await? {
            Some(text) => serde_json::from_str(&text).map_err(|source| StorageError::Parse {
                path: self.path.clone(),
                source,
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Writes via a temp file in the same directory and an atomic rename.
    pub async fn write_all<T: Serialize>(&self, items: &[T]) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(items).map_err(|source| StorageError::Serialize {
            path: self.path.clone(),
            source,
        })?;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .map_err(io_err("creating directory", &parent))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "store".to_string());
        let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(io_err("opening temp file", &temp_path))?;
        let written = async {
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(source) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io {
                action: "writing temp file",
                path: temp_path,
                source,
            });
        }

        if let Err(source) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io {
                action: "renaming temp file onto",
                path: self.path.clone(),
                source,
            });
        }
        debug!(path = %self.path.display(), records = items.len(), "store file replaced");
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, StorageError> {
    match fs::read_to_string(path).await {
        Ok(text) if text.trim().is_empty() => Ok(None),
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err("reading", path)(err)),
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    works: Vec<Work>,
}

/// Loads `works_config.json`. Call once at startup and share the result.
pub async fn load_catalog(path: impl AsRef<Path>) -> Result<WorkCatalog, StorageError> {
    let path = path.as_ref();
    let Some(text) = read_optional(path).await? else {
        warn!(path = %path.display(), "work catalog is missing or empty");
        return Ok(WorkCatalog::default());
    };
    let file: CatalogFile = serde_json::from_str(&text).map_err(|source| StorageError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let (catalog, duplicates) = WorkCatalog::from_works(file.works);
    for name in duplicates {
        warn!(path = %path.display(), work = %name, "duplicate work name in catalog ignored");
    }
    Ok(catalog)
}

#[async_trait]
pub trait WorkerStore: Send + Sync {
    async fn load_all(&self, catalog: &WorkCatalog) -> Result<Vec<Worker>, StorageError>;

    /// Insert or replace by worker id.
    async fn update(&self, worker: &Worker) -> Result<(), StorageError>;

    async fn find_by_id(
        &self,
        worker_id: &str,
        catalog: &WorkCatalog,
    ) -> Result<Option<Worker>, StorageError> {
        Ok(self
            .load_all(catalog)
            .await?
            .into_iter()
            .find(|w| w.id == worker_id))
    }
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn load_all(&self, catalog: &WorkCatalog) -> Result<Vec<ServiceRequest>, StorageError>;

    /// Replaces the whole collection.
    async fn save_all(&self, requests: &[ServiceRequest]) -> Result<(), StorageError>;

    /// Insert or replace by request id.
    async fn update(&self, request: &ServiceRequest) -> Result<(), StorageError>;

    async fn find_by_status(
        &self,
        status: RequestStatus,
        catalog: &WorkCatalog,
    ) -> Result<Vec<ServiceRequest>, StorageError> {
        Ok(self
            .load_all(catalog)
            .await?
            .into_iter()
            .filter(|r| r.status() == status)
            .collect())
    }

    async fn find_by_id(
        &self,
        request_id: u32,
        catalog: &WorkCatalog,
    ) -> Result<Option<ServiceRequest>, StorageError> {
        Ok(self
            .load_all(catalog)
            .await?
            .into_iter()
            .find(|r| r.id == request_id))
    }
}

fn decode_workers(
    records: Vec<WorkerRecord>,
    catalog: &WorkCatalog,
) -> Result<Vec<Worker>, StorageError> {
    records
        .into_iter()
        .map(|r| Worker::from_record(r, catalog).map_err(StorageError::from))
        .collect()
}

fn decode_requests(
    records: Vec<ServiceRequestRecord>,
    catalog: &WorkCatalog,
) -> Result<Vec<ServiceRequest>, StorageError> {
    records
        .into_iter()
        .map(|r| ServiceRequest::from_record(r, catalog).map_err(StorageError::from))
        .collect()
}

fn upsert<T>(items: &mut Vec<T>, item: T, same: impl Fn(&T) -> bool) {
    match items.iter_mut().find(|existing| same(existing)) {
        Some(slot) => *slot = item,
        None => items.push(item),
    }
}

#[derive(Debug, Clone)]
pub struct JsonWorkerStore {
    file: JsonFile,
}

impl JsonWorkerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path),
        }
    }
}

#[async_trait]
impl WorkerStore for JsonWorkerStore {
    async fn load_all(&self, catalog: &WorkCatalog) -> Result<Vec<Worker>, StorageError> {
        decode_workers(self.file.read_all().await?, catalog)
    }

    async fn update(&self, worker: &Worker) -> Result<(), StorageError> {
        // Works stay as names here, so no catalog is needed for the rewrite.
        let mut records: Vec<WorkerRecord> = self.file.read_all().await?;
        let record = worker.to_record();
        upsert(&mut records, record, |r| r.worker_id == worker.id);
        self.file.write_all(&records).await
    }
}

#[derive(Debug, Clone)]
pub struct JsonRequestStore {
    file: JsonFile,
}

impl JsonRequestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path),
        }
    }
}

#[async_trait]
impl RequestStore for JsonRequestStore {
    async fn load_all(&self, catalog: &WorkCatalog) -> Result<Vec<ServiceRequest>, StorageError> {
        decode_requests(self.file.read_all().await?, catalog)
    }

    async fn save_all(&self, requests: &[ServiceRequest]) -> Result<(), StorageError> {
        let records: Vec<ServiceRequestRecord> = requests.iter().map(|r| r.to_record()).collect();
        self.file.write_all(&records).await
    }

    async fn update(&self, request: &ServiceRequest) -> Result<(), StorageError> {
        let mut records: Vec<ServiceRequestRecord> = self.file.read_all().await?;
        upsert(&mut records, request.to_record(), |r| r.id == request.id);
        self.file.write_all(&records).await
    }
}

/// Worker store held in memory; records go through the same encoding as files.
#[derive(Debug, Default)]
pub struct MemoryWorkerStore {
    records: Mutex<Vec<WorkerRecord>>,
    updates: Mutex<usize>,
}

impl MemoryWorkerStore {
    pub fn new<'a>(workers: impl IntoIterator<Item = &'a Worker>) -> Self {
        Self {
            records: Mutex::new(workers.into_iter().map(Worker::to_record).collect()),
            updates: Mutex::new(0),
        }
    }

    pub async fn records(&self) -> Vec<WorkerRecord> {
        self.records.lock().await.clone()
    }

    pub async fn update_count(&self) -> usize {
        *self.updates.lock().await
    }
}

#[async_trait]
impl WorkerStore for MemoryWorkerStore {
    async fn load_all(&self, catalog: &WorkCatalog) -> Result<Vec<Worker>, StorageError> {
        decode_workers(self.records().await, catalog)
    }

    async fn update(&self, worker: &Worker) -> Result<(), StorageError> {
        let mut records = self.records.lock().await;
        upsert(&mut records, worker.to_record(), |r| r.worker_id == worker.id);
        *self.updates.lock().await += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRequestStore {
    records: Mutex<Vec<ServiceRequestRecord>>,
    saves: Mutex<usize>,
}

impl MemoryRequestStore {
    pub fn new<'a>(requests: impl IntoIterator<Item = &'a ServiceRequest>) -> Self {
        Self {
            records: Mutex::new(requests.into_iter().map(ServiceRequest::to_record).collect()),
            saves: Mutex::new(0),
        }
    }

    pub async fn records(&self) -> Vec<ServiceRequestRecord> {
        self.records.lock().await.clone()
    }

    /// Number of full-collection writes so far.
    pub async fn save_count(&self) -> usize {
        *self.saves.lock().await
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn load_all(&self, catalog: &WorkCatalog) -> Result<Vec<ServiceRequest>, StorageError> {
        decode_requests(self.records().await, catalog)
    }

    async fn save_all(&self, requests: &[ServiceRequest]) -> Result<(), StorageError> {
        *self.records.lock().await = requests.iter().map(ServiceRequest::to_record).collect();
        *self.saves.lock().await += 1;
        Ok(())
    }

    async fn update(&self, request: &ServiceRequest) -> Result<(), StorageError> {
        let mut records = self.records.lock().await;
        upsert(&mut records, request.to_record(), |r| r.id == request.id);
        Ok(())
    }
}
