//! JSON document store.
//!
//! Each [`JsonFile`] owns one file on disk and one in-memory copy of it. The
//! in-memory copy is authoritative between an explicit [`JsonFile::reload`]
//! and the next write; every mutation runs clone -> mutate -> persist ->
//! commit while holding the file's mutex, so two requests never interleave
//! inside the read-modify-write window.
//!
//! Handlers only see the typed [`RecordStore`] trait. [`JsonCollection`] is
//! the implementation over one array (plus its id counter) of a `JsonFile`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

use crate::models::{timestamp_now, Contact, Incentive, Product, Record};

pub const CONTACTS_FILE: &str = "contatti.json";
pub const CONTENT_FILE: &str = "content.json";

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed document {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Marker for types that can live in a [`JsonFile`].
pub trait Document: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {}

impl<T> Document for T where T: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static {}

/// One JSON document on disk plus its authoritative in-memory copy.
pub struct JsonFile<D> {
    path: PathBuf,
    data: Mutex<D>,
}

impl<D: Document> JsonFile<D> {
    /// Loads the document (a missing file starts from `D::default()`) and
    /// writes the normalized form back so the file always exists afterwards.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let data: D = read_document(&path).await?;
        write_document(&path, &data).await?;
        tracing::debug!(path = %path.display(), "document opened");

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the backing file, replacing the in-memory copy.
    pub async fn reload(&self) -> Result<(), StoreError> {
        let mut guard = self.data.lock().await;
        *guard = read_document(&self.path).await?;
        Ok(())
    }

    pub async fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&D) -> T + Send,
    {
        let guard = self.data.lock().await;
        f(&guard)
    }

    /// Applies `f` to a copy of the document and persists it. The in-memory
    /// copy only changes once the write succeeded.
    pub async fn update<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut D) -> T + Send,
        T: Send,
    {
        let mut guard = self.data.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next);
        write_document(&self.path, &next).await?;
        *guard = next;
        Ok(out)
    }
}

async fn read_document<D: Document>(path: &Path) -> Result<D, StoreError> {
    match fs::read(path).await {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(D::default()),
        Ok(bytes) => {
            let malformed = |source| StoreError::Malformed {
                path: path.to_path_buf(),
                source,
            };
            // A bare `null` document reads like an empty file.
            match serde_json::from_slice::<Option<D>>(&bytes).map_err(malformed)? {
                Some(doc) => Ok(doc),
                None => Ok(D::default()),
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(D::default()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

// Write to a sibling temp file, then rename over the original: a crash
// mid-write leaves the previous version intact.
async fn write_document<D: Document>(path: &Path, data: &D) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

// --- On-disk layouts ---

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ContactsFile {
    pub contatti: Vec<Contact>,
    pub meta: ContactsMeta,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ContactsMeta {
    #[serde(rename = "lastId")]
    pub last_id: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ContentFile {
    pub prodotti: Vec<Product>,
    pub incentivi: Vec<Incentive>,
    pub meta: ContentMeta,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ContentMeta {
    #[serde(rename = "lastProdottoId")]
    pub last_prodotto_id: u64,
    #[serde(rename = "lastIncentivoId")]
    pub last_incentivo_id: u64,
}

/// A document that holds an ordered collection of `R` plus its id counter.
pub trait HasCollection<R>: Document {
    fn records(&self) -> &Vec<R>;
    fn records_mut(&mut self) -> &mut Vec<R>;
    fn last_id_mut(&mut self) -> &mut u64;
}

impl HasCollection<Contact> for ContactsFile {
    fn records(&self) -> &Vec<Contact> {
        &self.contatti
    }
    fn records_mut(&mut self) -> &mut Vec<Contact> {
        &mut self.contatti
    }
    fn last_id_mut(&mut self) -> &mut u64 {
        &mut self.meta.last_id
    }
}

impl HasCollection<Product> for ContentFile {
    fn records(&self) -> &Vec<Product> {
        &self.prodotti
    }
    fn records_mut(&mut self) -> &mut Vec<Product> {
        &mut self.prodotti
    }
    fn last_id_mut(&mut self) -> &mut u64 {
        &mut self.meta.last_prodotto_id
    }
}

impl HasCollection<Incentive> for ContentFile {
    fn records(&self) -> &Vec<Incentive> {
        &self.incentivi
    }
    fn records_mut(&mut self) -> &mut Vec<Incentive> {
        &mut self.incentivi
    }
    fn last_id_mut(&mut self) -> &mut u64 {
        &mut self.meta.last_incentivo_id
    }
}

// --- Pagination ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /// Clamps page to >= 1 and limit to `1..=MAX_PAGE_SIZE`; unparsable
    /// values fall back to the defaults.
    pub fn parse(page: Option<&str>, limit: Option<&str>) -> Self {
        let page = page
            .and_then(|p| p.trim().parse::<i64>().ok())
            .unwrap_or(1)
            .max(1) as usize;
        let limit = limit
            .and_then(|l| l.trim().parse::<i64>().ok())
            .unwrap_or(DEFAULT_PAGE_SIZE as i64)
            .clamp(1, MAX_PAGE_SIZE as i64) as usize;
        Self { page, limit }
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct Page<R> {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub rows: Vec<R>,
}

impl<R> Page<R> {
    pub fn slice(all: Vec<R>, request: PageRequest) -> Self {
        let total = all.len();
        let rows = all
            .into_iter()
            .skip(request.offset())
            .take(request.limit)
            .collect();
        Page {
            page: request.page,
            limit: request.limit,
            total,
            rows,
        }
    }
}

// --- Typed record store ---

/// In-place edit applied to a stored record by [`RecordStore::update_by_id`].
pub type Patch<R> = Box<dyn for<'a> FnOnce(&'a mut R) + Send>;

/// Storage interface the handlers depend on. Collections are ordered newest
/// first; ids are never reused.
#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    /// Re-reads the backing storage.
    async fn load(&self) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<R>, StoreError>;

    async fn page(&self, request: PageRequest) -> Result<Page<R>, StoreError> {
        let all = self.list().await?;
        Ok(Page::slice(all, request))
    }

    async fn get_by_id(&self, id: u64) -> Result<Option<R>, StoreError>;

    /// Allocates an id, stamps `created_at` and prepends the record.
    async fn insert(&self, record: R) -> Result<R, StoreError>;

    /// Applies `patch` to the record with `id`. `None` if there is no such record.
    async fn update_by_id(
        &self,
        id: u64,
        patch: Patch<R>,
    ) -> Result<Option<R>, StoreError>;

    /// Returns how many records were removed (0 or 1).
    async fn delete_by_id(&self, id: u64) -> Result<usize, StoreError>;

    /// Bumps and persists the collection's counter.
    async fn next_id(&self) -> Result<u64, StoreError>;
}

/// [`RecordStore`] over one collection of a shared [`JsonFile`].
pub struct JsonCollection<D, R> {
    file: Arc<JsonFile<D>>,
    _record: PhantomData<fn() -> R>,
}

impl<D, R> JsonCollection<D, R> {
    pub fn new(file: Arc<JsonFile<D>>) -> Self {
        Self {
            file,
            _record: PhantomData,
        }
    }
}

// Never hands out an id at or below one already stored, even if the
// counter was lost or edited by hand.
fn allocate_id<D, R>(doc: &mut D) -> u64
where
    D: HasCollection<R>,
    R: Record,
{
    let highest = doc.records().iter().map(Record::id).max().unwrap_or(0);
    let counter = doc.last_id_mut();
    *counter = (*counter).max(highest) + 1;
    *counter
}

#[async_trait]
impl<D, R> RecordStore<R> for JsonCollection<D, R>
where
    D: HasCollection<R>,
    R: Record,
{
    async fn load(&self) -> Result<(), StoreError> {
        self.file.reload().await
    }

    async fn list(&self) -> Result<Vec<R>, StoreError> {
        Ok(self.file.read(|doc| doc.records().clone()).await)
    }

    async fn get_by_id(&self, id: u64) -> Result<Option<R>, StoreError> {
        Ok(self
            .file
            .read(|doc| doc.records().iter().find(|r| r.id() == id).cloned())
            .await)
    }

    async fn insert(&self, mut record: R) -> Result<R, StoreError> {
        let stored = self
            .file
            .update(move |doc| {
                let id = allocate_id::<D, R>(doc);
                record.stamp(id, timestamp_now());
                doc.records_mut().insert(0, record.clone());
                record
            })
            .await?;
        tracing::debug!(id = stored.id(), path = %self.file.path().display(), "record inserted");
        Ok(stored)
    }

    async fn update_by_id(
        &self,
        id: u64,
        patch: Patch<R>,
    ) -> Result<Option<R>, StoreError> {
        let exists = self
            .file
            .read(|doc| doc.records().iter().any(|r| r.id() == id))
            .await;
        if !exists {
            return Ok(None);
        }

        self.file
            .update(move |doc| {
                let record = doc.records_mut().iter_mut().find(|r| r.id() == id)?;
                patch(&mut *record);
                Some(record.clone())
            })
            .await
    }

    async fn delete_by_id(&self, id: u64) -> Result<usize, StoreError> {
        let present = self
            .file
            .read(|doc| doc.records().iter().any(|r| r.id() == id))
            .await;
        if !present {
            return Ok(0);
        }

        self.file
            .update(move |doc| {
                let records = doc.records_mut();
                let before = records.len();
                records.retain(|r| r.id() != id);
                before - records.len()
            })
            .await
    }

    async fn next_id(&self) -> Result<u64, StoreError> {
        self.file.update(allocate_id::<D, R>).await
    }
}

/// The three collections the site uses, backed by two files in `data_dir`.
#[derive(Clone)]
pub struct Stores {
    pub contacts: Arc<dyn RecordStore<Contact>>,
    pub products: Arc<dyn RecordStore<Product>>,
    pub incentives: Arc<dyn RecordStore<Incentive>>,
}

impl Stores {
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let contacts_file = Arc::new(JsonFile::<ContactsFile>::open(data_dir.join(CONTACTS_FILE)).await?);
        let content_file = Arc::new(JsonFile::<ContentFile>::open(data_dir.join(CONTENT_FILE)).await?);

        Ok(Self {
            contacts: Arc::new(JsonCollection::<ContactsFile, Contact>::new(contacts_file)),
            products: Arc::new(JsonCollection::<ContentFile, Product>::new(content_file.clone())),
            incentives: Arc::new(JsonCollection::<ContentFile, Incentive>::new(content_file)),
        })
    }
}
