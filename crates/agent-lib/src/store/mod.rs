//! File-backed time-series store
//!
//! Every entity owns one fixed-size `<stem>.rrd` file in the store
//! directory (see [`file`] for the layout). Files are created with
//! create-new semantics so two writers racing on a new entity never
//! truncate each other's data, and a sample only rewrites the few rows it
//! lands in. Updates are not synced to disk.
//!
//! All methods are blocking; async callers run them under
//! `tokio::task::spawn_blocking`.

mod file;
mod rrd;

pub use rrd::{
    align, ArchiveLayout, DataPoint, Gauges, RoundRobinSeries, SeriesLayout, HOURLY_ROWS,
    PRIMARY_SPAN_SECS,
};

use crate::error::StoreError;
use crate::observability::OpexMetrics;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};

const SERIES_EXTENSION: &str = "rrd";
const NON_ALLOCATABLE_STEM: &str = "_non-allocatable";
const BILLING_RATE_STEM: &str = "_billing-hourly-rate";
const EFFICIENCY_SUFFIX: &str = "__rf";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A tracked series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    /// Usage of a namespace, in percent of cluster capacity
    Namespace(String),
    /// Capacity reserved by the nodes, in percent of cluster capacity
    NonAllocatable,
    /// Configured billing hourly rate (same value in both gauges)
    BillingRate,
    /// Usage over requests of a namespace
    RequestEfficiency(String),
}

impl Entity {
    /// Name of the series file, without extension
    pub fn file_stem(&self) -> String {
        match self {
            Entity::Namespace(ns) => ns.clone(),
            Entity::NonAllocatable => NON_ALLOCATABLE_STEM.to_string(),
            Entity::BillingRate => BILLING_RATE_STEM.to_string(),
            Entity::RequestEfficiency(ns) => format!("{ns}{EFFICIENCY_SUFFIX}"),
        }
    }

    pub fn from_file_stem(stem: &str) -> Option<Self> {
        match stem {
            NON_ALLOCATABLE_STEM => Some(Entity::NonAllocatable),
            BILLING_RATE_STEM => Some(Entity::BillingRate),
            _ => match stem.strip_suffix(EFFICIENCY_SUFFIX) {
                Some(ns) if is_valid_namespace(ns) => {
                    Some(Entity::RequestEfficiency(ns.to_string()))
                }
                Some(_) => None,
                None if is_valid_namespace(stem) => Some(Entity::Namespace(stem.to_string())),
                None => None,
            },
        }
    }

    /// Name under which the entity appears in exported datasets
    pub fn display_name(&self) -> &str {
        match self {
            Entity::Namespace(ns) | Entity::RequestEfficiency(ns) => ns,
            Entity::NonAllocatable => "non-allocatable",
            Entity::BillingRate => "billing-hourly-rate",
        }
    }

    fn validate(&self) -> Result<(), StoreError> {
        match self {
            Entity::Namespace(ns) | Entity::RequestEfficiency(ns) if !is_valid_namespace(ns) => {
                Err(StoreError::InvalidEntity(ns.clone()))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}

/// Namespace names are DNS labels; `_` is reserved for pseudo-entities
fn is_valid_namespace(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 253
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !name.starts_with('.')
}

/// Store of per-entity series files
#[derive(Debug)]
pub struct SeriesStore {
    root: PathBuf,
    step: u64,
    locks: DashMap<String, Arc<Mutex<()>>>,
    metrics: OpexMetrics,
}

impl SeriesStore {
    /// Open (creating if needed) the store directory
    ///
    /// `step` is the sample interval of series created by this store.
    /// Existing series keep the interval they were created with.
    pub fn open(root: impl Into<PathBuf>, step: u64) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self {
            root,
            step: step.max(1),
            locks: DashMap::new(),
            metrics: OpexMetrics::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    fn path_for(&self, entity: &Entity) -> PathBuf {
        self.root.join(format!("{}.{}", entity.file_stem(), SERIES_EXTENSION))
    }

    fn lock_for(&self, entity: &Entity) -> Arc<Mutex<()>> {
        self.locks
            .entry(entity.file_stem())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create the series of `entity` unless it already exists
    ///
    /// Returns `true` when this call created it.
    pub fn create_if_absent(&self, entity: &Entity) -> Result<bool, StoreError> {
        entity.validate()?;
        let path = self.path_for(entity);
        if path.exists() {
            return Ok(false);
        }

        let temp = write_temp(&path, &file::encode(&RoundRobinSeries::new(self.step)))?;
        // hard_link fails if the target exists, giving create-new semantics
        // without ever exposing a half-written file
        let created = match fs::hard_link(&temp, &path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => false,
            Err(e) => {
                let _ = fs::remove_file(&temp);
                return Err(StoreError::io(&path, e));
            }
        };
        let _ = fs::remove_file(&temp);

        if created {
            debug!(entity = %entity, step = self.step, "Created series");
        }
        Ok(created)
    }

    /// Upsert a sample, propagating failures
    ///
    /// Returns `false` when the series rejected the sample (too old or not
    /// finite).
    pub fn try_append_sample(
        &self,
        entity: &Entity,
        timestamp: i64,
        cpu: f64,
        mem: f64,
    ) -> Result<bool, StoreError> {
        let lock = self.lock_for(entity);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        self.create_if_absent(entity)?;
        let path = self.path_for(entity);
        let mut series_file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(series_file) => series_file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(entity.to_string()))
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let written = file::append(&path, &mut series_file, timestamp, [cpu, mem])?;
        if !written {
            warn!(
                entity = %entity,
                timestamp = timestamp,
                cpu = cpu,
                mem = mem,
                "Sample rejected by series"
            );
        }
        Ok(written)
    }

    /// Upsert a sample; failures are logged and the sample dropped
    pub fn append_sample(&self, entity: &Entity, timestamp: i64, cpu: f64, mem: f64) -> bool {
        match self.try_append_sample(entity, timestamp, cpu, mem) {
            Ok(written) => written,
            Err(e) => {
                error!(entity = %entity, error = %e, "Failed adding series sample");
                self.metrics.inc_store_write_errors();
                false
            }
        }
    }

    /// Read the series of `entity` over `[start, end]`
    ///
    /// An entity that was never written yields an empty vector.
    pub fn fetch_range(
        &self,
        entity: &Entity,
        start: i64,
        end: i64,
        resolution: u64,
    ) -> Result<Vec<DataPoint>, StoreError> {
        entity.validate()?;
        Ok(self
            .load(entity)?
            .map(|series| series.fetch(start, end, resolution))
            .unwrap_or_default())
    }

    /// Load the full series of `entity`, if it exists
    pub fn load(&self, entity: &Entity) -> Result<Option<RoundRobinSeries>, StoreError> {
        let path = self.path_for(entity);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        file::decode(&path, &content).map(Some)
    }

    /// Load every stored series once
    ///
    /// A series that cannot be read is logged and left out.
    pub fn load_all(&self) -> Result<SeriesSet, StoreError> {
        let mut set = SeriesSet::default();
        for entity in self.list_entities()? {
            match self.load(&entity) {
                Ok(Some(series)) => set.insert(entity, series),
                Ok(None) => {}
                Err(e) => error!(entity = %entity, error = %e, "Skipping unreadable series"),
            }
        }
        Ok(set)
    }

    /// Entities with a series file, sorted
    pub fn list_entities(&self) -> Result<Vec<Entity>, StoreError> {
        let entries = fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;

        let mut entities = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&self.root, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SERIES_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match Entity::from_file_stem(stem) {
                Some(entity) => entities.push(entity),
                None => debug!(path = %path.display(), "Ignoring unknown series file"),
            }
        }
        entities.sort();
        Ok(entities)
    }
}

/// Series of several entities, read once and queried in memory
#[derive(Debug, Clone, Default)]
pub struct SeriesSet {
    series: BTreeMap<Entity, RoundRobinSeries>,
}

impl SeriesSet {
    pub fn insert(&mut self, entity: Entity, series: RoundRobinSeries) {
        self.series.insert(entity, series);
    }

    pub fn get(&self, entity: &Entity) -> Option<&RoundRobinSeries> {
        self.series.get(entity)
    }

    /// Stored entities, sorted
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.series.keys()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Rows of `entity` over `[start, end]`, empty when it is not in the set
    pub fn fetch(&self, entity: &Entity, start: i64, end: i64, resolution: u64) -> Vec<DataPoint> {
        self.get(entity)
            .map(|series| series.fetch(start, end, resolution))
            .unwrap_or_default()
    }
}

/// Write `content` next to `path` and return the synced temp file
fn write_temp(path: &Path, content: &[u8]) -> Result<PathBuf, StoreError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("series");
    let temp = path.with_file_name(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let mut file = File::create(&temp).map_err(|e| StoreError::io(&temp, e))?;
    file.write_all(content)
        .and_then(|_| file.sync_all())
        .map_err(|e| {
            let _ = fs::remove_file(&temp);
            StoreError::io(&temp, e)
        })?;
    Ok(temp)
}

/// Atomically replace `path` with the JSON encoding of `value`
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let content = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    let temp = write_temp(path, &content)?;
    fs::rename(&temp, path).map_err(|e| {
        let _ = fs::remove_file(&temp);
        StoreError::io(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const T0: i64 = 1_700_000_000 / 3600 * 3600;

    fn store() -> (TempDir, SeriesStore) {
        let dir = TempDir::new().unwrap();
        let store = SeriesStore::open(dir.path().join("db"), 300).unwrap();
        (dir, store)
    }

    #[test]
    fn test_entity_file_stems() {
        let cases = [
            (Entity::Namespace("default".into()), "default"),
            (Entity::NonAllocatable, "_non-allocatable"),
            (Entity::BillingRate, "_billing-hourly-rate"),
            (Entity::RequestEfficiency("kube-system".into()), "kube-system__rf"),
        ];
        for (entity, stem) in cases {
            assert_eq!(entity.file_stem(), stem);
            assert_eq!(Entity::from_file_stem(stem), Some(entity));
        }
        assert_eq!(Entity::from_file_stem("bad_name"), None);
        assert_eq!(Entity::from_file_stem("__rf"), None);
        assert_eq!(Entity::NonAllocatable.display_name(), "non-allocatable");
    }

    #[test]
    fn test_fetch_missing_entity_is_empty() {
        let (_dir, store) = store();
        let points = store
            .fetch_range(&Entity::Namespace("default".into()), T0 - 3600, T0, 300)
            .unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn test_fetch_created_but_empty_entity_is_empty() {
        let (_dir, store) = store();
        let entity = Entity::Namespace("default".into());
        assert!(store.create_if_absent(&entity).unwrap());
        assert!(store.fetch_range(&entity, T0 - 3600, T0, 300).unwrap().is_empty());
    }

    #[test]
    fn test_append_and_fetch() {
        let (_dir, store) = store();
        let entity = Entity::Namespace("default".into());
        assert!(store.append_sample(&entity, T0, 25.0, 10.0));
        assert!(store.append_sample(&entity, T0 + 300, 30.0, 12.0));

        let points = store.fetch_range(&entity, T0, T0 + 300, 300).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].cpu(), Some(25.0));
        assert_eq!(points[1].mem(), Some(12.0));
    }

    #[test]
    fn test_rewrite_same_sample_is_idempotent() {
        let (_dir, store) = store();
        let entity = Entity::NonAllocatable;
        store.append_sample(&entity, T0, 8.5, 4.0);
        let before = store.load(&entity).unwrap();

        store.append_sample(&entity, T0 + 10, 8.5, 4.0);
        assert_eq!(store.load(&entity).unwrap(), before);
        assert_eq!(
            store.fetch_range(&entity, T0, T0, 300).unwrap(),
            before.unwrap().fetch(T0, T0, 300)
        );
    }

    #[test]
    fn test_create_if_absent_never_truncates() {
        let (_dir, store) = store();
        let entity = Entity::BillingRate;
        store.append_sample(&entity, T0, 1.5, 1.5);

        assert!(!store.create_if_absent(&entity).unwrap());
        let points = store.fetch_range(&entity, T0, T0, 300).unwrap();
        assert_eq!(points[0].cpu(), Some(1.5));
    }

    #[test]
    fn test_existing_series_keeps_its_step() {
        let dir = TempDir::new().unwrap();
        let entity = Entity::Namespace("default".into());
        SeriesStore::open(dir.path(), 300)
            .unwrap()
            .append_sample(&entity, T0, 1.0, 1.0);

        let reopened = SeriesStore::open(dir.path(), 60).unwrap();
        reopened.append_sample(&entity, T0 + 60, 2.0, 2.0);
        assert_eq!(reopened.load(&entity).unwrap().unwrap().step(), 300);
    }

    #[test]
    fn test_list_entities_sorted() {
        let (_dir, store) = store();
        store.append_sample(&Entity::Namespace("web".into()), T0, 1.0, 1.0);
        store.append_sample(&Entity::Namespace("api".into()), T0, 1.0, 1.0);
        store.append_sample(&Entity::RequestEfficiency("api".into()), T0, 0.5, 0.5);
        store.append_sample(&Entity::NonAllocatable, T0, 1.0, 1.0);
        fs::write(store.root().join("notes.txt"), "x").unwrap();

        let entities = store.list_entities().unwrap();
        assert_eq!(
            entities,
            vec![
                Entity::Namespace("api".into()),
                Entity::Namespace("web".into()),
                Entity::NonAllocatable,
                Entity::RequestEfficiency("api".into()),
            ]
        );
    }

    #[test]
    fn test_invalid_entity_is_not_written() {
        let (_dir, store) = store();
        let entity = Entity::Namespace("../escape".into());
        assert!(!store.append_sample(&entity, T0, 1.0, 1.0));
        assert!(matches!(
            store.try_append_sample(&entity, T0, 1.0, 1.0),
            Err(StoreError::InvalidEntity(_))
        ));
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let (_dir, store) = store();
        fs::write(store.root().join("default.rrd"), "not json").unwrap();
        let result = store.fetch_range(&Entity::Namespace("default".into()), T0, T0, 300);
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_concurrent_writers_on_distinct_entities() {
        let (_dir, store) = store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let entity = Entity::Namespace(format!("ns-{i}"));
                    for slot in 0..5 {
                        store.append_sample(&entity, T0 + slot * 300, i as f64, 1.0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.list_entities().unwrap().len(), 4);
    }

    #[test]
    fn test_concurrent_creation_has_one_winner() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let entity = Entity::Namespace("default".into());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                let entity = entity.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store.create_if_absent(&entity).unwrap()
                })
            })
            .collect();
        let created = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|created| *created)
            .count();

        assert_eq!(created, 1);
        let series = store.load(&entity).unwrap().unwrap();
        assert!(series.is_empty());
        // Temp files are cleaned up whoever wins
        assert_eq!(fs::read_dir(store.root()).unwrap().count(), 1);
    }

    #[test]
    fn test_concurrent_appends_to_one_entity() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        let entity = Entity::Namespace("default".into());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                let entity = entity.clone();
                std::thread::spawn(move || {
                    for slot in 0..3 {
                        store.append_sample(&entity, T0 + (i * 3 + slot) * 300, 10.0, 5.0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let hourly = store.fetch_range(&entity, T0, T0 + 3599, 3600).unwrap();
        assert_eq!(hourly[0].values, Some([10.0, 5.0]));
        let fine = store.fetch_range(&entity, T0, T0 + 11 * 300, 300).unwrap();
        assert!(fine.iter().all(|p| p.values == Some([10.0, 5.0])));
    }

    #[test]
    fn test_append_rewrites_rows_not_the_file() {
        let (_dir, store) = store();
        let entity = Entity::Namespace("default".into());
        store.create_if_absent(&entity).unwrap();
        let path = store.root().join("default.rrd");
        let size = fs::metadata(&path).unwrap().len();

        for i in 0..24 {
            assert!(store.append_sample(&entity, T0 + i * 300, 1.0, 1.0));
        }
        assert_eq!(fs::metadata(&path).unwrap().len(), size);
        assert_eq!(
            store.load(&entity).unwrap().unwrap().last_update(),
            Some(T0 + 23 * 300)
        );
    }

    #[test]
    fn test_load_all_skips_unreadable_series() {
        let (_dir, store) = store();
        store.append_sample(&Entity::Namespace("web".into()), T0, 2.0, 1.0);
        store.append_sample(&Entity::NonAllocatable, T0, 1.0, 1.0);
        fs::write(store.root().join("broken.rrd"), "garbage").unwrap();

        let set = store.load_all().unwrap();
        let entities: Vec<_> = set.entities().cloned().collect();
        assert_eq!(
            entities,
            vec![Entity::Namespace("web".into()), Entity::NonAllocatable]
        );
        let points = set.fetch(&Entity::Namespace("web".into()), T0, T0, 300);
        assert_eq!(points[0].cpu(), Some(2.0));
        assert!(set
            .fetch(&Entity::Namespace("broken".into()), T0, T0, 300)
            .is_empty());
    }

    #[test]
    fn test_write_json_atomic_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nodes.json");
        write_json_atomic(&path, &vec![1, 2]).unwrap();
        write_json_atomic(&path, &vec![3]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[3]");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
