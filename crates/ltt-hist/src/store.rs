//! Histogram store contract and its two implementations.
//!
//! The workflow only needs four things from histogram I/O: read one named 1D
//! histogram, write one into a directory, rebin, and query contents. The last two
//! live on [`Histogram`]; this module covers reading and writing.
//!
//! [`JsonStore`] keeps one JSON document per file. Writes are buffered and
//! flushed either as read-merge-overwrite ([`JsonStore::new`]) or as a plain
//! overwrite ([`JsonStore::replacing`]); two stores must never flush the same
//! file concurrently.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ltt_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::histogram::Histogram;
use crate::path::HistogramPath;

const DOCUMENT_FORMAT: &str = "ltt-histograms/1";

/// Read side of the histogram store.
pub trait HistogramSource {
    /// Read one histogram. `Ok(None)` means the file or object does not exist.
    fn read(&self, path: &HistogramPath) -> Result<Option<Histogram>>;
}

/// Write side of the histogram store.
pub trait HistogramSink {
    /// Write `hist` as `directory/<hist.name>` into `file`, replacing any object
    /// with the same path.
    fn write(&mut self, file: &Path, directory: &str, hist: &Histogram) -> Result<()>;

    /// Persist buffered writes.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// On-disk layout of one histogram file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistogramDocument {
    /// Format tag.
    pub format: String,
    /// Histograms keyed by object path (`directory/name`).
    pub objects: BTreeMap<String, Histogram>,
}

impl HistogramDocument {
    fn new() -> Self {
        Self { format: DOCUMENT_FORMAT.to_string(), objects: BTreeMap::new() }
    }
}

/// In-memory store, keyed by file then object path.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    files: BTreeMap<PathBuf, BTreeMap<String, Histogram>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a histogram at `path`.
    pub fn insert(&mut self, path: &HistogramPath, hist: Histogram) {
        self.files.entry(path.file.clone()).or_default().insert(path.object.clone(), hist);
    }

    /// Borrow a histogram by file and object path.
    pub fn get(&self, file: &Path, object: &str) -> Option<&Histogram> {
        self.files.get(file).and_then(|objects| objects.get(object))
    }

    /// Object paths stored in `file`, sorted.
    pub fn objects(&self, file: &Path) -> Vec<&str> {
        self.files
            .get(file)
            .map(|objects| objects.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Files present in the store.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    /// Total number of stored histograms.
    pub fn len(&self) -> usize {
        self.files.values().map(BTreeMap::len).sum()
    }

    /// Whether the store holds no histogram.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistogramSource for MemoryStore {
    fn read(&self, path: &HistogramPath) -> Result<Option<Histogram>> {
        Ok(self.get(&path.file, &path.object).cloned())
    }
}

impl HistogramSink for MemoryStore {
    fn write(&mut self, file: &Path, directory: &str, hist: &Histogram) -> Result<()> {
        let path = HistogramPath::new(file, directory, &hist.name);
        self.insert(&path, hist.clone());
        Ok(())
    }
}

/// File-backed store using one JSON document per histogram file.
///
/// Relative file paths are resolved against `base_dir`.
#[derive(Debug)]
pub struct JsonStore {
    base_dir: PathBuf,
    cache: Mutex<HashMap<PathBuf, Option<HistogramDocument>>>,
    pending: MemoryStore,
    replace: bool,
}

impl JsonStore {
    /// Create a store rooted at `base_dir`. Flushing merges into existing files.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            cache: Mutex::new(HashMap::new()),
            pending: MemoryStore::new(),
            replace: false,
        }
    }

    /// Create a store rooted at `base_dir` whose flush replaces each written
    /// file with exactly the histograms written since the last flush.
    pub fn replacing(base_dir: impl Into<PathBuf>) -> Self {
        Self { replace: true, ..Self::new(base_dir) }
    }

    /// Absolute location of `file`.
    pub fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() { file.to_path_buf() } else { self.base_dir.join(file) }
    }

    /// Load a whole document from disk (no caching).
    pub fn load_document(path: &Path) -> Result<Option<HistogramDocument>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        let doc: HistogramDocument = serde_json::from_slice(&bytes)?;
        if doc.format != DOCUMENT_FORMAT {
            return Err(Error::Parse(format!(
                "{}: unsupported histogram document format '{}'",
                path.display(),
                doc.format
            )));
        }
        Ok(Some(doc))
    }
}

impl HistogramSource for JsonStore {
    fn read(&self, path: &HistogramPath) -> Result<Option<Histogram>> {
        let full = self.resolve(&path.file);
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| Error::Validation("histogram cache mutex poisoned".into()))?;
        if !cache.contains_key(&full) {
            log::debug!("loading histogram document {}", full.display());
            let doc = Self::load_document(&full)?;
            cache.insert(full.clone(), doc);
        }
        Ok(cache
            .get(&full)
            .and_then(|doc| doc.as_ref())
            .and_then(|doc| doc.objects.get(&path.object))
            .cloned())
    }
}

impl HistogramSink for JsonStore {
    fn write(&mut self, file: &Path, directory: &str, hist: &Histogram) -> Result<()> {
        self.pending.write(file, directory, hist)
    }

    fn flush(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        for file in pending.files() {
            let full = self.resolve(file);
            let mut doc = if self.replace {
                HistogramDocument::new()
            } else {
                Self::load_document(&full)?.unwrap_or_else(HistogramDocument::new)
            };
            for object in pending.objects(file) {
                if let Some(hist) = pending.get(file, object) {
                    doc.objects.insert(object.to_string(), hist.clone());
                }
            }
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full, serde_json::to_vec_pretty(&doc)?)?;
            log::info!("wrote {} histograms to {}", doc.objects.len(), full.display());
            if let Ok(mut cache) = self.cache.lock() {
                cache.remove(&full);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hist(name: &str) -> Histogram {
        Histogram::new(name, vec![0.0, 1.0, 2.0], vec![1.0, 2.0], vec![1.0, 2.0]).unwrap()
    }

    #[test]
    fn memory_store_read_write() {
        let mut store = MemoryStore::new();
        store.write(Path::new("out.json"), "LTT_UL17_Pass_muo_pt_300toInf", &hist("TTbar")).unwrap();
        let p: HistogramPath = "out.json:LTT_UL17_Pass_muo_pt_300toInf/TTbar".parse().unwrap();
        assert_eq!(store.read(&p).unwrap().unwrap().name, "TTbar");
        let missing: HistogramPath = "out.json:nope/TTbar".parse().unwrap();
        assert!(store.read(&missing).unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn json_store_missing_file_reads_none() {
        let store = JsonStore::new(std::env::temp_dir().join("ltt_hist_definitely_missing_dir"));
        let p = HistogramPath::new("x.json", "d", "h");
        assert!(store.read(&p).unwrap().is_none());
    }
}
