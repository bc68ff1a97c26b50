//! Per-image memoization of feature vectors, persisted with bincode.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use ndarray::Array1;

use crate::data_handling::SceneImage;
use crate::features::FeatureExtractor;

/// Cache file for an extractor fingerprint inside `dir`.
pub fn cache_path<P: AsRef<Path>>(dir: P, fingerprint: &str) -> PathBuf {
    dir.as_ref().join(format!("features-{}.bin", fingerprint))
}

/// Wraps an extractor and remembers its output per image id.
///
/// Identical ids are assumed to denote identical images. Entries are read
/// from `path` on construction and written back by `persist`.
pub struct CachingExtractor<E> {
    inner: E,
    path: Option<PathBuf>,
    entries: Mutex<HashMap<String, Vec<f64>>>,
    dirty: AtomicBool,
}

impl<E: FeatureExtractor> CachingExtractor<E> {
    pub fn in_memory(inner: E) -> Self {
        Self {
            inner,
            path: None,
            entries: Mutex::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Open the cache at `path`. A missing or unreadable file starts an empty
    /// cache; entries of the wrong length are discarded.
    pub fn open<P: AsRef<Path>>(path: P, inner: E) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();
        if path.exists() {
            match read_entries(&path) {
                Ok(loaded) => {
                    let dim = inner.dimension();
                    entries = loaded
                        .into_iter()
                        .filter(|(_, fv): &(String, Vec<f64>)| fv.len() == dim)
                        .collect();
                    log::info!("Loaded {} cached feature vectors from {}", entries.len(), path.display());
                }
                Err(e) => log::warn!("Ignoring feature cache: {:#}", e),
            }
        }
        Self {
            inner,
            path: Some(path),
            entries: Mutex::new(entries),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the entries back to disk if anything was added since loading.
    pub fn persist(&self) -> Result<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        if !self.dirty.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let bytes = {
            let entries = self.lock();
            bincode::serialize(&*entries).context("Failed to serialize feature cache")?
        };
        fs::write(path, bytes)
            .with_context(|| format!("Failed to write feature cache {}", path.display()))?;
        self.dirty.store(false, Ordering::SeqCst);
        log::debug!("Wrote feature cache {}", path.display());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<f64>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn read_entries(path: &Path) -> Result<HashMap<String, Vec<f64>>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    bincode::deserialize(&bytes).with_context(|| format!("Corrupt feature cache {}", path.display()))
}

impl<E: FeatureExtractor> FeatureExtractor for CachingExtractor<E> {
    fn extract(&self, image: &SceneImage) -> Array1<f64> {
        if let Some(hit) = self.lock().get(&image.id) {
            return Array1::from_vec(hit.clone());
        }
        // computed without holding the lock
        let fv = self.inner.extract(image);
        self.lock().insert(image.id.clone(), fv.to_vec());
        self.dirty.store(true, Ordering::SeqCst);
        fv
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
