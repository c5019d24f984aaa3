use crate::error::KeyError;
use crate::key::{self, KeyInner, ResourceKey, ResourceType, TypeInner};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_containers::prelude::{CacheMap, ConcurrentCache, Reclaim};

#[derive(Debug)]
struct RegistryInner {
    /// Canonical path to key
    keys: ConcurrentCache<String, KeyInner>,
    /// Upper-cased extension to type
    types: ConcurrentCache<String, TypeInner>,
}

/// Shared by every registry so handles from different registries never compare equal
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Interns paths into [`ResourceKey`]s and extensions into [`ResourceType`]s
///
/// Entries are held weakly and purged once the last handle for them is dropped, so the
/// registry only ever holds handles somebody still uses. Cloning shares the same registry.
#[derive(Debug, Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                keys: CacheMap::new(Reclaim::Weak),
                types: CacheMap::new(Reclaim::Weak),
            }),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Intern `path`, case-insensitive and with `\` treated as `/`
    pub fn key(&self, path: &str) -> Result<ResourceKey, KeyError> {
        if path.is_empty() {
            return Err(KeyError::EmptyPath);
        }
        let path = key::normalize(path);
        let ext = key::extension_of(&path)
            .ok_or_else(|| KeyError::MissingExtension(path.clone()))?;
        // resolved before locking the key entry
        let ty = self.resource_type(ext);
        let canonical = key::canonicalize(&path);
        let inner = self
            .inner
            .keys
            .get_or_insert_with(canonical.clone(), |ticket| {
                Arc::new(KeyInner {
                    id: self.next_id(),
                    path,
                    canonical,
                    ty,
                    _ticket: ticket,
                })
            });
        Ok(ResourceKey { inner })
    }

    /// Intern an extension, case-insensitive, a leading dot is ignored
    pub fn resource_type(&self, ext: &str) -> ResourceType {
        let ext = ext.strip_prefix('.').unwrap_or(ext).to_uppercase();
        let inner = self.inner.types.get_or_insert_with(ext.clone(), |ticket| {
            Arc::new(TypeInner {
                id: self.next_id(),
                ext,
                _ticket: ticket,
            })
        });
        ResourceType { inner }
    }

    /// Intern several extensions at once
    pub fn resource_types(&self, exts: &[&str]) -> Vec<ResourceType> {
        exts.iter().map(|ext| self.resource_type(ext)).collect()
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        self.inner.keys.len()
    }

    /// Number of live types
    pub fn type_count(&self) -> usize {
        self.inner.types.len()
    }

    /// Drop every entry whose handles are gone
    pub fn purge(&self) {
        self.inner.keys.sweep();
        self.inner.types.sweep();
    }
}
