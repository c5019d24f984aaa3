use crate::error::LoadError;
use crate::key::{ResourceKey, ResourceType};
use crate::source::ByteStream;
use crate::task::Task;
use dashmap::DashMap;
use std::sync::Arc;

/// Decoder factory for one or more [`ResourceType`]s
pub trait Loader: Send + Sync + 'static {
    /// Types this loader can decode
    fn supports(&self) -> Vec<ResourceType>;

    /// Bind `stream` to a [`Task`] that decodes `key`
    fn new_task(&self, key: &ResourceKey, stream: ByteStream) -> Result<Task, LoadError>;

    fn name(&self) -> &str {
        let name = std::any::type_name::<Self>();
        name.rsplit("::").next().unwrap_or(name)
    }
}

/// Maps each [`ResourceType`] to at most one [`Loader`], last registration wins
#[derive(Default, Clone)]
pub struct LoaderRegistry {
    loaders: Arc<DashMap<ResourceType, Arc<dyn Loader>>>,
}

impl std::fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(
                self.loaders
                    .iter()
                    .map(|entry| (entry.key().to_string(), entry.value().name().to_string())),
            )
            .finish()
    }
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `loader` for every type it advertises
    pub fn register(&self, loader: Arc<dyn Loader>) {
        let types = loader.supports();
        self.register_for(loader, &types);
    }

    /// Register `loader` for `types` only
    pub fn register_for(&self, loader: Arc<dyn Loader>, types: &[ResourceType]) {
        for ty in types {
            if let Some(previous) = self.loaders.insert(ty.clone(), loader.clone()) {
                tracing::warn!(
                    "Replaced [{}] loader for [{}] file type extension",
                    previous.name(),
                    ty.ext()
                );
            }
            tracing::info!(
                "Registered [{}] file type extension to [{}]",
                ty.ext(),
                loader.name()
            );
        }
    }

    pub fn get(&self, ty: &ResourceType) -> Option<Arc<dyn Loader>> {
        self.loaders.get(ty).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, ty: &ResourceType) -> bool {
        self.loaders.contains_key(ty)
    }

    pub fn remove(&self, ty: &ResourceType) -> Option<Arc<dyn Loader>> {
        self.loaders.remove(ty).map(|(_, loader)| loader)
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    pub fn types(&self) -> Vec<ResourceType> {
        self.loaders.iter().map(|entry| entry.key().clone()).collect()
    }
}
