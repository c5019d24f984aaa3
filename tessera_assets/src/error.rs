use crate::key::{ResourceKey, ResourceType};
use std::path::PathBuf;

/// Failure to turn a path into a [`ResourceKey`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Resource path is empty")]
    EmptyPath,
    #[error("Resource path [{0}] has no file extension")]
    MissingExtension(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LoadErrorKind {
    NotFound,
    UnsupportedType,
    Initialization,
    Aborted,
    TypeMismatch,
}

/// Why a resource could not be produced
///
/// Cloned out to every caller waiting on the same load.
#[derive(thiserror::Error, Debug, Clone)]
pub enum LoadError {
    #[error("Resource file not found - {}", path.display())]
    NotFound { key: ResourceKey, path: PathBuf },
    #[error("No loader registered for {ty} required by {key}")]
    UnsupportedType { key: ResourceKey, ty: ResourceType },
    #[error("Unable to initialize {key}: {reason}")]
    Initialization { key: ResourceKey, reason: String },
    #[error("Loading of {key} was aborted")]
    Aborted { key: ResourceKey },
    #[error("{key} is not a {expected}")]
    TypeMismatch {
        key: ResourceKey,
        expected: &'static str,
    },
}

impl LoadError {
    pub fn kind(&self) -> LoadErrorKind {
        match self {
            LoadError::NotFound { .. } => LoadErrorKind::NotFound,
            LoadError::UnsupportedType { .. } => LoadErrorKind::UnsupportedType,
            LoadError::Initialization { .. } => LoadErrorKind::Initialization,
            LoadError::Aborted { .. } => LoadErrorKind::Aborted,
            LoadError::TypeMismatch { .. } => LoadErrorKind::TypeMismatch,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        match self {
            LoadError::NotFound { key, .. }
            | LoadError::UnsupportedType { key, .. }
            | LoadError::Initialization { key, .. }
            | LoadError::Aborted { key }
            | LoadError::TypeMismatch { key, .. } => key,
        }
    }

    pub fn initialization(key: &ResourceKey, reason: impl Into<String>) -> Self {
        LoadError::Initialization {
            key: key.clone(),
            reason: reason.into(),
        }
    }
}

/// Failure of the path based conveniences on [`crate::ResourceManager`]
#[derive(thiserror::Error, Debug, Clone)]
pub enum ResourceError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Load(#[from] LoadError),
}
