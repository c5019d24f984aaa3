use thiserror::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Error)]
pub enum ContainerErrors {
    #[error("Expected a live entry, got none")]
    NonexistentEntry,
    #[error("Entry was replaced or evicted before it could be pinned")]
    StaleEntry,
}
