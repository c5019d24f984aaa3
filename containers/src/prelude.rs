pub use super::cache_map::{
    CacheConfig, CacheEntry, CacheMap, ConcurrentCache, LocalCache, Pinned, Reclaim,
    ReleaseTicket,
};
pub use super::error;
pub use super::traits::*;
pub use dashmap;
