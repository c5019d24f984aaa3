pub mod cache_map;
pub mod error;
pub mod prelude;
pub mod traits;

pub use dashmap;
