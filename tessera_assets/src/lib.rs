pub mod config;
pub mod error;
pub mod key;
pub mod loader;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod resource;
pub mod source;
pub mod state;
pub mod task;

pub use config::ManagerConfig;
pub use error::{KeyError, LoadError, LoadErrorKind, ResourceError};
pub use key::{ResourceKey, ResourceType};
pub use loader::{Loader, LoaderRegistry};
pub use manager::ResourceManager;
pub use pool::WorkerPool;
pub use registry::Registry;
pub use resource::{AsAny, Resource, downcast_arc};
pub use source::{ByteSource, ByteStream, FileSource, MemorySource, read_to_string};
pub use state::LoadState;
pub use task::{Decode, LoadResult, Task};
pub use tessera_containers::error::ContainerErrors;
pub use tessera_containers::prelude::{Pinned, Reclaim};

pub mod prelude {
    pub use super::*;
}
