//! Built in decoders for [`tessera_assets`]

pub mod error;
pub mod font;
pub mod png;
pub mod shader;
pub mod text;

pub use error::DecodeError;
pub use font::{Font, FontLoader, Glyph};
pub use png::{Image, ImageLoader, PixelFormat};
pub use shader::{ShaderLoader, ShaderSource, ShaderStage};
pub use text::{Text, TextLoader};

use std::sync::Arc;
use tessera_assets::ResourceManager;

/// Register every built in loader with `manager`
pub fn register_defaults(manager: &ResourceManager) {
    let registry = manager.registry();
    manager.register_loader(Arc::new(TextLoader::new(registry)));
    manager.register_loader(Arc::new(ShaderLoader::new(registry)));
    manager.register_loader(Arc::new(ImageLoader::new(registry)));
    manager.register_loader(Arc::new(FontLoader::new(registry)));
    tracing::debug!(
        "Registered {} built in file types",
        manager.loaders().len()
    );
}
