use crate::error::DecodeError;
use std::io::Read;
use std::sync::Arc;
use tessera_assets::prelude::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
    Compute,
}

/// GLSL source of a single shader stage
#[derive(Debug)]
pub struct ShaderSource {
    key: ResourceKey,
    pub stage: ShaderStage,
    pub source: String,
}

impl ShaderSource {
    /// File name without the extension
    pub fn name(&self) -> &str {
        self.key.stem()
    }
}

impl Resource for ShaderSource {
    fn key(&self) -> &ResourceKey {
        &self.key
    }
}

/// Loads `.vert`, `.frag`, `.geom` and `.comp` sources
pub struct ShaderLoader {
    stages: [(ResourceType, ShaderStage); 4],
}

impl ShaderLoader {
    pub fn new(registry: &Registry) -> Self {
        Self {
            stages: [
                (registry.resource_type("VERT"), ShaderStage::Vertex),
                (registry.resource_type("FRAG"), ShaderStage::Fragment),
                (registry.resource_type("GEOM"), ShaderStage::Geometry),
                (registry.resource_type("COMP"), ShaderStage::Compute),
            ],
        }
    }

    fn stage_of(&self, ty: &ResourceType) -> Option<ShaderStage> {
        self.stages
            .iter()
            .find(|(supported, _)| supported == ty)
            .map(|(_, stage)| *stage)
    }
}

impl Loader for ShaderLoader {
    fn supports(&self) -> Vec<ResourceType> {
        self.stages.iter().map(|(ty, _)| ty.clone()).collect()
    }

    fn new_task(&self, key: &ResourceKey, stream: ByteStream) -> Result<Task, LoadError> {
        let stage = self
            .stage_of(key.resource_type())
            .ok_or_else(|| LoadError::UnsupportedType {
                key: key.clone(),
                ty: key.resource_type().clone(),
            })?;
        Ok(Task::new(
            key.clone(),
            stream,
            move |key: &ResourceKey, input: &mut dyn Read| -> LoadResult {
                let mut bytes = Vec::new();
                let source = input
                    .read_to_end(&mut bytes)
                    .map_err(DecodeError::from)
                    .and_then(|_| String::from_utf8(bytes).map_err(DecodeError::from))
                    .map_err(|e| e.into_load_error(key, "Shader"))?;
                Ok(Arc::new(ShaderSource {
                    key: key.clone(),
                    stage,
                    source,
                }))
            },
        ))
    }
}
