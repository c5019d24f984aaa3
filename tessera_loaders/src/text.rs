use crate::error::DecodeError;
use std::io::Read;
use std::sync::Arc;
use tessera_assets::prelude::*;

/// Plain UTF-8 text
#[derive(Debug)]
pub struct Text {
    key: ResourceKey,
    pub contents: String,
}

impl Resource for Text {
    fn key(&self) -> &ResourceKey {
        &self.key
    }
}

pub struct TextLoader {
    txt: ResourceType,
}

impl TextLoader {
    pub fn new(registry: &Registry) -> Self {
        Self {
            txt: registry.resource_type("TXT"),
        }
    }
}

fn decode(key: &ResourceKey, input: &mut dyn Read) -> Result<Text, DecodeError> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    Ok(Text {
        key: key.clone(),
        contents: String::from_utf8(bytes)?,
    })
}

impl Loader for TextLoader {
    fn supports(&self) -> Vec<ResourceType> {
        vec![self.txt.clone()]
    }

    fn new_task(&self, key: &ResourceKey, stream: ByteStream) -> Result<Task, LoadError> {
        if key.resource_type() != &self.txt {
            return Err(LoadError::UnsupportedType {
                key: key.clone(),
                ty: key.resource_type().clone(),
            });
        }
        Ok(Task::new(
            key.clone(),
            stream,
            |key: &ResourceKey, input: &mut dyn Read| -> LoadResult {
                let text = decode(key, input).map_err(|e| e.into_load_error(key, "Text"))?;
                Ok(Arc::new(text))
            },
        ))
    }
}
