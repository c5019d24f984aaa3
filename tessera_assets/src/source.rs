use crate::error::LoadError;
use crate::key::ResourceKey;
use dashmap::DashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Readable byte stream handed to a decoder, closed when dropped
pub type ByteStream = Box<dyn Read + Send>;

/// Opens the raw bytes behind a [`ResourceKey`]
pub trait ByteSource: Send + Sync + 'static {
    fn open(&self, key: &ResourceKey) -> Result<ByteStream, LoadError>;
}

/// Resolves keys against a root directory on disk
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `key` lives on disk
    pub fn resolve(&self, key: &ResourceKey) -> PathBuf {
        self.root.join(key.path().trim_start_matches('/'))
    }
}

impl ByteSource for FileSource {
    fn open(&self, key: &ResourceKey) -> Result<ByteStream, LoadError> {
        let path = self.resolve(key);
        let absolute = std::path::absolute(&path).unwrap_or_else(|_| path.clone());
        match File::open(&path) {
            Ok(file) if !path.is_dir() => Ok(Box::new(BufReader::new(file))),
            _ => {
                tracing::warn!("Resource file not found - {}", absolute.display());
                Err(LoadError::NotFound {
                    key: key.clone(),
                    path: absolute,
                })
            }
        }
    }
}

/// In-memory blobs keyed by canonical path
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    blobs: Arc<DashMap<String, Arc<[u8]>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `bytes` under `path`, matched case-insensitively like keys are
    pub fn insert(&self, path: &str, bytes: impl Into<Arc<[u8]>>) {
        self.blobs
            .insert(crate::key::canonicalize(path), bytes.into());
    }

    pub fn remove(&self, path: &str) -> bool {
        self.blobs
            .remove(&crate::key::canonicalize(path))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

/// Shares the blob without copying it
struct SharedBytes(Arc<[u8]>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl ByteSource for MemorySource {
    fn open(&self, key: &ResourceKey) -> Result<ByteStream, LoadError> {
        match self.blobs.get(key.canonical()) {
            Some(bytes) => Ok(Box::new(Cursor::new(SharedBytes(bytes.value().clone())))),
            None => {
                tracing::warn!("Resource file not found - {}", key.path());
                Err(LoadError::NotFound {
                    key: key.clone(),
                    path: PathBuf::from(key.path()),
                })
            }
        }
    }
}

/// Read a whole stream as UTF-8 text
pub fn read_to_string(key: &ResourceKey, mut stream: impl Read) -> Result<String, LoadError> {
    let mut text = String::new();
    stream
        .read_to_string(&mut text)
        .map_err(|e| LoadError::initialization(key, e.to_string()))?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LoadErrorKind, Registry};

    #[test]
    fn test_file_source() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("text"))?;
        std::fs::write(dir.path().join("text/Hello.txt"), "hello")?;

        let registry = Registry::new();
        let source = FileSource::new(dir.path());
        let key = registry.key("text\\Hello.txt")?;
        let text = read_to_string(&key, source.open(&key)?)?;
        assert_eq!(text, "hello");

        let missing = registry.key("text/missing.txt")?;
        let err = source.open(&missing).err().unwrap();
        assert_eq!(err.kind(), LoadErrorKind::NotFound);
        match err {
            LoadError::NotFound { path, .. } => {
                assert!(path.is_absolute());
                assert!(path.ends_with("text/missing.txt"));
            }
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_directory_is_not_found() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("folder.txt"))?;
        let registry = Registry::new();
        let key = registry.key("folder.txt")?;
        let err = FileSource::new(dir.path()).open(&key).err().unwrap();
        assert_eq!(err.kind(), LoadErrorKind::NotFound);
        Ok(())
    }

    #[test]
    fn test_memory_source() -> anyhow::Result<()> {
        let registry = Registry::new();
        let source = MemorySource::new();
        source.insert("Data/Blob.bin", b"\x01\x02\x03".as_slice());
        assert_eq!(source.len(), 1);

        let key = registry.key("data\\blob.BIN")?;
        let mut bytes = Vec::new();
        source.open(&key)?.read_to_end(&mut bytes)?;
        assert_eq!(bytes, vec![1, 2, 3]);

        assert!(source.remove("data/blob.bin"));
        assert_eq!(source.open(&key).err().unwrap().kind(), LoadErrorKind::NotFound);
        Ok(())
    }
}
