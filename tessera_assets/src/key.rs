use derivative::Derivative;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tessera_containers::prelude::ReleaseTicket;

#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct TypeInner {
    pub(crate) id: u64,
    pub(crate) ext: String,
    #[derivative(Debug = "ignore")]
    pub(crate) _ticket: ReleaseTicket<String>,
}

/// Interned identity of a file extension class such as `PNG`
///
/// Equality and hashing go through a process-wide unique id, never through the extension
/// string, so types from different [`crate::Registry`]s are always distinct.
#[derive(Debug, Clone)]
pub struct ResourceType {
    pub(crate) inner: Arc<TypeInner>,
}

impl ResourceType {
    /// Upper-cased extension without the dot
    pub fn ext(&self) -> &str {
        &self.inner.ext
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }
}

impl PartialEq for ResourceType {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ResourceType {}

impl Hash for ResourceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.inner.ext)
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct KeyInner {
    pub(crate) id: u64,
    pub(crate) path: String,
    pub(crate) canonical: String,
    pub(crate) ty: ResourceType,
    #[derivative(Debug = "ignore")]
    pub(crate) _ticket: ReleaseTicket<String>,
}

/// Interned identity of a normalized resource path
///
/// Cheap to clone. Two keys are equal only if they were interned from the same canonical path
/// by the same [`crate::Registry`].
#[derive(Debug, Clone)]
pub struct ResourceKey {
    pub(crate) inner: Arc<KeyInner>,
}

impl ResourceKey {
    /// Path with `/` separators, spelled as it was first requested
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Lower-cased path the key is interned under
    pub fn canonical(&self) -> &str {
        &self.inner.canonical
    }

    pub fn resource_type(&self) -> &ResourceType {
        &self.inner.ty
    }

    /// File name including the extension
    pub fn name(&self) -> &str {
        let path = self.path();
        path.rsplit_once('/').map_or(path, |(_, name)| name)
    }

    /// File name without the extension
    pub fn stem(&self) -> &str {
        let name = self.name();
        name.rsplit_once('.').map_or(name, |(stem, _)| stem)
    }

    pub fn extension(&self) -> &str {
        self.inner.ty.ext()
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }
}

impl PartialEq for ResourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ResourceKey {}

impl Hash for ResourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.inner.path)
    }
}

/// Separator-normalized spelling used for I/O
pub(crate) fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// Identity string a path is interned under
pub(crate) fn canonicalize(path: &str) -> String {
    normalize(path).to_lowercase()
}

/// Extension of the final path component, if any
pub(crate) fn extension_of(path: &str) -> Option<&str> {
    let name = path.rsplit_once('/').map_or(path, |(_, name)| name);
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => Some(ext),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(normalize("Textures\\Ui\\Button.PNG"), "Textures/Ui/Button.PNG");
        assert_eq!(canonicalize("Textures\\Ui\\Button.PNG"), "textures/ui/button.png");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a/b/c.txt"), Some("txt"));
        assert_eq!(extension_of("archive.tar.gz"), Some("gz"));
        assert_eq!(extension_of("dir.d/readme"), None);
        assert_eq!(extension_of("trailing."), None);
        assert_eq!(extension_of(""), None);
    }
}
