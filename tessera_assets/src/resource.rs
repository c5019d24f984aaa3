use crate::key::ResourceKey;
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Upcast helper so `dyn Resource` can be downcast to its concrete type
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self as &dyn Any
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// An immutable value decoded from a resource file
pub trait Resource: AsAny + Debug + Send + Sync + 'static {
    /// Key the resource was loaded from
    fn key(&self) -> &ResourceKey;
}

impl dyn Resource {
    pub fn downcast_ref<T: Resource>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Resource>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Downcast a shared resource to its concrete type
pub fn downcast_arc<T: Resource>(resource: Arc<dyn Resource>) -> Option<Arc<T>> {
    resource.into_any_arc().downcast::<T>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Registry;

    #[derive(Debug)]
    struct Note {
        key: ResourceKey,
        text: &'static str,
    }

    impl Resource for Note {
        fn key(&self) -> &ResourceKey {
            &self.key
        }
    }

    #[derive(Debug)]
    struct Blob {
        key: ResourceKey,
    }

    impl Resource for Blob {
        fn key(&self) -> &ResourceKey {
            &self.key
        }
    }

    #[test]
    fn test_downcast() {
        let registry = Registry::new();
        let key = registry.key("note.txt").unwrap();
        let resource: Arc<dyn Resource> = Arc::new(Note {
            key: key.clone(),
            text: "hi",
        });
        assert_eq!(resource.key(), &key);
        assert!(resource.is::<Note>());
        assert_eq!(resource.downcast_ref::<Note>().unwrap().text, "hi");
        assert!(resource.downcast_ref::<Blob>().is_none());

        assert!(downcast_arc::<Blob>(resource.clone()).is_none());
        let note = downcast_arc::<Note>(resource).unwrap();
        assert_eq!(note.text, "hi");
    }
}
