use crate::error::LoadError;
use crate::key::ResourceKey;
use crate::resource::Resource;
use crate::source::ByteStream;
use derivative::Derivative;
use std::io::Read;
use std::sync::Arc;

pub type LoadResult = Result<Arc<dyn Resource>, LoadError>;

/// Format specific decoding of a byte stream into a resource
pub trait Decode: Send {
    fn decode(&mut self, key: &ResourceKey, input: &mut dyn Read) -> LoadResult;
}

impl<F> Decode for F
where
    F: FnMut(&ResourceKey, &mut dyn Read) -> LoadResult + Send,
{
    fn decode(&mut self, key: &ResourceKey, input: &mut dyn Read) -> LoadResult {
        self(key, input)
    }
}

/// One unit of decode work: a key, its open byte stream and the decoder for it
///
/// The decoder runs at most once. The stream is closed right after it returns, whether it
/// succeeded or not, and later calls hand back the memoized outcome.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Task {
    key: ResourceKey,
    #[derivative(Debug = "ignore")]
    input: Option<ByteStream>,
    #[derivative(Debug = "ignore")]
    decoder: Box<dyn Decode>,
    outcome: Option<LoadResult>,
}

impl Task {
    pub fn new(key: ResourceKey, input: ByteStream, decoder: impl Decode + 'static) -> Self {
        Self {
            key,
            input: Some(input),
            decoder: Box::new(decoder),
            outcome: None,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Outcome of the decode, if [`Task::call`] already ran
    pub fn outcome(&self) -> Option<&LoadResult> {
        self.outcome.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.outcome.is_some()
    }

    /// Run the decoder once, closing the stream afterwards
    pub fn call(&mut self) -> LoadResult {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let outcome = match self.input.take() {
            Some(mut input) => {
                let outcome = self.decoder.decode(&self.key, &mut input);
                drop(input);
                outcome
            }
            None => Err(LoadError::initialization(
                &self.key,
                "input stream was already closed",
            )),
        };
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Run the task on the calling thread
    pub fn load_inline(mut self) -> LoadResult {
        self.call()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Registry;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Text {
        key: ResourceKey,
        contents: String,
    }

    impl Resource for Text {
        fn key(&self) -> &ResourceKey {
            &self.key
        }
    }

    /// Counts how many times it was dropped
    struct Tracked {
        inner: Cursor<Vec<u8>>,
        closed: Arc<AtomicUsize>,
    }

    impl Read for Tracked {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tracked(bytes: &[u8]) -> (ByteStream, Arc<AtomicUsize>) {
        let closed = Arc::new(AtomicUsize::new(0));
        let stream = Tracked {
            inner: Cursor::new(bytes.to_vec()),
            closed: closed.clone(),
        };
        (Box::new(stream), closed)
    }

    #[test]
    fn test_call_memoizes_and_closes_once() {
        let registry = Registry::new();
        let key = registry.key("hello.txt").unwrap();
        let (stream, closed) = tracked(b"hello");
        let runs = Arc::new(AtomicUsize::new(0));
        let decoder_runs = runs.clone();
        let mut task = Task::new(
            key.clone(),
            stream,
            move |key: &ResourceKey, input: &mut dyn Read| -> LoadResult {
                decoder_runs.fetch_add(1, Ordering::SeqCst);
                let mut contents = String::new();
                input
                    .read_to_string(&mut contents)
                    .map_err(|e| LoadError::initialization(key, e.to_string()))?;
                Ok(Arc::new(Text {
                    key: key.clone(),
                    contents,
                }))
            },
        );
        assert!(!task.is_done());
        let first = task.call().unwrap();
        let second = task.call().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.downcast_ref::<Text>().unwrap().contents, "hello");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(task.is_done());
        drop(task);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_call_still_closes_stream() {
        let registry = Registry::new();
        let key = registry.key("broken.txt").unwrap();
        let (stream, closed) = tracked(b"garbage");
        let mut task = Task::new(
            key.clone(),
            stream,
            |key: &ResourceKey, _input: &mut dyn Read| -> LoadResult {
                Err(LoadError::initialization(key, "bad header"))
            },
        );
        let err = task.call().unwrap_err();
        assert_eq!(err.kind(), crate::LoadErrorKind::Initialization);
        assert_eq!(err.key(), &key);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        // memoized failure, decoder is not run again
        assert!(task.call().is_err());
        assert!(matches!(task.outcome(), Some(Err(_))));
    }

    #[test]
    fn test_unrun_task_closes_stream_on_drop() {
        let registry = Registry::new();
        let key = registry.key("skipped.txt").unwrap();
        let (stream, closed) = tracked(b"");
        let task = Task::new(key, stream, |key: &ResourceKey, _: &mut dyn Read| -> LoadResult {
            Err(LoadError::initialization(key, "never run"))
        });
        drop(task);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
