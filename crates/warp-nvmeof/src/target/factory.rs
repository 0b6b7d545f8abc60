//! Backend registry keyed by type name

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::sleepy::DEFAULT_SLEEP;
use super::testable::{DEFAULT_TESTABLE_SIZE, DEFAULT_TESTABLE_SLEEP};
use super::{
    FileTarget, MemoryTarget, NullTarget, SleepyTarget, Target, TargetOptions, TestableTarget,
    WorkQueue,
};
use crate::error::{NvmeOfError, NvmeOfResult};

/// Builds a backend from its options
pub type TargetConstructor =
    Box<dyn Fn(&TargetOptions) -> NvmeOfResult<Arc<dyn Target>> + Send + Sync>;

/// Registry of backend constructors
///
/// Constructed explicitly and handed to whoever builds targets; there is no
/// process-wide instance.
pub struct TargetFactory {
    providers: HashMap<String, TargetConstructor>,
}

impl TargetFactory {
    /// Registry without any providers
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registry with the built-in backends: `null`, `mem`, `file`, `sleepy`,
    /// `testable`
    pub fn with_defaults() -> Self {
        let mut factory = Self::empty();
        factory.register("null", |_| Ok(Arc::new(NullTarget::new())));
        factory.register("mem", create_memory);
        factory.register("file", create_file);
        factory.register("sleepy", |options| {
            let delay = Duration::from_millis(
                options.u64("sleep", DEFAULT_SLEEP.as_millis() as u64),
            );
            Ok(Arc::new(WorkQueue::new(Arc::new(SleepyTarget::new(delay)))))
        });
        factory.register("testable", create_testable);
        factory
    }

    /// Add or replace the provider for `kind`
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&TargetOptions) -> NvmeOfResult<Arc<dyn Target>> + Send + Sync + 'static,
    {
        self.providers.insert(kind.into(), Box::new(constructor));
    }

    /// Build a backend of type `kind`
    pub fn create(&self, kind: &str, options: &TargetOptions) -> NvmeOfResult<Arc<dyn Target>> {
        let constructor = self.providers.get(kind).ok_or_else(|| {
            NvmeOfError::InvalidParameter(format!("unknown target type '{}'", kind))
        })?;
        debug!(kind, ?options, "creating target");
        constructor(options)
    }

    /// Registered type names, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for TargetFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for TargetFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetFactory")
            .field("kinds", &self.kinds())
            .finish()
    }
}

fn size_option(options: &TargetOptions, default: Option<u64>) -> NvmeOfResult<usize> {
    let size = match (options.string("size"), default) {
        (Some(_), _) => options.u64("size", 0),
        (None, Some(default)) => default,
        (None, None) => {
            return Err(NvmeOfError::InvalidParameter(
                "missing 'size' option".into(),
            ))
        }
    };
    if size == 0 {
        return Err(NvmeOfError::InvalidParameter(
            "'size' must be a positive number of bytes".into(),
        ));
    }
    usize::try_from(size)
        .map_err(|_| NvmeOfError::InvalidParameter(format!("size {} too large", size)))
}

fn create_memory(options: &TargetOptions) -> NvmeOfResult<Arc<dyn Target>> {
    let size = size_option(options, None)?;
    Ok(Arc::new(MemoryTarget::new(size)))
}

fn create_testable(options: &TargetOptions) -> NvmeOfResult<Arc<dyn Target>> {
    let size = size_option(options, Some(DEFAULT_TESTABLE_SIZE))?;
    let delay = Duration::from_millis(
        options.u64("sleep", DEFAULT_TESTABLE_SLEEP.as_millis() as u64),
    );
    Ok(Arc::new(TestableTarget::new(size, delay)))
}

fn create_file(options: &TargetOptions) -> NvmeOfResult<Arc<dyn Target>> {
    let image = options
        .string("image")
        .ok_or_else(|| NvmeOfError::InvalidParameter("missing 'image' option".into()))?;
    let target = FileTarget::open(image)?;
    Ok(Arc::new(WorkQueue::new(Arc::new(target))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::testing::conformance;
    use std::io::Write;

    #[test]
    fn test_default_kinds() {
        let factory = TargetFactory::with_defaults();
        assert_eq!(
            factory.kinds(),
            vec!["file", "mem", "null", "sleepy", "testable"]
        );
    }

    #[tokio::test]
    async fn test_create_builtin_targets() {
        let factory = TargetFactory::with_defaults();

        let null = factory.create("null", &TargetOptions::new()).unwrap();
        conformance(null.as_ref()).await;

        let mem = factory
            .create("mem", &TargetOptions::new().with("size", 1 << 20))
            .unwrap();
        assert_eq!(mem.size(), 1 << 20);

        let testable = factory
            .create(
                "testable",
                &TargetOptions::new().with("size", 1 << 20).with("sleep", 0),
            )
            .unwrap();
        conformance(testable.as_ref()).await;

        let sleepy = factory
            .create("sleepy", &TargetOptions::new().with("sleep", 1))
            .unwrap();
        conformance(sleepy.as_ref()).await;
        sleepy.close().await;

        let mut img = tempfile::NamedTempFile::new().unwrap();
        img.write_all(&[0u8; 8192]).unwrap();
        let file = factory
            .create(
                "file",
                &TargetOptions::new().with("image", img.path().display()),
            )
            .unwrap();
        conformance(file.as_ref()).await;
        assert_eq!(file.runtime_details()[0].key, "Image");
        file.close().await;
    }

    #[test]
    fn test_invalid_options() {
        let factory = TargetFactory::with_defaults();
        assert!(matches!(
            factory.create("mem", &TargetOptions::new()),
            Err(NvmeOfError::InvalidParameter(_))
        ));
        assert!(matches!(
            factory.create("file", &TargetOptions::new()),
            Err(NvmeOfError::InvalidParameter(_))
        ));
        assert!(matches!(
            factory.create("rbd", &TargetOptions::new()),
            Err(NvmeOfError::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_register_custom_provider() {
        let mut factory = TargetFactory::empty();
        factory.register("tiny", |_| Ok(Arc::new(MemoryTarget::new(4096))));
        let target = factory.create("tiny", &TargetOptions::new()).unwrap();
        assert_eq!(target.size(), 4096);
    }
}
