//! Registry of the functions a worker can execute.
//!
//! # Example
//!
//! ```ignore
//! use gearman_client::worker::{FunctionRegistry, JobError};
//!
//! let mut registry = FunctionRegistry::new();
//! registry.register_fn("upper", None, |job| async move {
//!     Ok(job.text().to_uppercase().into())
//! })?;
//! assert_eq!(registry.names(), vec!["upper"]);
//! ```

use std::collections::BTreeMap;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::job::{FnHandler, Job, JobError, JobHandler, JobResult, TypedHandler};
use crate::error::{GearmanError, Result};

struct FunctionEntry {
    handler: Box<dyn JobHandler>,
    /// Seconds the server allows per job, sent with `can_do_timeout`.
    timeout: Option<u32>,
}

/// Function name to handler map.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, FunctionEntry>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`.
    pub fn register(
        &mut self,
        name: &str,
        timeout: Option<u32>,
        handler: impl JobHandler,
    ) -> Result<()> {
        if self.functions.contains_key(name) {
            return Err(GearmanError::DuplicateFunction(name.to_string()));
        }
        self.functions.insert(
            name.to_string(),
            FunctionEntry {
                handler: Box::new(handler),
                timeout,
            },
        );
        Ok(())
    }

    /// Register a closure taking the whole job.
    pub fn register_fn<F, Fut>(&mut self, name: &str, timeout: Option<u32>, handler: F) -> Result<()>
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        self.register(name, timeout, FnHandler::new(handler))
    }

    /// Register a closure with JSON argument and result.
    pub fn register_typed<F, T, R, Fut>(
        &mut self,
        name: &str,
        timeout: Option<u32>,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<R, JobError>> + Send + 'static,
    {
        self.register(name, timeout, TypedHandler::new(handler))
    }

    /// Remove a function. Fails if it was never registered.
    pub fn unregister(&mut self, name: &str) -> Result<()> {
        self.functions
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| GearmanError::UnknownFunction(name.to_string()))
    }

    pub fn unregister_all(&mut self) {
        self.functions.clear();
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.functions.keys().map(String::as_str).collect()
    }

    /// Iterate over `(name, timeout)` pairs.
    pub fn abilities(&self) -> impl Iterator<Item = (&str, Option<u32>)> {
        self.functions
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.timeout))
    }

    pub fn timeout(&self, name: &str) -> Option<u32> {
        self.functions.get(name).and_then(|e| e.timeout)
    }

    /// Handler for `name`.
    pub fn get(&self, name: &str) -> Option<&dyn JobHandler> {
        self.functions.get(name).map(|e| e.handler.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn echo(registry: &mut FunctionRegistry, name: &str, timeout: Option<u32>) -> Result<()> {
        registry.register_fn(name, timeout, |job: Job| async move { Ok(job.payload().clone()) })
    }

    #[test]
    fn test_register_and_names() {
        let mut registry = FunctionRegistry::new();
        echo(&mut registry, "upper", None).unwrap();
        echo(&mut registry, "lower", Some(30)).unwrap();

        assert_eq!(registry.names(), vec!["lower", "upper"]);
        assert_eq!(registry.timeout("lower"), Some(30));
        assert_eq!(registry.timeout("upper"), None);
        assert!(registry.contains("upper"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = FunctionRegistry::new();
        echo(&mut registry, "upper", None).unwrap();
        let err = echo(&mut registry, "upper", None).unwrap_err();
        assert!(matches!(err, GearmanError::DuplicateFunction(n) if n == "upper"));
    }

    #[test]
    fn test_unregister() {
        let mut registry = FunctionRegistry::new();
        echo(&mut registry, "a", None).unwrap();
        echo(&mut registry, "b", None).unwrap();

        registry.unregister("a").unwrap();
        assert!(matches!(
            registry.unregister("a"),
            Err(GearmanError::UnknownFunction(_))
        ));

        registry.unregister_all();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_get_executes() {
        let mut registry = FunctionRegistry::new();
        echo(&mut registry, "echo", None).unwrap();

        let handler = registry.get("echo").unwrap();
        let out = handler
            .execute(Job::new("H:1", "echo", Bytes::from_static(b"hi")))
            .await
            .unwrap();
        assert_eq!(&out[..], b"hi");
        assert!(registry.get("missing").is_none());
    }
}
