//! Jobs handed to workers and the handler trait that executes them.

use std::borrow::Cow;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::error::{GearmanError, Result};
use crate::protocol::Packet;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of one job: result bytes, or why it did not produce any.
pub type JobResult = std::result::Result<Bytes, JobError>;

/// Failure returned by a job handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The job failed. The server is told `work_fail` and the worker keeps going.
    #[error("job failed: {0}")]
    Failed(String),

    /// The worker cannot continue. The job is failed and the loop ends.
    #[error("fatal handler error: {0}")]
    Fatal(String),
}

impl JobError {
    /// Job-level failure. Reported with `work_fail`; the worker keeps going.
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }

    /// Unrecoverable error. Nothing is reported and the work loop ends.
    pub fn fatal(message: impl Into<String>) -> Self {
        JobError::Fatal(message.into())
    }
}

/// Argument of a job, decoded once when the job is assigned.
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    /// The argument parsed as JSON.
    Json(Value),
    /// Anything else.
    Raw(Bytes),
}

impl Workload {
    /// Parse `data` as JSON, falling back to raw bytes.
    pub fn decode(data: &Bytes) -> Self {
        match serde_json::from_slice(data) {
            Ok(value) => Workload::Json(value),
            Err(_) => Workload::Raw(data.clone()),
        }
    }

    /// Decoded JSON value, if the argument parsed as JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Workload::Json(value) => Some(value),
            Workload::Raw(_) => None,
        }
    }
}

/// A job assigned to this worker.
#[derive(Debug, Clone)]
pub struct Job {
    handle: String,
    function: String,
    payload: Bytes,
    workload: Workload,
}

impl Job {
    pub fn new(handle: impl Into<String>, function: impl Into<String>, payload: Bytes) -> Self {
        let workload = Workload::decode(&payload);
        Self {
            handle: handle.into(),
            function: function.into(),
            payload,
            workload,
        }
    }

    /// Build a job from a `job_assign` packet.
    pub(crate) fn from_assign(packet: &Packet) -> Result<Self> {
        let handle = packet.field_str("handle").unwrap_or_default();
        if handle.is_empty() {
            return Err(GearmanError::UnexpectedResponse(
                "job_assign without a handle".to_string(),
            ));
        }
        Ok(Self::new(
            handle.into_owned(),
            packet.field_str("func").unwrap_or_default().into_owned(),
            packet.field("arg").cloned().unwrap_or_default(),
        ))
    }

    /// Server-assigned handle.
    #[inline]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Registered function name.
    #[inline]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Raw argument bytes, regardless of how they decoded.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn workload(&self) -> &Workload {
        &self.workload
    }

    /// Argument as text (lossy for non-UTF-8 bytes).
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Deserialize the argument as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, JobError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| JobError::Failed(format!("invalid JSON argument: {e}")))
    }
}

/// Executes jobs for one function.
pub trait JobHandler: Send + Sync + 'static {
    fn execute(&self, job: Job) -> BoxFuture<'static, JobResult>;
}

/// Adapter for closures taking the whole [`Job`].
pub struct FnHandler<F, Fut>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> JobHandler for FnHandler<F, Fut>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    fn execute(&self, job: Job) -> BoxFuture<'static, JobResult> {
        Box::pin((self.handler)(job))
    }
}

/// Adapter that decodes the argument from JSON and encodes the result as JSON.
///
/// An argument that does not decode as `T` fails the job without calling
/// the handler.
pub struct TypedHandler<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, JobError>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, R, Fut> TypedHandler<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, JobError>> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, Fut> JobHandler for TypedHandler<F, T, R, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = std::result::Result<R, JobError>> + Send + 'static,
{
    fn execute(&self, job: Job) -> BoxFuture<'static, JobResult> {
        let parsed: T = match job.json() {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        let fut = (self.handler)(parsed);
        Box::pin(async move {
            let value = fut.await?;
            serde_json::to_vec(&value)
                .map(Bytes::from)
                .map_err(|e| JobError::Failed(format!("result is not serializable: {e}")))
        })
    }
}
