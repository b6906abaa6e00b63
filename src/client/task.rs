//! A single unit of work submitted by a client.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::transport::ServerAddr;

/// Priority/scheduling class of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobClass {
    /// Foreground, normal priority. Waits for the result.
    #[default]
    Normal,
    /// Foreground, ahead of normal jobs.
    High,
    /// Foreground, behind normal jobs.
    Low,
    /// Fire and forget.
    Background,
    HighBackground,
    LowBackground,
    /// Background task to run at the given unix timestamp (seconds).
    Epoch(u64),
}

impl JobClass {
    /// Submission command for this class.
    pub fn submit_command(&self) -> &'static str {
        match self {
            JobClass::Normal => "submit_job",
            JobClass::High => "submit_job_high",
            JobClass::Low => "submit_job_low",
            JobClass::Background => "submit_job_bg",
            JobClass::HighBackground => "submit_job_high_bg",
            JobClass::LowBackground => "submit_job_low_bg",
            JobClass::Epoch(_) => "submit_job_epoch",
        }
    }

    /// Background classes only wait for the handle.
    #[inline]
    pub fn is_background(&self) -> bool {
        matches!(
            self,
            JobClass::Background
                | JobClass::HighBackground
                | JobClass::LowBackground
                | JobClass::Epoch(_)
        )
    }
}

/// Lifecycle of a task.
///
/// `Created → Submitted → HandleAssigned → Running → Completed | Failed`.
/// `Running` is skipped if no `work_status` arrives before the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not yet sent to any server.
    Created,
    /// Sent, waiting for `job_created`.
    Submitted,
    /// Handle known, no status yet.
    HandleAssigned,
    /// At least one `work_status` received.
    Running,
    /// Terminal. Result available for foreground tasks.
    Completed,
    /// Terminal. The job failed or its server went away.
    Failed,
}

/// One job submission and everything the server reported about it.
#[derive(Debug, Clone)]
pub struct Task {
    function: String,
    payload: Bytes,
    unique: String,
    class: JobClass,
    handle: Option<String>,
    state: TaskState,
    numerator: u64,
    denominator: u64,
    result: Option<Bytes>,
    server: Option<ServerAddr>,
}

impl Task {
    /// Create a normal-priority task with a generated unique id.
    pub fn new(function: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            function: function.into(),
            payload: payload.into(),
            unique: generate_unique(),
            class: JobClass::Normal,
            handle: None,
            state: TaskState::Created,
            numerator: 0,
            denominator: 0,
            result: None,
            server: None,
        }
    }

    /// Create a task whose payload is `value` serialized as JSON.
    pub fn json<T: Serialize>(function: impl Into<String>, value: &T) -> Result<Self> {
        Ok(Self::new(function, serde_json::to_vec(value)?))
    }

    /// Create a fire-and-forget task.
    pub fn background(function: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(function, payload).with_class(JobClass::Background)
    }

    /// Create a background task scheduled for `when` (unix seconds).
    pub fn epoch(function: impl Into<String>, payload: impl Into<Bytes>, when: u64) -> Self {
        Self::new(function, payload).with_class(JobClass::Epoch(when))
    }

    /// Replace the generated unique id.
    pub fn with_unique(mut self, unique: impl Into<String>) -> Self {
        self.unique = unique.into();
        self
    }

    /// Set the job class.
    pub fn with_class(mut self, class: JobClass) -> Self {
        self.class = class;
        self
    }

    /// Function name the task calls.
    #[inline]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Argument bytes sent with the submission.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Unique id, generated when not given.
    #[inline]
    pub fn unique(&self) -> &str {
        &self.unique
    }

    /// Priority/scheduling class.
    #[inline]
    pub fn class(&self) -> JobClass {
        self.class
    }

    /// Server-assigned handle, once `job_created` arrived.
    #[inline]
    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Last reported `(numerator, denominator)`.
    #[inline]
    pub fn progress(&self) -> (u64, u64) {
        (self.numerator, self.denominator)
    }

    /// Result bytes of a completed task.
    #[inline]
    pub fn result(&self) -> Option<&Bytes> {
        self.result.as_ref()
    }

    /// Decode the result as JSON.
    pub fn result_json<T: DeserializeOwned>(&self) -> Option<Result<T>> {
        self.result
            .as_ref()
            .map(|r| serde_json::from_slice(r).map_err(Into::into))
    }

    /// Server the task was submitted to.
    #[inline]
    pub fn server(&self) -> Option<&ServerAddr> {
        self.server.as_ref()
    }

    #[inline]
    pub fn is_background(&self) -> bool {
        self.class.is_background()
    }

    /// Completed, failed, or background (terminal from the start).
    pub fn is_terminal(&self) -> bool {
        self.is_background() || matches!(self.state, TaskState::Completed | TaskState::Failed)
    }

    pub(crate) fn mark_submitted(&mut self, server: ServerAddr) {
        self.state = TaskState::Submitted;
        self.server = Some(server);
    }

    pub(crate) fn assign_handle(&mut self, handle: String) {
        self.handle = Some(handle);
        self.state = if self.is_background() {
            TaskState::Completed
        } else {
            TaskState::HandleAssigned
        };
    }

    pub(crate) fn update_status(&mut self, numerator: u64, denominator: u64) {
        self.numerator = numerator;
        self.denominator = denominator;
        self.state = TaskState::Running;
    }

    pub(crate) fn complete(&mut self, result: Bytes) {
        self.result = Some(result);
        self.state = TaskState::Completed;
    }

    pub(crate) fn fail(&mut self) {
        self.state = TaskState::Failed;
    }
}

/// Unique id of the form `<pid>_<uuid>`.
fn generate_unique() -> String {
    format!("{}_{}", std::process::id(), Uuid::new_v4().simple())
}
