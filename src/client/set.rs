//! An ordered collection of tasks run together.

use std::collections::HashMap;

use bytes::Bytes;

use super::task::{Task, TaskState};
use crate::error::{GearmanError, Result};
use crate::transport::ServerAddr;

/// Tasks submitted and tracked as one batch.
///
/// The set is finished when no non-terminal task remains. Background tasks
/// never count as outstanding.
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
    outstanding: usize,
    by_unique: HashMap<String, usize>,
    by_handle: HashMap<String, usize>,
}

impl TaskSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task and return its position.
    pub fn add_task(&mut self, task: Task) -> Result<usize> {
        if self.by_unique.contains_key(task.unique()) {
            return Err(GearmanError::DuplicateTask(task.unique().to_string()));
        }

        let position = self.tasks.len();
        if !task.is_terminal() {
            self.outstanding += 1;
        }
        self.by_unique.insert(task.unique().to_string(), position);
        self.tasks.push(task);
        Ok(position)
    }

    /// True when every task is terminal.
    #[inline]
    pub fn finished(&self) -> bool {
        self.outstanding == 0
    }

    /// Number of non-terminal tasks.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Number of tasks, terminal ones included.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look a task up by unique id.
    pub fn get(&self, unique: &str) -> Option<&Task> {
        self.by_unique.get(unique).map(|&i| &self.tasks[i])
    }

    /// Task at a set position.
    pub fn at(&self, position: usize) -> Option<&Task> {
        self.tasks.get(position)
    }

    /// Tasks in the order they were added.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Find the task that owns `handle`.
    pub fn resolve_by_handle(&mut self, handle: &str) -> Result<&mut Task> {
        let position = *self
            .by_handle
            .get(handle)
            .ok_or_else(|| GearmanError::UnknownHandle(handle.to_string()))?;
        Ok(&mut self.tasks[position])
    }

    /// First task at or after `from` that has not been submitted.
    pub(crate) fn next_unsubmitted(&self, from: usize) -> Option<usize> {
        self.tasks
            .iter()
            .skip(from)
            .position(|t| t.state() == TaskState::Created)
            .map(|i| i + from)
    }

    pub(crate) fn mark_submitted(&mut self, position: usize, server: ServerAddr) {
        self.tasks[position].mark_submitted(server);
    }

    pub(crate) fn assign_handle(&mut self, position: usize, handle: String) {
        self.by_handle.insert(handle.clone(), position);
        self.tasks[position].assign_handle(handle);
    }

    pub(crate) fn update_status(&mut self, handle: &str, numerator: u64, denominator: u64) -> Result<()> {
        let task = self.resolve_by_handle(handle)?;
        if task.is_terminal() {
            tracing::warn!(handle, "status for finished task ignored");
            return Ok(());
        }
        task.update_status(numerator, denominator);
        Ok(())
    }

    pub(crate) fn complete(&mut self, handle: &str, result: Bytes) -> Result<()> {
        let task = self.resolve_by_handle(handle)?;
        if task.is_terminal() {
            tracing::warn!(handle, "completion for finished task ignored");
            return Ok(());
        }
        task.complete(result);
        self.outstanding -= 1;
        Ok(())
    }

    pub(crate) fn fail(&mut self, handle: &str) -> Result<()> {
        let task = self.resolve_by_handle(handle)?;
        if task.is_terminal() {
            tracing::warn!(handle, "failure for finished task ignored");
            return Ok(());
        }
        task.fail();
        self.outstanding -= 1;
        Ok(())
    }

    /// Fail every submitted task that has not reached a terminal state.
    pub(crate) fn fail_in_flight(&mut self) -> usize {
        let mut failed = 0;
        for task in &mut self.tasks {
            if !task.is_terminal() && task.state() != TaskState::Created {
                task.fail();
                failed += 1;
            }
        }
        self.outstanding -= failed;
        failed
    }

    /// Fail every in-flight task submitted to `server`. Returns how many.
    pub(crate) fn fail_submitted_to(&mut self, server: &ServerAddr) -> usize {
        let mut failed = 0;
        for task in &mut self.tasks {
            if !task.is_terminal() && task.state() != TaskState::Created && task.server() == Some(server) {
                task.fail();
                failed += 1;
            }
        }
        self.outstanding -= failed;
        failed
    }
}
