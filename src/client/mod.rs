//! Client builder and run loop.
//!
//! The [`ClientBuilder`] configures servers and timeouts. The [`Client`]
//! submits a [`TaskSet`] and drives it:
//! 1. Connect to every configured server, dropping unreachable ones
//! 2. Submit tasks to servers picked by the [`ServerSelector`]
//! 3. Wait for readiness across all connections
//! 4. Decode responses and apply them to the tasks that caused them
//!
//! # Example
//!
//! ```ignore
//! use gearman_client::{Client, Task, TaskSet};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::builder().server("localhost").build()?;
//!
//!     let mut set = TaskSet::new();
//!     set.add_task(Task::new("upper", "hello").with_unique("h1"))?;
//!     client.run(&mut set, Some(Duration::from_secs(5))).await?;
//!
//!     println!("{:?}", set.get("h1").and_then(|t| t.result()));
//!     Ok(())
//! }
//! ```

mod selector;
mod set;
mod task;

pub use selector::{RandomSelector, RoundRobinSelector, ServerSelector};
pub use set::TaskSet;
pub use task::{JobClass, Task, TaskState};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio::time::Instant;

use crate::error::{GearmanError, Result};
use crate::protocol::{CommandTable, Packet};
use crate::transport::{wait_any_readable, Connection, ServerAddr, ServerList};

/// Default connect timeout per server.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on a single readiness wait inside `run`.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    servers: ServerList,
    connect_timeout: Duration,
    run_timeout: Option<Duration>,
    selector: Box<dyn ServerSelector>,
    table: Option<Arc<CommandTable>>,
    error: Option<GearmanError>,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            servers: ServerList::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            run_timeout: None,
            selector: Box::new(RandomSelector),
            table: None,
            error: None,
        }
    }

    /// Add one `host[:port]` server.
    ///
    /// Parse errors and duplicates are reported by `build()`.
    pub fn server(mut self, server: &str) -> Self {
        if let Err(e) = self.servers.add(server) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Add comma-separated `host[:port]` servers.
    pub fn servers(mut self, servers: &str) -> Self {
        if let Err(e) = self.servers.add_many(servers) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Set the connect timeout per server.
    ///
    /// Default: 2 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the run timeout used by the one-shot `do_*` calls.
    ///
    /// Default: none (wait until the job finishes)
    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Replace the server selection policy.
    ///
    /// Default: [`RandomSelector`]
    pub fn selector(mut self, selector: impl ServerSelector + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    /// Use a specific command table instead of the standard one.
    pub fn command_table(mut self, table: Arc<CommandTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Build the client, reporting the first configuration error.
    pub fn build(self) -> Result<Client> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(Client {
            servers: self.servers,
            connect_timeout: self.connect_timeout,
            run_timeout: self.run_timeout,
            selector: self.selector,
            table: self
                .table
                .unwrap_or_else(|| Arc::new(CommandTable::standard())),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Submits task sets to job servers and collects their results.
pub struct Client {
    servers: ServerList,
    connect_timeout: Duration,
    run_timeout: Option<Duration>,
    selector: Box<dyn ServerSelector>,
    table: Arc<CommandTable>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Configured servers.
    pub fn servers(&self) -> &ServerList {
        &self.servers
    }

    /// Submit every task in `set` and process responses.
    ///
    /// Returns once the set is finished and every submission has its handle,
    /// or when `timeout` elapses. A timeout is not an error; the set is left
    /// partially complete. Connections are closed before returning.
    ///
    /// Handles are only valid on the connection that created them, so tasks
    /// left in flight by an earlier run of the same set are failed first.
    pub async fn run(&mut self, set: &mut TaskSet, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);

        let stale = set.fail_in_flight();
        if stale > 0 {
            tracing::warn!(failed = stale, "failing tasks left in flight by a previous run");
        }

        let mut conns = self.connect_all(deadline).await?;

        let result = self.run_loop(set, &mut conns, deadline).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "run aborted");
        }

        for conn in &mut conns {
            conn.close();
        }
        result
    }

    /// Connect to every server at once. No attempt outlives `deadline`.
    async fn connect_all(&self, deadline: Option<Instant>) -> Result<Vec<Connection>> {
        let connect_timeout = match deadline {
            Some(deadline) => self
                .connect_timeout
                .min(deadline.saturating_duration_since(Instant::now())),
            None => self.connect_timeout,
        };

        let attempts = self
            .servers
            .iter()
            .map(|addr| Connection::connect(addr, connect_timeout, self.table.clone()));

        let mut conns = Vec::with_capacity(self.servers.len());
        for (addr, attempt) in self.servers.iter().zip(join_all(attempts).await) {
            match attempt {
                Ok(conn) => conns.push(conn),
                Err(e) => tracing::warn!(server = %addr, error = %e, "dropping unreachable server"),
            }
        }

        if conns.is_empty() {
            return Err(GearmanError::NoServersAvailable);
        }
        Ok(conns)
    }

    async fn run_loop(
        &mut self,
        set: &mut TaskSet,
        conns: &mut Vec<Connection>,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let mut cursor = 0;

        loop {
            let unsubmitted = set.next_unsubmitted(cursor);
            let awaiting = conns.iter().any(|c| c.waiting_len() > 0);
            if set.finished() && unsubmitted.is_none() && !awaiting {
                return Ok(());
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        tracing::debug!(outstanding = set.outstanding(), "run timed out");
                        return Ok(());
                    }
                    remaining
                }
                None => MAX_POLL_INTERVAL,
            };

            if let Some(position) = unsubmitted {
                cursor = position + 1;
                self.submit(set, conns, position).await?;
            }

            if conns.is_empty() {
                if set.next_unsubmitted(cursor).is_some() {
                    return Err(GearmanError::NoServersAvailable);
                }
                return Ok(());
            }

            // Keep submitting without waiting while the queue is not drained.
            let wait = if set.next_unsubmitted(cursor).is_some() {
                Duration::ZERO
            } else {
                remaining.min(MAX_POLL_INTERVAL)
            };

            let ready = wait_any_readable(conns, wait).await;
            let mut dead = Vec::new();
            for index in ready {
                let conn = &mut conns[index];
                loop {
                    match conn.read_nonblocking() {
                        Ok(Some(packet)) => dispatch(set, conn, &packet)?,
                        Ok(None) => break,
                        Err(e) if e.is_connection_failure() => {
                            tracing::warn!(server = %conn.addr(), error = %e, "connection lost");
                            dead.push(index);
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            dead.sort_unstable();
            for index in dead.into_iter().rev() {
                let conn = conns.remove(index);
                drop_connection(set, conn);
            }
        }
    }

    /// Send the task at `position` to a live server.
    ///
    /// A connection that fails while sending is dropped and the next server
    /// is tried.
    async fn submit(
        &mut self,
        set: &mut TaskSet,
        conns: &mut Vec<Connection>,
        position: usize,
    ) -> Result<()> {
        let task = set
            .at(position)
            .ok_or_else(|| GearmanError::UnexpectedResponse(format!("no task at {position}")))?
            .clone();
        let epoch = match task.class() {
            JobClass::Epoch(when) => Some(when.to_string()),
            _ => None,
        };

        let mut fields: Vec<(&str, &[u8])> = vec![
            ("func", task.function().as_bytes()),
            ("uniq", task.unique().as_bytes()),
            ("arg", &task.payload()[..]),
        ];
        if let Some(epoch) = &epoch {
            fields.push(("epoch", epoch.as_bytes()));
        }

        while !conns.is_empty() {
            let servers: Vec<&ServerAddr> = conns.iter().map(Connection::addr).collect();
            let index = self.selector.select(&servers).min(conns.len() - 1);

            let conn = &mut conns[index];
            match conn.send(task.class().submit_command(), &fields).await {
                Ok(()) => {
                    conn.push_waiting(position);
                    set.mark_submitted(position, conn.addr().clone());
                    tracing::debug!(
                        server = %conn.addr(),
                        function = task.function(),
                        unique = task.unique(),
                        "submitted"
                    );
                    return Ok(());
                }
                Err(e) if e.is_connection_failure() => {
                    tracing::warn!(server = %conn.addr(), error = %e, "submit failed, trying next server");
                    let conn = conns.remove(index);
                    drop_connection(set, conn);
                }
                Err(e) => return Err(e),
            }
        }

        Err(GearmanError::NoServersAvailable)
    }

    /// Run one normal-priority job and return its result.
    pub async fn do_normal(&mut self, function: &str, payload: impl Into<Bytes>) -> Result<Bytes> {
        self.do_foreground(Task::new(function, payload)).await
    }

    /// Run one high-priority job and return its result.
    pub async fn do_high(&mut self, function: &str, payload: impl Into<Bytes>) -> Result<Bytes> {
        self.do_foreground(Task::new(function, payload).with_class(JobClass::High))
            .await
    }

    /// Run one low-priority job and return its result.
    pub async fn do_low(&mut self, function: &str, payload: impl Into<Bytes>) -> Result<Bytes> {
        self.do_foreground(Task::new(function, payload).with_class(JobClass::Low))
            .await
    }

    /// Submit a background job and return its handle.
    pub async fn do_background(&mut self, function: &str, payload: impl Into<Bytes>) -> Result<String> {
        self.do_detached(Task::background(function, payload)).await
    }

    /// Submit a high-priority background job and return its handle.
    pub async fn do_high_background(
        &mut self,
        function: &str,
        payload: impl Into<Bytes>,
    ) -> Result<String> {
        self.do_detached(Task::new(function, payload).with_class(JobClass::HighBackground))
            .await
    }

    /// Submit a low-priority background job and return its handle.
    pub async fn do_low_background(
        &mut self,
        function: &str,
        payload: impl Into<Bytes>,
    ) -> Result<String> {
        self.do_detached(Task::new(function, payload).with_class(JobClass::LowBackground))
            .await
    }

    /// Schedule a background job for `when` (unix seconds) and return its handle.
    pub async fn do_epoch(
        &mut self,
        function: &str,
        payload: impl Into<Bytes>,
        when: u64,
    ) -> Result<String> {
        self.do_detached(Task::epoch(function, payload, when)).await
    }

    /// Run many jobs for one function and return the finished set.
    ///
    /// Each item is `(unique id, payload)`.
    pub async fn do_batch<I, U, P>(&mut self, function: &str, jobs: I) -> Result<TaskSet>
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<Bytes>,
    {
        let mut set = TaskSet::new();
        for (unique, payload) in jobs {
            set.add_task(Task::new(function, payload).with_unique(unique))?;
        }
        self.run(&mut set, self.run_timeout).await?;
        Ok(set)
    }

    async fn do_foreground(&mut self, task: Task) -> Result<Bytes> {
        let unique = task.unique().to_string();
        let mut set = TaskSet::new();
        set.add_task(task)?;
        self.run(&mut set, self.run_timeout).await?;

        let task = set.get(&unique).ok_or(GearmanError::Timeout)?;
        match task.state() {
            TaskState::Completed => Ok(task.result().cloned().unwrap_or_default()),
            TaskState::Failed => Err(GearmanError::JobFailed {
                handle: task.handle().unwrap_or_default().to_string(),
            }),
            _ => Err(GearmanError::Timeout),
        }
    }

    async fn do_detached(&mut self, task: Task) -> Result<String> {
        let unique = task.unique().to_string();
        let mut set = TaskSet::new();
        set.add_task(task)?;
        self.run(&mut set, self.run_timeout).await?;

        set.get(&unique)
            .and_then(Task::handle)
            .map(str::to_string)
            .ok_or(GearmanError::Timeout)
    }
}

/// Apply one server response to the task set.
fn dispatch(set: &mut TaskSet, conn: &mut Connection, packet: &Packet) -> Result<()> {
    let handle = packet.field_str("handle").unwrap_or_default().into_owned();

    match packet.name() {
        "job_created" => {
            let position = conn.pop_waiting().ok_or_else(|| {
                GearmanError::UnexpectedResponse(format!(
                    "job_created for {handle} with no pending submission"
                ))
            })?;
            tracing::debug!(server = %conn.addr(), handle = %handle, "job created");
            set.assign_handle(position, handle);
            Ok(())
        }
        "work_status" => set.update_status(
            &handle,
            packet.field_u64("numerator").unwrap_or(0),
            packet.field_u64("denominator").unwrap_or(0),
        ),
        "work_complete" => set.complete(&handle, packet.field("result").cloned().unwrap_or_default()),
        "work_fail" => {
            tracing::warn!(handle = %handle, "job failed");
            set.fail(&handle)
        }
        other => Err(GearmanError::UnexpectedResponse(other.to_string())),
    }
}

/// Close a failed connection and fail the tasks it was carrying.
fn drop_connection(set: &mut TaskSet, mut conn: Connection) {
    let failed = set.fail_submitted_to(conn.addr());
    if failed > 0 {
        tracing::warn!(server = %conn.addr(), failed, "failing tasks of dropped server");
    }
    conn.close();
}
