//! Worker builder and poll loop.
//!
//! The [`WorkerBuilder`] registers functions and callbacks. The [`Worker`]
//! runs the grab/execute/report cycle:
//! 1. Connect to every server and announce the client id and abilities
//! 2. Ask each live server for a job (`grab_job`)
//! 3. Execute assigned jobs and report `work_complete` or `work_fail`
//! 4. When idle, send `pre_sleep` and wait for a `noop` wake-up
//! 5. Reconnect dropped servers once their retry interval has passed
//!
//! # Example
//!
//! ```ignore
//! use gearman_client::{Worker, Job};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut worker = Worker::builder()
//!         .server("localhost")
//!         .function("upper", |job: Job| async move {
//!             Ok(job.text().to_uppercase().into())
//!         })
//!         .build()?;
//!
//!     worker.work().await?;
//!     Ok(())
//! }
//! ```

mod job;
mod registry;
mod retry;

pub use job::{BoxFuture, FnHandler, Job, JobError, JobHandler, JobResult, TypedHandler, Workload};
pub use registry::FunctionRegistry;
pub use retry::RetrySchedule;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::error::{GearmanError, Result};
use crate::protocol::CommandTable;
use crate::transport::{wait_any_readable, Connection, ServerAddr, ServerList};

/// Default connect timeout per server.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default wait for the answer to `grab_job`.
pub const DEFAULT_GRAB_TIMEOUT: Duration = Duration::from_millis(500);

/// Default wait for a wake-up after `pre_sleep`.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default minimum time between reconnect attempts to one server.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default sleep when no server is connected.
pub const DEFAULT_EMPTY_POOL_SLEEP: Duration = Duration::from_secs(1);

type StartCallback = Box<dyn Fn(&Job) + Send + Sync>;
type CompleteCallback = Box<dyn Fn(&Job, &Bytes) + Send + Sync>;
type FailCallback = Box<dyn Fn(&Job, &JobError) + Send + Sync>;

/// Builder for configuring and creating a [`Worker`].
pub struct WorkerBuilder {
    client_id: Option<String>,
    servers: ServerList,
    registry: FunctionRegistry,
    on_start: Vec<StartCallback>,
    on_complete: Vec<CompleteCallback>,
    on_fail: Vec<FailCallback>,
    connect_timeout: Duration,
    grab_timeout: Duration,
    idle_timeout: Duration,
    retry_interval: Duration,
    empty_pool_sleep: Duration,
    table: Option<Arc<CommandTable>>,
    error: Option<GearmanError>,
}

impl WorkerBuilder {
    /// Create a new worker builder.
    pub fn new() -> Self {
        Self {
            client_id: None,
            servers: ServerList::new(),
            registry: FunctionRegistry::new(),
            on_start: Vec::new(),
            on_complete: Vec::new(),
            on_fail: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            grab_timeout: DEFAULT_GRAB_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            empty_pool_sleep: DEFAULT_EMPTY_POOL_SLEEP,
            table: None,
            error: None,
        }
    }

    /// Set the id sent with `set_client_id`.
    ///
    /// Default: `pid_<pid>_<uuid>`
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Add one `host[:port]` server.
    pub fn server(mut self, server: &str) -> Self {
        let result = self.servers.add(server).map(|_| ());
        self.record(result)
    }

    /// Add comma-separated `host[:port]` servers.
    pub fn servers(mut self, servers: &str) -> Self {
        let result = self.servers.add_many(servers).map(|_| ());
        self.record(result)
    }

    /// Register a closure for `name`.
    pub fn function<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let result = self.registry.register_fn(name, None, handler);
        self.record(result)
    }

    /// Register a closure for `name`, announced with a server-side timeout.
    pub fn function_with_timeout<F, Fut>(mut self, name: &str, timeout_secs: u32, handler: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let result = self.registry.register_fn(name, Some(timeout_secs), handler);
        self.record(result)
    }

    /// Register a closure with JSON argument and result for `name`.
    pub fn json_function<F, T, R, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<R, JobError>> + Send + 'static,
    {
        let result = self.registry.register_typed(name, None, handler);
        self.record(result)
    }

    /// Register any [`JobHandler`] for `name`.
    pub fn handler(mut self, name: &str, handler: impl JobHandler) -> Self {
        let result = self.registry.register(name, None, handler);
        self.record(result)
    }

    /// Called before each job executes.
    pub fn on_start(mut self, callback: impl Fn(&Job) + Send + Sync + 'static) -> Self {
        self.on_start.push(Box::new(callback));
        self
    }

    /// Called after a job's result was reported.
    pub fn on_complete(mut self, callback: impl Fn(&Job, &Bytes) + Send + Sync + 'static) -> Self {
        self.on_complete.push(Box::new(callback));
        self
    }

    /// Called after a job's failure was reported.
    pub fn on_fail(mut self, callback: impl Fn(&Job, &JobError) + Send + Sync + 'static) -> Self {
        self.on_fail.push(Box::new(callback));
        self
    }

    /// Default: 2 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Default: 500 milliseconds
    pub fn grab_timeout(mut self, timeout: Duration) -> Self {
        self.grab_timeout = timeout;
        self
    }

    /// Default: 60 seconds
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Default: 5 seconds
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Default: 1 second
    pub fn empty_pool_sleep(mut self, duration: Duration) -> Self {
        self.empty_pool_sleep = duration;
        self
    }

    /// Use a specific command table instead of the standard one.
    pub fn command_table(mut self, table: Arc<CommandTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Build the worker, reporting the first configuration error.
    pub fn build(self) -> Result<Worker> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok(Worker {
            client_id: self.client_id.unwrap_or_else(default_client_id),
            servers: self.servers,
            registry: self.registry,
            on_start: self.on_start,
            on_complete: self.on_complete,
            on_fail: self.on_fail,
            connect_timeout: self.connect_timeout,
            grab_timeout: self.grab_timeout,
            idle_timeout: self.idle_timeout,
            empty_pool_sleep: self.empty_pool_sleep,
            table: self
                .table
                .unwrap_or_else(|| Arc::new(CommandTable::standard())),
            conns: Vec::new(),
            retry: RetrySchedule::new(self.retry_interval),
        })
    }

    fn record(mut self, result: Result<()>) -> Self {
        if let Err(e) = result {
            self.error.get_or_insert(e);
        }
        self
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pulls jobs from job servers and executes them.
pub struct Worker {
    client_id: String,
    servers: ServerList,
    registry: FunctionRegistry,
    on_start: Vec<StartCallback>,
    on_complete: Vec<CompleteCallback>,
    on_fail: Vec<FailCallback>,
    connect_timeout: Duration,
    grab_timeout: Duration,
    idle_timeout: Duration,
    empty_pool_sleep: Duration,
    table: Arc<CommandTable>,
    conns: Vec<Connection>,
    retry: RetrySchedule,
}

impl Worker {
    /// Create a new worker builder.
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::new()
    }

    #[inline]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[inline]
    pub fn servers(&self) -> &ServerList {
        &self.servers
    }

    /// Registered functions. Changes apply from the next `work` call.
    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.registry
    }

    #[inline]
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Work forever, or until a non-recoverable error.
    pub async fn work(&mut self) -> Result<()> {
        self.work_until(|_, _| false).await
    }

    /// Work until `stop(idle, last_job)` returns true.
    ///
    /// The predicate is checked once per cycle, right after every connection
    /// has had one `grab_job` and before the worker sends `pre_sleep`. `idle`
    /// is true when that grab round found no job on any server, so returning
    /// true on `idle` stops without ever sleeping. `last_job` is when the most
    /// recent job finished.
    pub async fn work_until<P>(&mut self, mut stop: P) -> Result<()>
    where
        P: FnMut(bool, Option<Instant>) -> bool,
    {
        self.start().await?;

        let result = self.work_loop(&mut stop).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "worker loop ended");
        }

        for conn in &mut self.conns {
            conn.close();
        }
        self.conns.clear();
        self.retry.clear();
        result
    }

    async fn start(&mut self) -> Result<()> {
        let now = Instant::now();
        let servers: Vec<ServerAddr> = self.servers.iter().cloned().collect();
        for addr in servers {
            match self.connect_server(&addr).await {
                Ok(conn) => self.conns.push(conn),
                Err(e) => {
                    tracing::warn!(server = %addr, error = %e, "server unavailable, will retry");
                    self.retry.schedule(addr, now);
                }
            }
        }

        if self.conns.is_empty() {
            self.retry.clear();
            return Err(GearmanError::NoServersAvailable);
        }
        self.register_all().await
    }

    async fn work_loop<P>(&mut self, stop: &mut P) -> Result<()>
    where
        P: FnMut(bool, Option<Instant>) -> bool,
    {
        let mut last_job = None;

        loop {
            let mut worked = false;
            let mut index = 0;
            while index < self.conns.len() {
                match self.grab_and_execute(index).await {
                    Ok(did_work) => {
                        worked |= did_work;
                        index += 1;
                    }
                    Err(e) if e.is_connection_failure() => self.drop_connection(index, &e),
                    Err(e) => return Err(e),
                }
            }

            if worked {
                last_job = Some(Instant::now());
            }
            if stop(!worked, last_job) {
                return Ok(());
            }

            if !worked && !self.conns.is_empty() {
                self.sleep_until_woken().await?;
            }

            self.retry_due().await?;

            if self.conns.is_empty() {
                sleep(self.empty_pool_sleep).await;
            }
        }
    }

    /// One grab cycle on one connection. Returns whether a job ran.
    async fn grab_and_execute(&mut self, index: usize) -> Result<bool> {
        let grab_timeout = self.grab_timeout;
        let conn = &mut self.conns[index];
        conn.send("grab_job", &[]).await?;

        let packet = loop {
            let packet = conn.read_blocking(grab_timeout).await?;
            match packet.name() {
                "noop" => continue,
                "no_job" => return Ok(false),
                "job_assign" => break packet,
                other => return Err(GearmanError::UnexpectedResponse(other.to_string())),
            }
        };

        let job = Job::from_assign(&packet)?;
        self.execute(index, job).await?;
        Ok(true)
    }

    async fn execute(&mut self, index: usize, job: Job) -> Result<()> {
        tracing::debug!(handle = job.handle(), function = job.function(), "job assigned");
        for callback in &self.on_start {
            callback(&job);
        }

        let outcome = match self.registry.get(job.function()) {
            Some(handler) => handler.execute(job.clone()).await,
            None => Err(JobError::Failed(format!(
                "function {} is not registered",
                job.function()
            ))),
        };

        let conn = &mut self.conns[index];
        match outcome {
            Ok(result) => {
                conn.send(
                    "work_complete",
                    &[("handle", job.handle().as_bytes()), ("result", &result[..])],
                )
                .await?;
                for callback in &self.on_complete {
                    callback(&job, &result);
                }
                Ok(())
            }
            // Not reported; the server requeues the job once this connection closes.
            Err(JobError::Fatal(message)) => {
                tracing::error!(handle = job.handle(), function = job.function(), %message, "handler failed fatally");
                Err(GearmanError::Handler {
                    function: job.function().to_string(),
                    message,
                })
            }
            Err(error) => {
                tracing::warn!(handle = job.handle(), function = job.function(), error = %error, "job failed");
                conn.send("work_fail", &[("handle", job.handle().as_bytes())])
                    .await?;
                for callback in &self.on_fail {
                    callback(&job, &error);
                }
                Ok(())
            }
        }
    }

    /// Send `pre_sleep` everywhere and wait for any server to wake us.
    async fn sleep_until_woken(&mut self) -> Result<()> {
        let mut index = 0;
        while index < self.conns.len() {
            match self.conns[index].send("pre_sleep", &[]).await {
                Ok(()) => index += 1,
                Err(e) if e.is_connection_failure() => self.drop_connection(index, &e),
                Err(e) => return Err(e),
            }
        }

        if self.conns.is_empty() {
            return Ok(());
        }
        let ready = wait_any_readable(&self.conns, self.idle_timeout).await;
        if !ready.is_empty() {
            tracing::debug!(ready = ready.len(), "woken up");
        }
        Ok(())
    }

    /// Reconnect servers whose retry interval has passed.
    async fn retry_due(&mut self) -> Result<()> {
        let due = self.retry.due(Instant::now());
        if due.is_empty() {
            return Ok(());
        }

        let mut reconnected = false;
        for addr in due {
            match self.connect_server(&addr).await {
                Ok(conn) => {
                    tracing::info!(server = %addr, "reconnected");
                    self.retry.remove(&addr);
                    self.conns.push(conn);
                    reconnected = true;
                }
                Err(e) => {
                    tracing::debug!(server = %addr, error = %e, "reconnect failed");
                    self.retry.schedule(addr, Instant::now());
                }
            }
        }

        if reconnected {
            self.register_all().await?;
        }
        Ok(())
    }

    async fn connect_server(&self, addr: &ServerAddr) -> Result<Connection> {
        let mut conn = Connection::connect(addr, self.connect_timeout, self.table.clone()).await?;
        conn.send("set_client_id", &[("client_id", self.client_id.as_bytes())])
            .await?;
        Ok(conn)
    }

    /// Announce every registered function on every live connection.
    async fn register_all(&mut self) -> Result<()> {
        let mut index = 0;
        while index < self.conns.len() {
            match register_functions(&mut self.conns[index], &self.registry).await {
                Ok(()) => index += 1,
                Err(e) if e.is_connection_failure() => self.drop_connection(index, &e),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn drop_connection(&mut self, index: usize, error: &GearmanError) {
        let mut conn = self.conns.remove(index);
        tracing::warn!(server = %conn.addr(), error = %error, "dropping server, will retry");
        conn.close();
        self.retry.schedule(conn.addr().clone(), Instant::now());
    }
}

async fn register_functions(conn: &mut Connection, registry: &FunctionRegistry) -> Result<()> {
    for (name, timeout) in registry.abilities() {
        match timeout {
            Some(secs) => {
                let secs = secs.to_string();
                conn.send(
                    "can_do_timeout",
                    &[("func", name.as_bytes()), ("timeout", secs.as_bytes())],
                )
                .await?
            }
            None => conn.send("can_do", &[("func", name.as_bytes())]).await?,
        }
    }
    Ok(())
}

fn default_client_id() -> String {
    format!("pid_{}_{}", std::process::id(), Uuid::new_v4().simple())
}
