//! # gearman-client
//!
//! Rust client and worker for the Gearman binary job-queue protocol.
//!
//! Submitters hand units of work to a pool of job servers; workers pull that
//! work, execute it, and report progress and results back.
//!
//! ## Architecture
//!
//! - **Protocol**: 12-byte header plus NUL-separated fields, one command table
//! - **Transport**: one TCP connection per server, FIFO correlation of
//!   submissions with `job_created`
//! - **Client**: task sets driven by a single multiplexed read loop
//! - **Worker**: grab/execute/report loop with reconnect backoff
//!
//! ## Example
//!
//! ```ignore
//! use gearman_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gearman_client::GearmanError> {
//!     let mut client = Client::builder().server("localhost:4730").build()?;
//!     let result = client.do_normal("upper", "hello").await?;
//!     assert_eq!(&result[..], b"HELLO");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod worker;

pub use client::{Client, ClientBuilder, JobClass, Task, TaskSet, TaskState};
pub use error::{ErrorKind, GearmanError, Result};
pub use worker::{Job, JobError, JobResult, Worker, WorkerBuilder, Workload};
