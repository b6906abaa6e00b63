//! Worker that upper-cases text.
//!
//! ```text
//! RUST_LOG=debug cargo run --example upper_worker -- localhost:4730
//! ```

use bytes::Bytes;
use gearman_client::{Job, JobError, Worker};

#[tokio::main]
async fn main() -> Result<(), gearman_client::GearmanError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let servers = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "localhost".to_string());

    let mut worker = Worker::builder()
        .servers(&servers)
        .function("upper", |job: Job| async move {
            Ok(Bytes::from(job.text().to_uppercase()))
        })
        .function_with_timeout("reverse", 10, |job: Job| async move {
            let reversed: String = job.text().chars().rev().collect();
            Ok(Bytes::from(reversed))
        })
        .json_function("sum", |numbers: Vec<i64>| async move {
            Ok::<_, JobError>(numbers.iter().sum::<i64>())
        })
        .on_complete(|job, result| {
            tracing::info!(handle = job.handle(), bytes = result.len(), "done");
        })
        .on_fail(|job, error| {
            tracing::warn!(handle = job.handle(), %error, "failed");
        })
        .build()?;

    tracing::info!(client_id = worker.client_id(), %servers, "worker starting");
    worker.work().await
}
