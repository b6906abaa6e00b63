//! Submit jobs and print their results.
//!
//! ```text
//! cargo run --example submit -- localhost:4730 hello world
//! ```

use std::time::Duration;

use gearman_client::{Client, Task, TaskSet, TaskState};

#[tokio::main]
async fn main() -> Result<(), gearman_client::GearmanError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let servers = args.next().unwrap_or_else(|| "localhost".to_string());
    let words: Vec<String> = args.collect();

    let mut client = Client::builder()
        .servers(&servers)
        .run_timeout(Duration::from_secs(10))
        .build()?;

    let mut set = TaskSet::new();
    for (i, word) in words.iter().enumerate() {
        set.add_task(Task::new("upper", word.clone()).with_unique(format!("word-{i}")))?;
    }
    set.add_task(Task::json("sum", &vec![1, 2, 3])?.with_unique("sum"))?;

    client.run(&mut set, Some(Duration::from_secs(10))).await?;

    for task in set.iter() {
        match (task.state(), task.result()) {
            (TaskState::Completed, Some(result)) => {
                println!("{} -> {}", task.unique(), String::from_utf8_lossy(result));
            }
            (state, _) => println!("{} -> {:?}", task.unique(), state),
        }
    }

    let handle = client.do_background("upper", "fire and forget").await?;
    println!("background job {handle}");
    Ok(())
}
