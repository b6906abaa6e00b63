//! Client run loop against in-process job servers.

mod common;

use std::time::Duration;

use common::{dead_addr, raw_server, silent_server, FakeServer};
use gearman_client::client::RoundRobinSelector;
use gearman_client::protocol::{build_frame, Magic};
use gearman_client::{Client, ErrorKind, GearmanError, JobClass, Task, TaskSet, TaskState};

/// Handles are assigned to tasks in submission order on one connection.
#[tokio::test]
async fn test_fifo_handle_resolution() {
    let server = FakeServer::start().await;
    let mut client = Client::builder().server(&server.addr()).build().unwrap();

    let mut set = TaskSet::new();
    for i in 0..5 {
        set.add_task(Task::new("reverse", format!("job {i}")).with_unique(format!("u{i}")))
            .unwrap();
    }

    client
        .run(&mut set, Some(Duration::from_millis(300)))
        .await
        .unwrap();

    for i in 0..5 {
        let task = set.get(&format!("u{i}")).unwrap();
        assert_eq!(task.handle(), Some(format!("H:test:{}", i + 1).as_str()));
        assert_eq!(task.state(), TaskState::HandleAssigned);
        assert_eq!(task.server(), Some(&server.server_addr()));
    }
    assert_eq!(server.count("submit_job"), 5);
}

/// Timeout returns normally with a partially complete set.
#[tokio::test]
async fn test_timeout_leaves_partial_set() {
    let server = FakeServer::start().await;
    let mut client = Client::builder().server(&server.addr()).build().unwrap();

    let mut set = TaskSet::new();
    set.add_task(Task::new("nobody_does_this", "x").with_unique("a"))
        .unwrap();

    let started = tokio::time::Instant::now();
    client
        .run(&mut set, Some(Duration::from_millis(200)))
        .await
        .unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(600), "run took {elapsed:?}");
    assert!(!set.finished());
    assert_eq!(set.outstanding(), 1);
}

/// An unreachable server does not stretch the run past its timeout.
#[tokio::test]
async fn test_timeout_holds_with_unreachable_server() {
    let dead = dead_addr().await;
    let (silent, _server) = silent_server().await;
    let mut client = Client::builder()
        .server(&dead.to_string())
        .server(&silent.to_string())
        .build()
        .unwrap();

    let mut set = TaskSet::new();
    set.add_task(Task::new("upper", "ab")).unwrap();

    let started = tokio::time::Instant::now();
    client
        .run(&mut set, Some(Duration::from_millis(200)))
        .await
        .unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_millis(600), "run took {elapsed:?}");
    assert!(!set.finished());
}

/// Handles from an earlier run are dead; a second run fails those tasks.
#[tokio::test]
async fn test_rerun_fails_tasks_left_in_flight() {
    let server = FakeServer::start().await;
    let mut client = Client::builder().server(&server.addr()).build().unwrap();

    let mut set = TaskSet::new();
    set.add_task(Task::new("nobody_does_this", "x").with_unique("a"))
        .unwrap();
    client
        .run(&mut set, Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert_eq!(set.get("a").unwrap().state(), TaskState::HandleAssigned);

    tokio::time::timeout(Duration::from_secs(2), client.run(&mut set, None))
        .await
        .expect("second run returned")
        .unwrap();

    assert!(set.finished());
    assert_eq!(set.get("a").unwrap().state(), TaskState::Failed);
    assert_eq!(server.count("submit_job"), 1);
}

#[tokio::test]
async fn test_background_only_set_finishes_with_handles() {
    let server = FakeServer::start().await;
    let mut client = Client::builder().server(&server.addr()).build().unwrap();

    let mut set = TaskSet::new();
    set.add_task(Task::background("log", "a").with_unique("a")).unwrap();
    set.add_task(
        Task::new("log", "b")
            .with_unique("b")
            .with_class(JobClass::HighBackground),
    )
    .unwrap();
    set.add_task(Task::epoch("log", "c", 4_102_444_800).with_unique("c"))
        .unwrap();
    assert!(set.finished());

    client.run(&mut set, None).await.unwrap();

    for unique in ["a", "b", "c"] {
        let task = set.get(unique).unwrap();
        assert!(task.handle().is_some(), "{unique} has no handle");
        assert_eq!(task.state(), TaskState::Completed);
    }
    assert_eq!(
        server.received(),
        vec!["submit_job_bg", "submit_job_high_bg", "submit_job_epoch"]
    );
}

#[tokio::test]
async fn test_do_background_returns_handle() {
    let server = FakeServer::start().await;
    let mut client = Client::builder().server(&server.addr()).build().unwrap();

    let handle = client.do_background("log", "line").await.unwrap();
    assert_eq!(handle, "H:test:1");

    let handle = client.do_low_background("log", "line").await.unwrap();
    assert_eq!(handle, "H:test:2");
    assert_eq!(server.count("submit_job_low_bg"), 1);
}

#[tokio::test]
async fn test_do_normal_times_out_on_silent_server() {
    let (addr, _server) = silent_server().await;
    let mut client = Client::builder()
        .server(&addr.to_string())
        .run_timeout(Duration::from_millis(150))
        .build()
        .unwrap();

    let err = client.do_normal("upper", "ab").await.unwrap_err();
    assert!(matches!(err, GearmanError::Timeout));
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_unknown_opcode_is_protocol_error() {
    let (addr, _server) = raw_server(build_frame(Magic::Response, 99, b"").unwrap()).await;
    let mut client = Client::builder().server(&addr.to_string()).build().unwrap();

    let mut set = TaskSet::new();
    set.add_task(Task::new("upper", "ab")).unwrap();

    let err = client
        .run(&mut set, Some(Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, GearmanError::UnknownOpcode(99)));
    assert!(err.is_protocol());
}

#[tokio::test]
async fn test_server_error_aborts_run() {
    let (addr, _server) = raw_server(build_frame(Magic::Response, 19, b"ERR_QUEUE\0queue is full").unwrap()).await;
    let mut client = Client::builder().server(&addr.to_string()).build().unwrap();

    let mut set = TaskSet::new();
    set.add_task(Task::new("upper", "ab")).unwrap();

    match client.run(&mut set, Some(Duration::from_secs(2))).await {
        Err(GearmanError::ServerError { code, text }) => {
            assert_eq!(code, "ERR_QUEUE");
            assert_eq!(text, "queue is full");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_job_created_without_submission_is_unexpected() {
    let mut data = build_frame(Magic::Response, 8, b"H:x:1").unwrap();
    data.extend(build_frame(Magic::Response, 8, b"H:x:2").unwrap());
    let (addr, _server) = raw_server(data).await;
    let mut client = Client::builder().server(&addr.to_string()).build().unwrap();

    let mut set = TaskSet::new();
    set.add_task(Task::new("upper", "ab").with_unique("a")).unwrap();

    let err = client
        .run(&mut set, Some(Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, GearmanError::UnexpectedResponse(_)));
    assert_eq!(set.get("a").unwrap().handle(), Some("H:x:1"));
}

#[tokio::test]
async fn test_work_complete_for_unknown_handle() {
    let mut data = build_frame(Magic::Response, 8, b"H:x:1").unwrap();
    data.extend(build_frame(Magic::Response, 13, b"H:x:999\0result").unwrap());
    let (addr, _server) = raw_server(data).await;
    let mut client = Client::builder().server(&addr.to_string()).build().unwrap();

    let mut set = TaskSet::new();
    set.add_task(Task::new("upper", "ab")).unwrap();

    let err = client
        .run(&mut set, Some(Duration::from_secs(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, GearmanError::UnknownHandle(h) if h == "H:x:999"));
}

#[tokio::test]
async fn test_unreachable_server_is_skipped() {
    let dead = dead_addr().await;
    let server = FakeServer::start().await;
    let mut client = Client::builder()
        .server(&dead.to_string())
        .server(&server.addr())
        .connect_timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let handle = client.do_background("log", "x").await.unwrap();
    assert_eq!(handle, "H:test:1");
}

#[tokio::test]
async fn test_all_servers_unreachable() {
    let dead = dead_addr().await;
    let mut client = Client::builder()
        .server(&dead.to_string())
        .connect_timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let err = client.do_background("log", "x").await.unwrap_err();
    assert!(matches!(err, GearmanError::NoServersAvailable));
}

#[tokio::test]
async fn test_round_robin_spreads_submissions() {
    let first = FakeServer::start().await;
    let second = FakeServer::start().await;
    let mut client = Client::builder()
        .server(&first.addr())
        .server(&second.addr())
        .selector(RoundRobinSelector::default())
        .build()
        .unwrap();

    let mut set = TaskSet::new();
    for i in 0..4 {
        set.add_task(Task::background("log", format!("{i}"))).unwrap();
    }
    client.run(&mut set, None).await.unwrap();

    assert_eq!(first.count("submit_job_bg"), 2);
    assert_eq!(second.count("submit_job_bg"), 2);
    assert!(set.iter().all(|t| t.handle().is_some()));
}
