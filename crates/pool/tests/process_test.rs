//! Integration tests for the process backend.
//!
//! Each slot is a `jobsys-worker` child process talking JSON lines over
//! stdio, so these exercise the full boundary: encode, pipe, decode,
//! execute, and correlation of the replies.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;

use jobsys_pool::builtin::{self, Fibonacci};
use jobsys_pool::{
    BackendConfig, JobError, JobHandle, JobSpec, JobState, Pool, PoolConfig, Transferable,
};

const TIMEOUT: Duration = Duration::from_secs(10);
const WORKER: &str = env!("CARGO_BIN_EXE_jobsys-worker");

fn process_pool(max: usize) -> Pool {
    let config = PoolConfig {
        max_workers: Some(max),
        terminate_grace_ms: 1_000,
        ..PoolConfig::process(WORKER)
    };
    Pool::new(config, builtin::registry()).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn multiply_in_worker_process() {
    let pool = process_pool(2);
    let handle: JobHandle<i64> = pool
        .schedule(JobSpec::new("multiply").payload(&json!({ "a": 3, "b": 20 })))
        .unwrap();

    assert_eq!(timeout(TIMEOUT, handle.complete()).await.unwrap(), Ok(60));
    timeout(TIMEOUT, pool.shutdown(true)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn jobs_run_outside_the_caller_process() {
    let pool = process_pool(1);
    let pid: JobHandle<u32> = pool.schedule(JobSpec::new("pid")).unwrap();

    let pid = timeout(TIMEOUT, pid.complete()).await.unwrap().unwrap();
    assert_ne!(pid, std::process::id());
    timeout(TIMEOUT, pool.shutdown(true)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn errors_cross_the_boundary_as_message_and_stack() {
    let pool = process_pool(1);
    let handle: JobHandle<()> = pool.schedule(JobSpec::new("fail")).unwrap();

    let err = timeout(TIMEOUT, handle.complete()).await.unwrap().unwrap_err();
    assert_eq!(err.message(), "Fail");
    let record = err.record().expect("execution error");
    assert!(record.stack.contains("Fail"));
    timeout(TIMEOUT, pool.shutdown(true)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn payloads_and_transfers_round_the_pipe() {
    let pool = process_pool(2);

    let echo: JobHandle<Value> = pool
        .schedule(JobSpec::new("echo").payload(&json!({ "nested": [1, "two", null] })))
        .unwrap();
    let sum: JobHandle<u64> = pool
        .schedule(JobSpec::new("checksum").transfer([Transferable::new(vec![250, 5])]))
        .unwrap();
    let fib = pool.schedule_job(Fibonacci { n: 30 }).unwrap();

    assert_eq!(
        timeout(TIMEOUT, echo.complete()).await.unwrap(),
        Ok(json!({ "nested": [1, "two", null] }))
    );
    assert_eq!(timeout(TIMEOUT, sum.complete()).await.unwrap(), Ok(255));
    assert_eq!(timeout(TIMEOUT, fib.complete()).await.unwrap(), Ok(832_040));
    timeout(TIMEOUT, pool.shutdown(true)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_exit_mid_dispatch_is_contained() {
    let pool = process_pool(1);
    let doomed: JobHandle<()> = pool.schedule(JobSpec::new("exit_process")).unwrap();

    let err = timeout(TIMEOUT, doomed.complete()).await.unwrap().unwrap_err();
    assert!(matches!(err, JobError::Protocol(_)));
    assert_eq!(doomed.state(), JobState::Failed);

    // a replacement worker takes the next job
    let handle: JobHandle<i64> = pool
        .schedule(JobSpec::new("multiply").payload(&json!({ "a": 2, "b": 21 })))
        .unwrap();
    assert_eq!(timeout(TIMEOUT, handle.complete()).await.unwrap(), Ok(42));

    let stats = pool.stats().await;
    assert_eq!(stats.spawned, 2);
    assert_eq!(stats.slot_count(), 1);
    timeout(TIMEOUT, pool.shutdown(true)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_worker_output_fails_owed_jobs() {
    let config = PoolConfig {
        max_workers: Some(1),
        terminate_grace_ms: 200,
        backend: BackendConfig::Process {
            binary: "sh".into(),
            args: vec!["-c".into(), "read line; echo not-json; sleep 5".into()],
        },
        ..PoolConfig::default()
    };
    let pool = Pool::new(config, builtin::registry()).unwrap();
    let handle: JobHandle<Value> = pool.schedule(JobSpec::new("echo")).unwrap();

    let err = timeout(TIMEOUT, handle.complete()).await.unwrap().unwrap_err();
    assert!(matches!(err, JobError::Protocol(_)));
    assert!(err.message().contains("malformed worker output"));
    assert_eq!(pool.stats().await.slot_count(), 0);
    timeout(TIMEOUT, pool.shutdown(true)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_worker_processes() {
    let pool = Pool::new(
        PoolConfig {
            min_workers: 2,
            max_workers: Some(2),
            ..PoolConfig::process(WORKER)
        },
        builtin::registry(),
    )
    .unwrap();
    assert_eq!(pool.stats().await.slot_count(), 2);

    timeout(TIMEOUT, pool.shutdown(false)).await.unwrap();
    assert!(pool.stats().await.terminated);
}

#[tokio::test]
async fn missing_worker_binary_fails_construction() {
    let config = PoolConfig {
        min_workers: 1,
        max_workers: Some(1),
        backend: BackendConfig::Process {
            binary: "/nonexistent/jobsys-worker".into(),
            args: Vec::new(),
        },
        ..PoolConfig::default()
    };
    assert!(Pool::new(config, builtin::registry()).is_err());
}
