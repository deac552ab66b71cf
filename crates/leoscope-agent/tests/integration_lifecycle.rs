//! End-to-end agent tests against an in-process coordinator.

mod common;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::{
    agent_for, auto_finish, start_coordinator, wait_for, wait_for_run_status, ALICE_TOKEN,
};
use leoscope_agent::ContainerRuntime;

use leoscope_proto::{
    Job, JobId, JobParams, NodeId, RunFilter, RunStatus, Schedule, UserId, Window,
};

fn test_job(id: &str, node: &str, length_secs: u32) -> Job {
    let start = Utc::now() + ChronoDuration::hours(1);
    Job {
        id: JobId::new(id),
        node_id: NodeId::new(node),
        owner_id: UserId::new("alice"),
        schedule: Schedule::Atq,
        window: Window::new(start, start + ChronoDuration::hours(2)),
        length_secs,
        overhead: true,
        paired_server_node_id: None,
        trigger: None,
        config: "interval_ms = 200".to_owned(),
        params: JobParams {
            mode: "network".to_owned(),
            deploy: String::new(),
            execute: "leotest/iperf:latest".to_owned(),
            finish: String::new(),
        },
    }
}

#[tokio::test]
async fn run_completes_and_uploads_artifact() {
    let coordinator = start_coordinator().await;
    let agent = agent_for(&coordinator, "n1", common::NODE1_TOKEN);
    let job = test_job("complete-me", "n1", 5);
    coordinator.store.insert_job(&job).await.unwrap();

    let finisher = auto_finish(agent.runtime.clone(), 0);
    agent.executor.execute(job, Utc::now(), &agent.registry).await;
    finisher.abort();

    let run = wait_for_run_status(
        &coordinator.store,
        "complete-me",
        RunStatus::Completed,
        Duration::from_secs(5),
    )
    .await
    .expect("run should complete");

    let artifact_url = run.artifact_url.expect("artifact url recorded");
    assert!(artifact_url.starts_with("artifacts/n1/complete-me/"));
    assert!(artifact_url.ends_with(".tar"));
    assert!(coordinator.artifacts.exists(&artifact_url).await.unwrap());

    // The container was reaped and the registry drained.
    assert!(agent.runtime.running_ids().is_empty());
    assert!(agent.registry.is_empty());
}

#[tokio::test]
async fn nonzero_exit_marks_run_failed_but_still_uploads() {
    let coordinator = start_coordinator().await;
    let agent = agent_for(&coordinator, "n1", common::NODE1_TOKEN);
    let job = test_job("fails", "n1", 5);
    coordinator.store.insert_job(&job).await.unwrap();

    let finisher = auto_finish(agent.runtime.clone(), 3);
    agent.executor.execute(job, Utc::now(), &agent.registry).await;
    finisher.abort();

    let run = wait_for_run_status(
        &coordinator.store,
        "fails",
        RunStatus::Failed,
        Duration::from_secs(5),
    )
    .await
    .expect("run should fail");

    assert!(run.status_message.contains("code 3"));
    assert!(run.artifact_url.is_some(), "logs still uploaded on failure");
}

#[tokio::test]
async fn false_trigger_skips_without_launching() {
    let coordinator = start_coordinator().await;
    let agent = agent_for(&coordinator, "n1", common::NODE1_TOKEN);

    let mut job = test_job("triggered", "n1", 5);
    job.trigger = Some("satellite_elevation > 30".to_owned());
    coordinator.store.insert_job(&job).await.unwrap();

    agent.snapshot.set("satellite_elevation", 12.0);
    agent.executor.execute(job, Utc::now(), &agent.registry).await;

    let run = wait_for_run_status(
        &coordinator.store,
        "triggered",
        RunStatus::Skipped,
        Duration::from_secs(5),
    )
    .await
    .expect("run should be skipped");

    assert!(run.status_message.contains("evaluated false"));
    // No container was ever launched.
    assert!(agent.runtime.list(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_trigger_key_fails_closed() {
    let coordinator = start_coordinator().await;
    let agent = agent_for(&coordinator, "n1", common::NODE1_TOKEN);

    let mut job = test_job("no-monitor", "n1", 5);
    job.trigger = Some("satellite_elevation > 30".to_owned());
    coordinator.store.insert_job(&job).await.unwrap();

    // Snapshot is empty: no monitor ever wrote the key.
    agent.executor.execute(job, Utc::now(), &agent.registry).await;

    assert!(wait_for_run_status(
        &coordinator.store,
        "no-monitor",
        RunStatus::Skipped,
        Duration::from_secs(5),
    )
    .await
    .is_some());
}

#[tokio::test]
async fn scavenger_aborts_running_overhead_container() {
    let coordinator = start_coordinator().await;
    let agent = agent_for(&coordinator, "n1", common::NODE1_TOKEN);

    // Long experiment that would run for ten minutes.
    let job = test_job("long-haul", "n1", 600);
    coordinator.store.insert_job(&job).await.unwrap();

    let executor = agent.executor.clone();
    let registry = agent.registry.clone();
    let job_clone = job.clone();
    let execution = tokio::spawn(async move {
        executor.execute(job_clone, Utc::now(), &registry).await;
    });

    // Wait for the container to come up.
    let runtime = agent.runtime.clone();
    assert!(
        wait_for(Duration::from_secs(5), || !runtime.running_ids().is_empty()).await,
        "container never started"
    );

    // Operator flips the node into scavenger mode; the loop reacts.
    coordinator
        .store
        .set_scavenger(&NodeId::new("n1"), true)
        .await
        .unwrap();
    agent.scheduler.iteration().await.unwrap();

    let run = wait_for_run_status(
        &coordinator.store,
        "long-haul",
        RunStatus::Aborted,
        Duration::from_secs(10),
    )
    .await
    .expect("run should be aborted");
    assert!(!run.status_message.is_empty());

    // Container stopped and removed within the sweep.
    let runtime = agent.runtime.clone();
    assert!(
        wait_for(Duration::from_secs(10), || runtime.running_ids().is_empty()).await,
        "container still running after scavenger"
    );
    execution.await.unwrap();
}

#[tokio::test]
async fn loop_fires_admitted_one_shot() {
    let coordinator = start_coordinator().await;
    let agent = agent_for(&coordinator, "n1", common::NODE1_TOKEN);

    let mut job = test_job("soon", "n1", 2);
    let start = Utc::now() + ChronoDuration::seconds(1);
    job.window = Window::new(start, start + ChronoDuration::hours(1));
    coordinator.store.insert_job(&job).await.unwrap();

    let finisher = auto_finish(agent.runtime.clone(), 0);
    agent.scheduler.iteration().await.unwrap();

    let run = wait_for_run_status(
        &coordinator.store,
        "soon",
        RunStatus::Completed,
        Duration::from_secs(15),
    )
    .await
    .expect("one-shot should fire and complete");
    finisher.abort();

    assert_eq!(run.node_id, NodeId::new("n1"));
}

#[tokio::test]
async fn missed_one_shot_is_rescheduled_not_fired() {
    let coordinator = start_coordinator().await;
    let agent = agent_for(&coordinator, "n1", common::NODE1_TOKEN);

    // Admitted in the past with no runs; bypass admission validation by
    // writing straight to the store, as if the node slept through it.
    let mut job = test_job("overslept", "n1", 5);
    job.window = Window::new(
        Utc::now() - ChronoDuration::minutes(10),
        Utc::now() + ChronoDuration::hours(1),
    );
    coordinator.store.insert_job(&job).await.unwrap();

    agent.scheduler.iteration().await.unwrap();

    let moved = coordinator
        .store
        .get_job(&JobId::new("overslept"))
        .await
        .unwrap()
        .unwrap();
    assert!(
        moved.window.start >= Utc::now() - ChronoDuration::seconds(5),
        "start should have been pushed to the nearest free future slot"
    );
    // Nothing fired locally.
    assert!(agent.runtime.list(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn paired_job_rendezvous_injects_server_ip() {
    let coordinator = start_coordinator().await;
    let client_agent = agent_for(&coordinator, "n1", common::NODE1_TOKEN);
    let server_agent = agent_for(&coordinator, "n2", common::NODE2_TOKEN);

    let mut job = test_job("pair", "n1", 4);
    job.paired_server_node_id = Some(NodeId::new("n2"));
    coordinator.store.insert_job(&job).await.unwrap();

    // The server node's loop serves rendezvous tasks; both runtimes
    // auto-finish their containers.
    let client_finisher = auto_finish(client_agent.runtime.clone(), 0);
    let server_finisher = auto_finish(server_agent.runtime.clone(), 0);

    let server_scheduler = server_agent.scheduler.clone();
    let server_loop = tokio::spawn(async move {
        for _ in 0..30 {
            let _ = server_scheduler.iteration().await;
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    });

    client_agent
        .executor
        .execute(job, Utc::now(), &client_agent.registry)
        .await;

    let run = wait_for_run_status(
        &coordinator.store,
        "pair",
        RunStatus::Completed,
        Duration::from_secs(10),
    )
    .await
    .expect("paired run should complete");
    assert!(run.artifact_url.is_some());

    let launched = client_agent.runtime.launched();
    assert_eq!(launched.len(), 1);
    let env: std::collections::HashMap<_, _> = launched[0].env.clone().into_iter().collect();
    assert_eq!(env.get("LEOTEST_SERVER").map(String::as_str), Some("0"));
    assert_eq!(
        env.get("LEOTEST_SERVER_IP").map(String::as_str),
        Some("203.0.113.7"),
        "peer public ip should be injected"
    );

    client_finisher.abort();
    server_finisher.abort();
    server_loop.abort();
}

#[tokio::test]
async fn heartbeat_advances_last_active() {
    let coordinator = start_coordinator().await;
    let agent = agent_for(&coordinator, "n1", common::NODE1_TOKEN);

    let before = coordinator
        .store
        .get_node(&NodeId::new("n1"))
        .await
        .unwrap()
        .unwrap()
        .last_active_ts;

    tokio::time::sleep(Duration::from_millis(20)).await;
    agent.scheduler.iteration().await.unwrap();

    let after = coordinator
        .store
        .get_node(&NodeId::new("n1"))
        .await
        .unwrap()
        .unwrap()
        .last_active_ts;
    assert!(after > before);
}

#[tokio::test]
async fn alice_token_cannot_report_runs() {
    let coordinator = start_coordinator().await;
    // A user credential wired into an agent client cannot report runs.
    let agent = agent_for(&coordinator, "alice", ALICE_TOKEN);

    let run = leoscope_proto::Run {
        id: leoscope_proto::RunId::new("r1"),
        job_id: JobId::new("a"),
        node_id: NodeId::new("n1"),
        owner_id: UserId::new("alice"),
        status: RunStatus::Scheduled,
        start_ts: Utc::now(),
        end_ts: None,
        status_message: String::new(),
        artifact_url: None,
    };
    let err = agent.client.update_run(&run).await.unwrap_err();
    assert_eq!(err.code(), Some(leoscope_proto::ErrorCode::Forbidden));

    let runs = coordinator.store.list_runs(&RunFilter::default()).await.unwrap();
    assert!(runs.is_empty());
}
