//! Build and delete queue tests

mod common;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::{deployed_project, first_build, fresh_project, Harness, ScriptedRunner};

use voltex::deploy::pipeline::{BuildRun, RunOutcome};
use voltex::events::bus::EventPayload;
use voltex::models::project::DeleteTask;
use voltex::workers::builder::{self, build_queue};
use voltex::workers::deleter::{self, delete_queue};

fn never() -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(std::future::pending())
}

#[tokio::test]
async fn test_builds_run_one_at_a_time_in_order() {
    let h = Harness::new(ScriptedRunner::with_delay(Duration::from_millis(5))).await;
    let ids = ["aaaa0001", "aaaa0002", "aaaa0003"];
    for id in ids {
        h.insert_project(fresh_project(id)).await;
    }

    let (queue, receiver) = build_queue();
    let worker = tokio::spawn(builder::run(receiver, h.state.pipeline.clone(), never()));

    let mut completions = Vec::new();
    let mut run_ids = Vec::new();
    for id in ids {
        let run = BuildRun::new(first_build(id, None), h.layout());
        run_ids.push(run.id().to_string());
        completions.push(queue.enqueue(run).unwrap());
    }

    for completion in completions {
        let run = completion.wait().await.unwrap();
        assert_eq!(run.outcome(), Some(&RunOutcome::Succeeded));
    }

    // Start and finish events strictly alternate, in enqueue order
    let lifecycle: Vec<(String, bool)> = h
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e.payload {
            EventPayload::RunStarted => Some((e.run_id.clone(), true)),
            EventPayload::RunFinished { .. } => Some((e.run_id.clone(), false)),
            _ => None,
        })
        .collect();
    let expected: Vec<(String, bool)> = run_ids
        .iter()
        .flat_map(|id| [(id.clone(), true), (id.clone(), false)])
        .collect();
    assert_eq!(lifecycle, expected);
    assert_eq!(h.runner.max_in_flight(), 1);

    assert!(!queue.is_running());
    assert_eq!(queue.pending(), 0);

    drop(queue);
    worker.await.unwrap();
}

#[tokio::test]
async fn test_failed_build_does_not_block_the_next() {
    let runner = ScriptedRunner::new();
    runner.fail_on("bad00000");
    let h = Harness::new(runner).await;
    h.insert_project(fresh_project("bad00000")).await;
    h.insert_project(fresh_project("good0000")).await;

    let (queue, receiver) = build_queue();
    let worker = tokio::spawn(builder::run(receiver, h.state.pipeline.clone(), never()));

    let bad = queue
        .enqueue(BuildRun::new(first_build("bad00000", None), h.layout()))
        .unwrap();
    let good = queue
        .enqueue(BuildRun::new(first_build("good0000", None), h.layout()))
        .unwrap();

    let bad = bad.wait().await.unwrap();
    let good = good.wait().await.unwrap();
    assert!(matches!(bad.outcome(), Some(RunOutcome::Failed { .. })));
    assert_eq!(good.outcome(), Some(&RunOutcome::Succeeded));

    drop(queue);
    worker.await.unwrap();
}

#[tokio::test]
async fn test_delete_survives_container_removal_failure() {
    let runner = ScriptedRunner::new();
    runner.fail_on("docker rm -f");
    let h = Harness::new(runner).await;

    let project = deployed_project("a1b2c3d4");
    h.state.allocator.allocate(Some("172.20.9.9")).await.unwrap();
    std::fs::create_dir_all(&h.options.proxy.config_dir).unwrap();
    std::fs::write(h.proxy_file("a1b2c3d4"), "server {}\n").unwrap();

    let (queue, receiver) = delete_queue();
    let worker = tokio::spawn(deleter::run(receiver, h.state.teardown.clone(), never()));

    let report = queue.enqueue(project.delete_task()).unwrap().wait().await.unwrap();

    assert!(report.container.is_err());
    assert!(matches!(report.address, Ok(true)));
    assert!(matches!(report.proxy_config, Ok(true)));
    assert!(!report.is_clean());

    assert!(!h.state.allocator.is_reserved("172.20.9.9").await);
    assert!(!h.proxy_file("a1b2c3d4").exists());
    // The image is only removed after its container
    assert!(!h.runner.ran("docker rmi"));
    // Teardown output is published but not kept for the deleted project
    assert!(h.payloads().iter().any(|p| matches!(p, EventPayload::Error { .. })));
    assert_eq!(h.state.bus.capture().len("a1b2c3d4"), 0);

    drop(queue);
    worker.await.unwrap();
}

#[tokio::test]
async fn test_deletes_run_one_at_a_time() {
    let h = Harness::new(ScriptedRunner::with_delay(Duration::from_millis(5))).await;

    let (queue, receiver) = delete_queue();
    let worker = tokio::spawn(deleter::run(receiver, h.state.teardown.clone(), never()));

    let tasks: Vec<DeleteTask> = ["dddd0001", "dddd0002", "dddd0003"]
        .iter()
        .map(|id| DeleteTask {
            container_ip: None,
            ..deployed_project(id).delete_task()
        })
        .collect();
    let completions: Vec<_> = tasks
        .into_iter()
        .map(|task| queue.enqueue(task).unwrap())
        .collect();

    for completion in completions {
        let report = completion.wait().await.unwrap();
        assert!(report.is_clean());
    }

    let removals: Vec<String> = h
        .runner
        .commands()
        .into_iter()
        .filter(|c| c.starts_with("docker rm"))
        .collect();
    assert_eq!(
        removals,
        vec![
            "docker rm -f dddd0001_0badc0de",
            "docker rmi -f 0badc0de",
            "docker rm -f dddd0002_0badc0de",
            "docker rmi -f 0badc0de",
            "docker rm -f dddd0003_0badc0de",
            "docker rmi -f 0badc0de",
        ]
    );
    assert_eq!(h.runner.max_in_flight(), 1);

    drop(queue);
    worker.await.unwrap();
}

#[tokio::test]
async fn test_delete_of_never_built_project_is_clean() {
    let h = Harness::new(ScriptedRunner::new()).await;
    let report = h
        .state
        .teardown
        .execute(&fresh_project("a1b2c3d4").delete_task())
        .await;

    assert!(matches!(report.address, Ok(false)));
    assert!(matches!(report.proxy_config, Ok(false)));
    assert!(matches!(report.container, Ok(false)));
    assert!(h.runner.commands().is_empty());
}
