//! Build pipeline tests against a scripted command runner

mod common;

use common::{deployed_project, first_build, fresh_project, Harness, ScriptedRunner, COMMIT};

use voltex::deploy::fsm::RunState;
use voltex::deploy::pipeline::{BuildRun, RunOutcome};
use voltex::deploy::step::Step;
use voltex::events::bus::EventPayload;
use voltex::models::project::{DeployRecord, DEPLOY_SCOPE};

#[tokio::test]
async fn test_first_build_succeeds_and_persists_identity() {
    let h = Harness::new(ScriptedRunner::new()).await;
    h.insert_project(fresh_project("a1b2c3d4")).await;

    let mut run = BuildRun::new(first_build("a1b2c3d4", None), h.layout());
    let outcome = h.state.pipeline.execute(&mut run).await;

    assert_eq!(outcome, RunOutcome::Succeeded);
    assert_eq!(run.state(), &RunState::Succeeded);
    assert_eq!(run.commit(), Some(COMMIT));

    let project = h.project("a1b2c3d4").await.unwrap();
    assert_eq!(project.container_id, Some(run.container_name()));
    assert_eq!(project.container_image_id.as_deref(), Some(run.id()));
    let address = project.container_ip.clone().unwrap();
    assert_eq!(run.address(), Some(address.as_str()));
    assert!(h.state.allocator.is_reserved(&address).await);

    let record: DeployRecord = h
        .state
        .store
        .scope(DEPLOY_SCOPE)
        .get("a1b2c3d4")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.git_hash.as_deref(), Some(COMMIT));
    assert_eq!(record.build_id, run.id());

    // Workspace is gone, proxy config points at the new container
    assert!(!run.workspace().path().exists());
    let conf = std::fs::read_to_string(h.proxy_file("a1b2c3d4")).unwrap();
    assert!(conf.contains(&format!("proxy_pass  http://{}:3000;", address)));

    let commands = h.runner.commands();
    assert!(commands[0].starts_with("git clone https://git.example.com/team/site.git"));
    assert_eq!(commands[1], "git rev-parse HEAD");
    assert_eq!(commands[2], format!("docker build -t {} .", run.id()));
    assert!(commands[3].starts_with(&format!("docker run --name a1b2c3d4_{}", run.id())));
    assert!(commands[3].contains(&format!("--ip {}", address)));
    assert!(commands[3].contains("--restart=always"));
    assert_eq!(commands[4], "docker exec nginx nginx -s reload");
    assert_eq!(commands.len(), 5);

    assert_eq!(h.finished(), vec![(true, None)]);
}

#[tokio::test]
async fn test_fatal_failure_stops_later_steps() {
    let runner = ScriptedRunner::new();
    runner.fail_on("docker build");
    let h = Harness::new(runner).await;
    h.insert_project(fresh_project("a1b2c3d4")).await;

    let mut run = BuildRun::new(first_build("a1b2c3d4", None), h.layout());
    let outcome = h.state.pipeline.execute(&mut run).await;

    match &outcome {
        RunOutcome::Failed { step, message } => {
            assert_eq!(*step, Step::BuildImage);
            assert!(message.contains("docker build exited with code 1"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(run.state(), &RunState::Failed);

    // Nothing after the build ran, and nothing was allocated
    assert!(!h.runner.ran("docker run"));
    assert!(!h.runner.ran("nginx -s reload"));
    assert!(run.address().is_none());
    assert!(!h.proxy_file("a1b2c3d4").exists());
    assert!(!run.workspace().path().exists());

    // The record keeps its empty identity
    let project = h.project("a1b2c3d4").await.unwrap();
    assert!(project.container_id.is_none());

    let finished = h.finished();
    assert_eq!(finished.len(), 1);
    assert!(!finished[0].0);
    assert!(finished[0].1.as_deref().unwrap().starts_with("build image:"));
}

#[tokio::test]
async fn test_failed_launch_rolls_back_what_the_run_created() {
    let runner = ScriptedRunner::new();
    runner.fail_on("docker run");
    let h = Harness::new(runner).await;
    h.insert_project(fresh_project("a1b2c3d4")).await;

    let mut run = BuildRun::new(first_build("a1b2c3d4", None), h.layout());
    let outcome = h.state.pipeline.execute(&mut run).await;

    assert!(matches!(outcome, RunOutcome::Failed { step: Step::RunContainer, .. }));
    assert!(h.runner.ran(&format!("docker rm -f {}", run.container_name())));
    assert!(h.runner.ran(&format!("docker rmi -f {}", run.id())));

    let address = run.address().unwrap();
    assert!(!h.state.allocator.is_reserved(address).await);
    assert!(!h.runner.ran("nginx -s reload"));
    assert_eq!(h.finished().len(), 1);
}

#[tokio::test]
async fn test_forced_address_is_persisted_verbatim() {
    let h = Harness::new(ScriptedRunner::new()).await;
    h.insert_project(fresh_project("a1b2c3d4")).await;

    let mut run = BuildRun::new(first_build("a1b2c3d4", Some("172.20.5.10")), h.layout());
    let outcome = h.state.pipeline.execute(&mut run).await;

    assert!(outcome.is_success());
    let project = h.project("a1b2c3d4").await.unwrap();
    assert_eq!(project.container_ip.as_deref(), Some("172.20.5.10"));
    assert!(h.state.allocator.is_reserved("172.20.5.10").await);
    assert!(h.runner.ran("--ip 172.20.5.10"));
}

#[tokio::test]
async fn test_soft_failures_do_not_abort_redeploy() {
    let runner = ScriptedRunner::new();
    runner.fail_on("docker rm -f a1b2c3d4_0badc0de");
    runner.fail_on("docker rmi -f 0badc0de");
    let h = Harness::new(runner).await;
    let previous = h.insert_project(deployed_project("a1b2c3d4")).await;
    h.state.allocator.allocate(Some("172.20.9.9")).await.unwrap();

    let mut run = BuildRun::new(previous.build_query(None), h.layout());
    let outcome = h.state.pipeline.execute(&mut run).await;

    assert_eq!(outcome, RunOutcome::Succeeded);
    assert!(!h.state.allocator.is_reserved("172.20.9.9").await);

    let failed_steps: Vec<String> = h
        .payloads()
        .into_iter()
        .filter_map(|p| match p {
            EventPayload::StepFailed { name, .. } => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(
        failed_steps,
        vec![
            Step::RemovePreviousContainer.name().to_string(),
            Step::RemovePreviousImage.name().to_string()
        ]
    );

    let project = h.project("a1b2c3d4").await.unwrap();
    assert_eq!(project.container_id, Some(run.container_name()));
    assert_eq!(h.finished(), vec![(true, None)]);
}

#[tokio::test]
async fn test_redeploy_on_same_pinned_address_keeps_reservation() {
    let h = Harness::new(ScriptedRunner::new()).await;
    let previous = h.insert_project(deployed_project("a1b2c3d4")).await;
    h.state.allocator.allocate(Some("172.20.9.9")).await.unwrap();

    let mut run = BuildRun::new(previous.build_query(Some("172.20.9.9".to_string())), h.layout());
    assert!(h.state.pipeline.execute(&mut run).await.is_success());

    assert!(h.state.allocator.is_reserved("172.20.9.9").await);
}

#[tokio::test]
async fn test_deleted_project_fails_the_final_step() {
    let h = Harness::new(ScriptedRunner::new()).await;

    let mut run = BuildRun::new(first_build("gone0000", None), h.layout());
    let outcome = h.state.pipeline.execute(&mut run).await;

    assert!(matches!(outcome, RunOutcome::Failed { step: Step::PersistProject, .. }));
    assert!(h.runner.ran(&format!("docker rm -f {}", run.container_name())));
    assert!(!h.state.allocator.is_reserved(run.address().unwrap()).await);

    // The published config is withdrawn again and the proxy reloaded twice
    assert!(!h.proxy_file("gone0000").exists());
    let reloads = h
        .runner
        .commands()
        .iter()
        .filter(|c| c.as_str() == "docker exec nginx nginx -s reload")
        .count();
    assert_eq!(reloads, 2);
    assert_eq!(h.finished().len(), 1);
}

#[tokio::test]
async fn test_run_events_are_captured_per_project() {
    let h = Harness::new(ScriptedRunner::new()).await;
    h.insert_project(fresh_project("a1b2c3d4")).await;

    let mut run = BuildRun::new(first_build("a1b2c3d4", None), h.layout());
    h.state.pipeline.execute(&mut run).await;

    let captured = h.state.bus.capture().range("a1b2c3d4", None, None);
    assert!(captured.first().unwrap().text.contains("queryStarted"));
    assert!(captured.last().unwrap().text.contains("queryFinished"));
    assert!(captured.iter().any(|e| e.text.contains("gitCloneFinished")));
    assert_eq!(
        captured.iter().filter(|e| e.text.contains("stepStarted")).count(),
        Step::ALL.len()
    );
    assert!(captured.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}
