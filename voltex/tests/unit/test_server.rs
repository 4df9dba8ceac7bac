//! HTTP API tests, driven through the router without a socket

mod common;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{Harness, ScriptedRunner};

use voltex::server::serve::router;
use voltex::server::state::ServerState;
use voltex::workers::{builder, deleter};

fn never() -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(std::future::pending())
}

fn app(h: &Harness) -> Router {
    router(Arc::new(ServerState::new(h.state.projects.clone())))
}

/// Start both workers on the harness queues
fn start_workers(h: &mut Harness) {
    let receivers = h.receivers.take().unwrap();
    tokio::spawn(builder::run(receivers.builds, h.state.pipeline.clone(), never()));
    tokio::spawn(deleter::run(receivers.deletes, h.state.teardown.clone(), never()));
}

fn create_body() -> Value {
    json!({
        "name": "site",
        "description": "marketing site",
        "git_url": "https://git.example.com/team/site.git",
        "docker_from": "node:20-alpine",
        "docker_script": "RUN npm ci",
        "start_command": "npm start",
        "expose_port": 3000,
        "alloc_domain": "site.example.com",
        "require_passkey_auth": true
    })
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new(ScriptedRunner::new()).await;
    let (status, body) = call(&app(&h), "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "voltex");
}

#[tokio::test]
async fn test_create_lists_and_fetches_project() {
    let h = Harness::new(ScriptedRunner::new()).await;
    let app = app(&h);

    let (status, created) = call(&app, "POST", "/api/projects/create", Some(create_body())).await;
    assert_eq!(status, StatusCode::OK);
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 8);
    assert_eq!(created["build"].as_str().unwrap().len(), 8);

    let (status, list) = call(&app, "GET", "/api/projects/list", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list, json!([id]));

    let (status, project) = call(&app, "GET", &format!("/api/projects/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(project["name"], "site");
    assert_eq!(project["expose_port"], 3000);
    assert_eq!(project["container_id"], Value::Null);
}

#[tokio::test]
async fn test_create_rejects_incomplete_body() {
    let h = Harness::new(ScriptedRunner::new()).await;
    let mut body = create_body();
    body.as_object_mut().unwrap().remove("docker_from");

    let (status, error) = call(&app(&h), "POST", "/api/projects/create", Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["error"].as_str().unwrap().contains("docker_from"));
}

#[tokio::test]
async fn test_unknown_project_is_404() {
    let h = Harness::new(ScriptedRunner::new()).await;
    let app = app(&h);

    for (method, uri) in [
        ("GET", "/api/projects/ffffffff"),
        ("GET", "/api/projects/status/ffffffff"),
        ("POST", "/api/projects/rebuild/ffffffff"),
        ("POST", "/api/projects/delete/ffffffff"),
        ("GET", "/api/projects/events/ffffffff"),
    ] {
        let (status, _) = call(&app, method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
    }
}

#[tokio::test]
async fn test_container_endpoints_need_a_deployment() {
    let h = Harness::new(ScriptedRunner::new()).await;
    let app = app(&h);
    let (_, created) = call(&app, "POST", "/api/projects/create", Some(create_body())).await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = call(&app, "GET", &format!("/api/projects/status/{}", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_rebuild_rejects_malformed_pinned_address() {
    let h = Harness::new(ScriptedRunner::new()).await;
    let app = app(&h);
    let (_, created) = call(&app, "POST", "/api/projects/create", Some(create_body())).await;
    let id = created["id"].as_str().unwrap();

    let uri = format!("/api/projects/rebuild/{}?force_ip=172.20.5", id);
    let (status, _) = call(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_deployed_project_end_to_end() {
    let mut h = Harness::new(ScriptedRunner::new()).await;
    start_workers(&mut h);
    let app = app(&h);

    let queued = h
        .state
        .projects
        .create(serde_json::from_value(create_body()).unwrap())
        .await
        .unwrap();
    let id = queued.project_id.clone();
    let run = queued.completion.wait().await.unwrap();
    assert!(run.outcome().unwrap().is_success());

    let (status, body) = call(&app, "GET", &format!("/api/projects/status/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");

    let (status, body) = call(&app, "GET", &format!("/api/projects/logs/{}?tail=5", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["logs"].as_str().unwrap().contains("listening on 3000"));
    assert!(h.runner.ran(&format!("docker logs --tail 5 -t {}", run.container_name())));

    let (status, body) = call(&app, "GET", &format!("/api/projects/deployment/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["build_id"], run.id());

    let (status, body) = call(&app, "GET", &format!("/api/projects/events/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let events = body["events"].as_array().unwrap();
    assert!(!events.is_empty());
    let last = events.last().unwrap()["timestamp"].as_i64().unwrap();

    let uri = format!("/api/projects/events/{}?since={}", id, last + 1);
    let (_, body) = call(&app, "GET", &uri, None).await;
    assert_eq!(body["events"], json!([]));

    let uri = format!("/api/projects/events/{}?since={}&until={}", id, last, last);
    let (_, body) = call(&app, "GET", &uri, None).await;
    assert!(!body["events"].as_array().unwrap().is_empty());

    // Delete forgets the record and tears the live deployment down
    let address = run.address().unwrap().to_string();
    assert!(h.proxy_file(&id).exists());
    let report = h.state.projects.delete(&id).await.unwrap().wait().await.unwrap();
    assert!(report.is_clean());
    assert!(matches!(report.address, Ok(true)));
    assert!(matches!(report.proxy_config, Ok(true)));
    assert!(matches!(report.container, Ok(true)));

    assert!(h.runner.ran(&format!("docker rm -f {}", run.container_name())));
    assert!(h.runner.ran(&format!("docker rmi -f {}", run.id())));
    assert!(!h.state.allocator.is_reserved(&address).await);
    assert!(!h.proxy_file(&id).exists());
    assert_eq!(h.state.bus.capture().len(&id), 0);

    let (status, _) = call(&app, "GET", &format!("/api/projects/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, list) = call(&app, "GET", "/api/projects/list", None).await;
    assert_eq!(list, json!([]));
    let (status, _) = call(&app, "GET", &format!("/api/projects/deployment/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_endpoint_removes_project() {
    let h = Harness::new(ScriptedRunner::new()).await;
    let app = app(&h);
    let (_, created) = call(&app, "POST", "/api/projects/create", Some(create_body())).await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = call(&app, "POST", &format!("/api/projects/delete/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["id"], id);

    let (status, _) = call(&app, "GET", &format!("/api/projects/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, list) = call(&app, "GET", "/api/projects/list", None).await;
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn test_update_keeps_container_identity() {
    let mut h = Harness::new(ScriptedRunner::new()).await;
    start_workers(&mut h);
    let app = app(&h);

    let queued = h
        .state
        .projects
        .create(serde_json::from_value(create_body()).unwrap())
        .await
        .unwrap();
    let id = queued.project_id.clone();
    let run = queued.completion.wait().await.unwrap();

    let mut body = create_body();
    body["alloc_domain"] = json!("www.example.com");
    body["expose_port"] = json!("8080");
    let (status, _) = call(&app, "POST", &format!("/api/projects/update/{}", id), Some(body)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, project) = call(&app, "GET", &format!("/api/projects/{}", id), None).await;
    assert_eq!(project["alloc_domain"], "www.example.com");
    assert_eq!(project["expose_port"], 8080);
    assert_eq!(project["container_id"], json!(run.container_name()));
}
