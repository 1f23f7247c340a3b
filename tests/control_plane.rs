//! Control plane tests: application, HTTP handlers and WebSocket messages.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use sync_core::{JobConfig, NodeConfig, Row, UniversalValue};
use sync_store::{DatabaseRegistry, MemoryDatabase};
use tower::ServiceExt;
use unify_sync::server::{handle_ws_text, router, WsOutbound};
use unify_sync::{AppConfig, AppError, Application, JobSummary, Report, RunMode, RunResponse};

const MAPPING: &str =
    "MAP films.title TO archive.name MATCH BY IDS(films.id, archive.id) DO INSERT, UPDATE";

fn film(id: i64, title: &str) -> Row {
    Row::from([
        ("id".to_string(), UniversalValue::Int(id)),
        ("title".to_string(), UniversalValue::String(title.to_string())),
    ])
}

fn films_job(interval: &str) -> JobConfig {
    let node = |name: &str, table: &str| NodeConfig {
        name: name.to_string(),
        database: "local".to_string(),
        table: table.to_string(),
        key: "id".to_string(),
    };
    JobConfig {
        name: "films".to_string(),
        nodes: vec![node("films", "film"), node("archive", "archive")],
        mappings: vec![MAPPING.to_string()],
        simulation: false,
        interval: interval.to_string(),
    }
}

fn application(interval: &str) -> (Arc<MemoryDatabase>, Arc<Application>) {
    let db = Arc::new(
        MemoryDatabase::named("local").with_table("film", vec![film(1, "Alien"), film(2, "Aliens")]),
    );
    let mut registry = DatabaseRegistry::new();
    registry.register(db.clone());
    let app = Application::new(registry, vec![films_job(interval)]);
    (db, Arc::new(app))
}

async fn send(app: &Arc<Application>, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router(Arc::clone(app)).oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_one_off_run_returns_report() {
    let (db, app) = application("60s");
    let response = app.run("films", RunMode::OneOff, Some(true)).await.unwrap();
    let RunResponse::Report(bytes) = response else {
        panic!("expected a report");
    };
    let report: Report = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(report.links["0.0"].inserts.len(), 2);
    assert!(db.writes().is_empty());
    assert!(!app.is_running("films"));
    assert_eq!(app.last_report("films"), Some(bytes));
}

#[tokio::test]
async fn test_run_rejections() {
    let (_db, app) = application("60s");

    assert!(matches!(
        app.run("shelf", RunMode::OneOff, None).await,
        Err(AppError::UnknownJob(name)) if name == "shelf"
    ));
    assert!(matches!(
        app.run("films", RunMode::Ongoing, Some(true)).await,
        Err(AppError::OngoingSimulation(_))
    ));
    assert!(matches!(app.stop_job("films"), Err(AppError::NotRunning(_))));
    assert!(!app.is_running("films"));
}

#[tokio::test]
async fn test_ongoing_job_runs_until_stopped() {
    let (db, app) = application("50ms");

    let message = app.start_job("films").unwrap();
    assert!(message.contains("ongoing synchronization started"));
    assert!(app.is_running("films"));
    assert!(matches!(
        app.run("films", RunMode::OneOff, None).await,
        Err(AppError::AlreadyRunning(_))
    ));

    let listed = app.list_jobs();
    assert_eq!(listed[0].running, Some(RunMode::Ongoing));

    tokio::time::sleep(Duration::from_millis(200)).await;
    app.stop_job("films").unwrap();
    assert!(app.wait_idle("films", Duration::from_secs(5)).await);

    // Later rounds find the inserted rows and stay idle.
    assert_eq!(db.rows("archive").len(), 2);
    let report: Report = serde_json::from_slice(&app.last_report("films").unwrap()).unwrap();
    assert!(report.links["0.0"].inserts.is_empty());
    assert!(app.list_jobs()[0].running.is_none());
}

#[tokio::test]
async fn test_check_jobs() {
    let (_db, app) = application("60s");
    let results = app.check_jobs().await;
    assert_eq!(results.len(), 1);
    let (name, plans) = &results[0];
    assert_eq!(name, "films");
    assert_eq!(plans.as_ref().unwrap().len(), 1);
}

#[tokio::test]
async fn test_http_run() {
    let (_db, app) = application("60s");

    let (status, body) = send(&app, Method::GET, "/run?type=one-off&run=films&simulation=true").await;
    assert_eq!(status, StatusCode::OK);
    let report: Report = serde_json::from_slice(&body).unwrap();
    assert!(report.message.contains("simulation was successful"));

    let (status, _) = send(&app, Method::GET, "/jobs/films/report").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_http_rejects_bad_requests() {
    let (_db, app) = application("60s");

    let cases = [
        ("/run?run=films", StatusCode::BAD_REQUEST),
        ("/run?type=one-off", StatusCode::BAD_REQUEST),
        ("/run?type=weekly&run=films", StatusCode::BAD_REQUEST),
        ("/run?type=one-off&run=films&simulation=maybe", StatusCode::BAD_REQUEST),
        ("/run?type=ongoing&run=films&simulation=true", StatusCode::BAD_REQUEST),
        ("/run?type=one-off&run=shelf", StatusCode::NOT_FOUND),
        ("/jobs/films/report", StatusCode::NOT_FOUND),
    ];
    for (uri, expected) in cases {
        let (status, body) = send(&app, Method::GET, uri).await;
        assert_eq!(status, expected, "{uri}");
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(error["error"].is_string(), "{uri}");
    }

    let (status, _) = send(&app, Method::POST, "/jobs/films/stop").await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(&app, Method::POST, "/jobs/shelf/start").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_http_start_and_stop() {
    let (_db, app) = application("1h");

    let (status, _) = send(&app, Method::POST, "/jobs/films/start").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = send(&app, Method::POST, "/jobs/films/start").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, Method::GET, "/jobs").await;
    assert_eq!(status, StatusCode::OK);
    let jobs: Vec<JobSummary> = serde_json::from_slice(&body).unwrap();
    assert_eq!(jobs[0].running, Some(RunMode::Ongoing));

    let (status, _) = send(&app, Method::POST, "/jobs/films/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.wait_idle("films", Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_websocket_messages() {
    let (_db, app) = application("1h");

    let reply: WsOutbound = handle_ws_text(&app, r#"{"id":"1","name":"getJobList"}"#);
    assert_eq!(reply.id, "1");
    assert_eq!(reply.name, "jobListFetched");
    assert!(reply.success);
    let jobs: Vec<JobSummary> = serde_json::from_str(&reply.data.payload).unwrap();
    assert_eq!(jobs[0].name, "films");

    let reply = handle_ws_text(&app, r#"{"id":"2","name":"stopJob","data":{"payload":"films"}}"#);
    assert_eq!(reply.name, "jobStopped");
    assert!(!reply.success);

    let reply = handle_ws_text(&app, r#"{"id":"3","name":"startJob","data":{"payload":"films"}}"#);
    assert_eq!(reply.name, "jobStarted");
    assert!(reply.success);

    let reply = handle_ws_text(&app, r#"{"id":"4","name":"stopJob","data":{"payload":"films"}}"#);
    assert!(reply.success);
    assert!(app.wait_idle("films", Duration::from_secs(5)).await);

    let reply = handle_ws_text(&app, r#"{"id":"5","name":"dance"}"#);
    assert_eq!(reply.name, "unknownRequest");
    assert!(!reply.success);
    assert_eq!(reply.data.message, "Unknown websocket request name \"dance\".");

    let reply = handle_ws_text(&app, "not json");
    assert_eq!(reply.name, "invalidRequest");
    assert!(!reply.success);
}

#[tokio::test]
async fn test_application_from_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("databases.yaml"),
        r#"
databases:
  - name: local
    kind: memory
    seed:
      film:
        - { id: 1, title: Alien }
        - { id: 2, title: Aliens }
      archive:
        - { id: 1, name: Alien (1979) }
"#,
    )
    .unwrap();
    fs::create_dir(dir.path().join("jobs")).unwrap();
    fs::write(
        dir.path().join("jobs").join("films.yaml"),
        format!(
            "name: films\nsimulation: true\nnodes:\n  - {{ name: films, database: local, table: film, key: id }}\n  - {{ name: archive, database: local, table: archive, key: id }}\nmappings:\n  - \"{MAPPING}\"\n"
        ),
    )
    .unwrap();

    let config = AppConfig::load(dir.path()).unwrap();
    let app = Application::from_config(&config);
    let RunResponse::Report(bytes) = app.run("films", RunMode::OneOff, None).await.unwrap() else {
        panic!("expected a report");
    };
    let report: Report = serde_json::from_slice(&bytes).unwrap();
    let link = &report.links["0.0"];
    assert_eq!(link.updates.len(), 1);
    assert_eq!(link.inserts.len(), 1);
    assert!(report.message.contains("simulation"));

    assert!(matches!(
        app.run("films", RunMode::Ongoing, None).await,
        Err(AppError::OngoingSimulation(_))
    ));
}

#[tokio::test]
async fn test_shipped_config() {
    let config = AppConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config")).unwrap();
    let app = Application::from_config(&config);
    for (name, result) in app.check_jobs().await {
        assert!(result.is_ok(), "{name}: {result:?}");
    }

    let RunResponse::Report(bytes) = app.run("archive", RunMode::OneOff, None).await.unwrap() else {
        panic!("expected a report");
    };
    let report: Report = serde_json::from_slice(&bytes).unwrap();
    for link_id in ["0.0", "0.1"] {
        let link = &report.links[link_id];
        assert_eq!(link.idle.len(), 1, "{link_id}");
        assert_eq!(link.inserts.len(), 1, "{link_id}");
        assert_eq!(link.updates.len(), 1, "{link_id}");
    }
}
