//! End-to-end synchronization runs against in-memory databases.

use std::sync::Arc;
use sync_core::{JobConfig, NodeConfig, Row, UniversalValue};
use sync_store::{DatabaseRegistry, MemoryDatabase, WriteOperation};
use tokio_util::sync::CancellationToken;
use unify_sync::{
    run_job, ActionType, ConfigurationError, Report, RunStatus, SyncError, SyncRun,
};

fn film(id: i64, title: &str) -> Row {
    Row::from([
        ("id".to_string(), UniversalValue::Int(id)),
        ("title".to_string(), UniversalValue::String(title.to_string())),
    ])
}

fn archived(id: i64, name: &str) -> Row {
    Row::from([
        ("id".to_string(), UniversalValue::Int(id)),
        ("name".to_string(), UniversalValue::String(name.to_string())),
    ])
}

fn node(name: &str, table: &str) -> NodeConfig {
    NodeConfig {
        name: name.to_string(),
        database: "local".to_string(),
        table: table.to_string(),
        key: "id".to_string(),
    }
}

fn job(mapping: &str, simulation: bool) -> JobConfig {
    JobConfig {
        name: "films".to_string(),
        nodes: vec![node("films", "film"), node("archive", "archive")],
        mappings: vec![mapping.to_string()],
        simulation,
        interval: "60s".to_string(),
    }
}

fn setup(films: Vec<Row>, archive: Vec<Row>) -> (Arc<MemoryDatabase>, DatabaseRegistry) {
    let db = Arc::new(
        MemoryDatabase::named("local")
            .with_table("film", films)
            .with_table("archive", archive),
    );
    let mut registry = DatabaseRegistry::new();
    registry.register(db.clone());
    (db, registry)
}

async fn run(job: &JobConfig, registry: &DatabaseRegistry, simulation: bool) -> Report {
    let result = run_job(job, registry, simulation, &CancellationToken::new(), None)
        .await
        .unwrap();
    assert_eq!(result.status, RunStatus::Completed);
    result.parsed_report().unwrap()
}

const UPDATE: &str = "MAP films.title TO archive.name MATCH BY IDS(films.id, archive.id) DO UPDATE";
const INSERT: &str = "MAP films.title TO archive.name MATCH BY IDS(films.id, archive.id) DO INSERT";
const BOTH: &str =
    "MAP films.title TO archive.name MATCH BY IDS(films.id, archive.id) DO INSERT, UPDATE";

#[tokio::test]
async fn test_update_differing_value() {
    let (db, registry) = setup(vec![film(1, "Alien")], vec![archived(1, "Alien (1979)")]);
    let report = run(&job(UPDATE, false), &registry, false).await;

    assert!(report.message.starts_with("'films' synchronization was successful."));
    let link = &report.links["0.0"];
    assert_eq!(link.cmd, UPDATE);
    assert_eq!(link.updates.len(), 1);
    assert!(link.idle.is_empty() && link.inserts.is_empty());

    let record = &link.updates[0];
    assert_eq!(record.source_node_key, "id");
    assert_eq!(record.source_data, serde_json::json!(1));
    assert_eq!(record.source_column_data, serde_json::json!("Alien"));
    assert_eq!(record.target_key_name, "id");
    assert_eq!(record.target_key_value, serde_json::json!(1));
    assert_eq!(record.target_column_data, serde_json::json!("Alien (1979)"));
    assert_eq!(record.action_type, ActionType::Update);
    assert!(record.error.is_none());

    let rows = db.rows("archive");
    assert_eq!(rows[0]["name"], UniversalValue::String("Alien".to_string()));
}

#[tokio::test]
async fn test_simulated_update_writes_nothing() {
    let (db, registry) = setup(vec![film(1, "Alien")], vec![archived(1, "Alien (1979)")]);
    let report = run(&job(UPDATE, true), &registry, true).await;

    assert!(report.message.starts_with("'films' simulation was successful."));
    assert_eq!(report.links["0.0"].updates.len(), 1);
    assert!(db.writes().is_empty());
    assert_eq!(
        db.rows("archive")[0]["name"],
        UniversalValue::String("Alien (1979)".to_string())
    );
}

#[tokio::test]
async fn test_insert_only_registers_new_record() {
    let (db, registry) = setup(
        vec![film(1, "Alien"), film(2, "Aliens")],
        vec![archived(1, "Alien (1979)")],
    );
    let job = job(INSERT, false);

    let run = SyncRun::init(&job, &registry, false, None).await.unwrap();
    let status = run.synchronize(&CancellationToken::new()).await.unwrap();
    assert_eq!(status, RunStatus::Completed);

    let archive = run.topology().table("local.archive").unwrap();
    assert_eq!(archive.len(), 2);
    let inserted = archive.record(&UniversalValue::Int(2)).unwrap();
    assert_eq!(inserted.get("name"), &UniversalValue::String("Aliens".to_string()));
    assert_eq!(inserted.paired_in(), vec![0]);

    let report: Report = run.finalize(status).unwrap().parsed_report().unwrap();
    let link = &report.links["0.0"];
    assert_eq!(link.idle.len(), 1);
    assert_eq!(link.inserts.len(), 1);
    assert!(link.updates.is_empty());
    assert_eq!(link.inserts[0].target_key_value, serde_json::json!(2));

    let writes = db.writes();
    assert_eq!(writes.len(), 1);
    assert!(matches!(
        &writes[0],
        WriteOperation::Insert { table, key_value, .. }
            if table == "archive" && *key_value == UniversalValue::Int(2)
    ));
    assert_eq!(db.rows("archive").len(), 2);
}

#[tokio::test]
async fn test_equal_values_are_idle() {
    let (db, registry) = setup(vec![film(1, "Alien")], vec![archived(1, "Alien")]);
    let report = run(&job(BOTH, false), &registry, false).await;

    let link = &report.links["0.0"];
    assert_eq!(link.idle.len(), 1);
    assert!(link.inserts.is_empty() && link.updates.is_empty());
    assert!(db.writes().is_empty());
}

#[tokio::test]
async fn test_simulation_reports_are_identical() {
    let (_db, registry) = setup(
        vec![film(1, "Alien"), film(2, "Aliens"), film(3, "Alien 3")],
        vec![archived(1, "Alien (1979)"), archived(3, "Alien 3")],
    );
    let job = job(BOTH, true);
    let cancel = CancellationToken::new();

    let first = run_job(&job, &registry, true, &cancel, None).await.unwrap();
    let second = run_job(&job, &registry, true, &cancel, None).await.unwrap();
    assert_eq!(first.report, second.report);
}

#[tokio::test]
async fn test_every_active_source_is_reported_once() {
    let (_db, registry) = setup(
        vec![
            film(1, "Alien"),
            film(2, "Aliens"),
            film(3, "Alien 3"),
            film(4, "Prometheus"),
        ],
        vec![archived(1, "Alien"), archived(3, "Alien 3 (1992)")],
    );
    let mapping = "MAP films.title TO archive.name WHERE SOURCE 'id > 1' \
                   MATCH BY IDS(films.id, archive.id) DO INSERT, UPDATE";
    let report = run(&job(mapping, true), &registry, true).await;

    let link = &report.links["0.0"];
    assert_eq!(link.len(), 3);
    assert_eq!(link.inserts.len(), 2);
    assert_eq!(link.updates.len(), 1);
    for record in link.idle.iter().chain(&link.inserts).chain(&link.updates) {
        assert_ne!(record.source_data, serde_json::json!(1));
    }
}

#[tokio::test]
async fn test_nodes_on_the_same_table_share_it() {
    let (_db, registry) = setup(vec![film(1, "Alien")], vec![archived(1, "Alien")]);
    let mut job = job(UPDATE, true);
    job.nodes.push(node("remakes", "film"));
    job.mappings
        .push("MAP remakes.title TO archive.name MATCH BY IDS(remakes.id, archive.id)".to_string());

    let run = SyncRun::init(&job, &registry, true, None).await.unwrap();
    assert_eq!(run.topology().tables().count(), 2);
    let films = run.topology().node("films").unwrap();
    let remakes = run.topology().node("remakes").unwrap();
    assert!(Arc::ptr_eq(&films.table, &remakes.table));
    assert_eq!(run.mappings().len(), 2);
}

#[tokio::test]
async fn test_long_values_are_truncated_in_report() {
    let title = "abcdefghijklmnopqrstuvwxyz";
    let (_db, registry) = setup(vec![film(1, title)], vec![]);
    let report = run(&job(INSERT, true), &registry, true).await;

    let record = &report.links["0.0"].inserts[0];
    assert_eq!(
        record.source_column_data,
        serde_json::json!("abcdefghijklmnopqrstuv...")
    );
    assert_eq!(record.target_key_name, "");
    assert!(record.target_key_value.is_null());
    assert!(record.target_column_data.is_null());
}

#[tokio::test]
async fn test_incomparable_values_are_idle_with_error() {
    let mut target = archived(1, "");
    target.insert("name".to_string(), UniversalValue::Int(7));
    let (db, registry) = setup(vec![film(1, "Alien")], vec![target]);
    let report = run(&job(UPDATE, false), &registry, false).await;

    let link = &report.links["0.0"];
    assert_eq!(link.idle.len(), 1);
    assert!(link.idle[0].error.as_deref().unwrap().contains("string"));
    assert!(db.writes().is_empty());
}

#[tokio::test]
async fn test_write_failures_stay_with_their_pair() {
    let (db, registry) = setup(
        vec![film(1, "Alien"), film(2, "Aliens")],
        vec![archived(1, "Alien (1979)"), archived(2, "Aliens (1986)")],
    );
    db.set_read_only("archive", true);
    let report = run(&job(UPDATE, false), &registry, false).await;

    let link = &report.links["0.0"];
    assert_eq!(link.updates.len(), 2);
    assert!(link.updates.iter().all(|r| r.error.is_some()));
}

#[tokio::test]
async fn test_stopped_run_reports_nothing() {
    let (db, registry) = setup(vec![film(1, "Alien")], vec![archived(1, "Alien (1979)")]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = run_job(&job(UPDATE, false), &registry, false, &cancel, None)
        .await
        .unwrap();
    assert_eq!(result.status, RunStatus::Stopped);

    let report = result.parsed_report().unwrap();
    assert!(report.message.contains("stopped before completion"));
    assert!(report.links["0.0"].is_empty());
    assert!(db.writes().is_empty());
}

#[tokio::test]
async fn test_configuration_errors_abort_before_writes() {
    let (db, registry) = setup(vec![film(1, "Alien")], vec![]);

    let mut unknown_db = job(INSERT, false);
    unknown_db.nodes[1].database = "remote".to_string();
    let err = run_job(&unknown_db, &registry, false, &CancellationToken::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Configuration(ConfigurationError::UnknownDatabase { ref database, .. })
            if database == "remote"
    ));

    let bad_mapping = job("MAP films.title archive.name", false);
    let err = run_job(&bad_mapping, &registry, false, &CancellationToken::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Parse { index: 0, .. }));

    assert!(db.writes().is_empty());
}

#[tokio::test]
async fn test_ongoing_rounds_carry_snapshots() {
    let (_db, registry) = setup(vec![film(1, "Alien"), film(2, "Aliens")], vec![]);
    let job = job(INSERT, false);
    let cancel = CancellationToken::new();

    let first = run_job(&job, &registry, false, &cancel, None).await.unwrap();
    assert_eq!(first.parsed_report().unwrap().links["0.0"].inserts.len(), 2);
    assert_eq!(first.snapshots["local.archive"].len(), 2);

    let second = run_job(&job, &registry, false, &cancel, Some(first.snapshots))
        .await
        .unwrap();
    let link = &second.parsed_report().unwrap().links["0.0"];
    assert_eq!(link.idle.len(), 2);
    assert!(link.inserts.is_empty());
}

#[tokio::test]
async fn test_multi_link_insert_writes_one_row() {
    let mut source = film(1, "Alien");
    source.insert("year".to_string(), UniversalValue::Int(1979));
    let (db, registry) = setup(vec![source], vec![]);
    let job = job(
        "MAP films.title TO archive.name, films.year TO archive.released \
         MATCH BY COLUMNS(films.id, archive.film_id) DO INSERT",
        false,
    );

    let report = run(&job, &registry, false).await;
    let rows = db.rows("archive");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], UniversalValue::Int(1));
    assert_eq!(rows[0]["film_id"], UniversalValue::Int(1));
    assert_eq!(rows[0]["name"], UniversalValue::String("Alien".to_string()));
    assert_eq!(rows[0]["released"], UniversalValue::Int(1979));
    assert_eq!(db.writes().len(), 1);

    for link_id in ["0.0", "0.1"] {
        let link = &report.links[link_id];
        assert_eq!(link.inserts.len(), 1, "{link_id}");
        assert!(link.inserts[0].error.is_none(), "{link_id}");
        assert_eq!(link.inserts[0].target_key_value, serde_json::json!(1), "{link_id}");
    }

    // The next run correlates both links with the single row.
    let report = run(&job, &registry, false).await;
    for link_id in ["0.0", "0.1"] {
        assert_eq!(report.links[link_id].idle.len(), 1, "{link_id}");
    }
    assert_eq!(db.rows("archive").len(), 1);
    assert_eq!(db.writes().len(), 1);
}

#[tokio::test]
async fn test_null_match_columns_never_pair() {
    let coded = |id: i64, code: Option<&str>, column: &str, value: &str| {
        Row::from([
            ("id".to_string(), UniversalValue::Int(id)),
            ("code".to_string(), code.into()),
            (column.to_string(), UniversalValue::String(value.to_string())),
        ])
    };
    let (db, registry) = setup(
        vec![
            coded(1, None, "title", "A"),
            coded(2, None, "title", "B"),
            coded(3, Some("c3"), "title", "C"),
        ],
        vec![
            coded(9, None, "name", "X"),
            coded(10, Some("c3"), "name", "Old"),
        ],
    );
    let mapping = "MAP films.title TO archive.name MATCH BY COLUMNS(films.code, archive.code) DO UPDATE";
    let report = run(&job(mapping, false), &registry, false).await;

    let link = &report.links["0.0"];
    assert_eq!(link.idle.len(), 2);
    assert_eq!(link.updates.len(), 1);
    assert_eq!(link.updates[0].source_data, serde_json::json!(3));
    assert_eq!(db.writes().len(), 1);

    let rows = db.rows("archive");
    let untouched = rows.iter().find(|r| r["id"] == UniversalValue::Int(9)).unwrap();
    assert_eq!(untouched["name"], UniversalValue::String("X".to_string()));
}

#[tokio::test]
async fn test_no_operations_keep_differing_values_idle() {
    for mapping in [
        "MAP films.title TO archive.name MATCH BY IDS(films.id, archive.id)",
        "MAP films.title TO archive.name MATCH BY IDS(films.id, archive.id) DO NOTHING",
    ] {
        let (db, registry) = setup(
            vec![film(1, "Alien"), film(2, "Aliens")],
            vec![archived(1, "Alien (1979)")],
        );
        let report = run(&job(mapping, false), &registry, false).await;

        let link = &report.links["0.0"];
        assert_eq!(link.idle.len(), 2, "{mapping}");
        assert!(link.inserts.is_empty() && link.updates.is_empty(), "{mapping}");
        assert!(db.writes().is_empty(), "{mapping}");
        assert_eq!(
            db.rows("archive")[0]["name"],
            UniversalValue::String("Alien (1979)".to_string())
        );
    }
}

#[tokio::test]
async fn test_update_of_vanished_row_is_reported() {
    let (db, registry) = setup(vec![film(1, "Alien")], vec![archived(1, "Alien (1979)")]);
    let job = job(UPDATE, false);

    let run = SyncRun::init(&job, &registry, false, None).await.unwrap();
    db.truncate("archive");
    let status = run.synchronize(&CancellationToken::new()).await.unwrap();

    let report = run.finalize(status).unwrap().parsed_report().unwrap();
    let update = &report.links["0.0"].updates[0];
    assert_eq!(update.error.as_deref(), Some("update matched no rows"));
    assert!(db.rows("archive").is_empty());
}
