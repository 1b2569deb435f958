use mysql_async::prelude::Queryable;
use tabledit_adapters::mysql::MysqlEditBackend;
use tabledit_core::edit_session::{EditSession, PageBackend};
use tabledit_core::settings::ConnectionProfile;
use tabledit_core::sql_render::{SqlDialect, TableTarget};
use tabledit_core::update_planner::SkipReason;
use tabledit_core::value::Scalar;

const DATABASE: &str = "tabledit_adapters_cov";

fn mysql_integration_enabled() -> bool {
    matches!(
        std::env::var("TABLEDIT_RUN_MYSQL_INTEGRATION").ok().as_deref(),
        Some("1")
    )
}

fn integration_profile(database: Option<&str>) -> ConnectionProfile {
    let host = std::env::var("TABLEDIT_TEST_DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let user = std::env::var("TABLEDIT_TEST_DB_USER").unwrap_or_else(|_| "root".to_string());
    let port = std::env::var("TABLEDIT_TEST_DB_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(3306);

    let mut profile = ConnectionProfile::new("adapters-integration", host, user);
    profile.port = port;
    profile.database = database.map(str::to_string);
    profile
}

async fn execute_sql(profile: &ConnectionProfile, statements: &[&str]) {
    let mut opts = mysql_async::OptsBuilder::default()
        .ip_or_hostname(profile.host.clone())
        .tcp_port(profile.port)
        .user(Some(profile.user.clone()))
        .db_name(profile.database.clone());
    if let Ok(password) = std::env::var("TABLEDIT_DB_PASSWORD") {
        opts = opts.pass(Some(password));
    }
    let mut conn = mysql_async::Conn::new(opts)
        .await
        .expect("setup connection should open");
    for statement in statements {
        conn.query_drop(*statement)
            .await
            .expect("setup statement should succeed");
    }
    conn.disconnect().await.expect("setup disconnect should succeed");
}

async fn prepare_database() -> ConnectionProfile {
    execute_sql(
        &integration_profile(None),
        &[&format!("CREATE DATABASE IF NOT EXISTS `{DATABASE}`")],
    )
    .await;
    integration_profile(Some(DATABASE))
}

#[tokio::test(flavor = "current_thread")]
async fn keyed_table_edits_round_trip_through_mysql() {
    if !mysql_integration_enabled() {
        return;
    }

    let profile = prepare_database().await;
    execute_sql(
        &profile,
        &[
            "DROP TABLE IF EXISTS integration_users",
            "CREATE TABLE integration_users (\
             id BIGINT NOT NULL PRIMARY KEY,\
             email VARCHAR(64) NOT NULL,\
             age INT NULL)",
            "INSERT INTO integration_users (id, email, age) VALUES \
             (1, 'a@example.com', 30), (2, 'b@example.com', NULL)",
        ],
    )
    .await;

    let backend = MysqlEditBackend::from_profile(&profile);
    let target = TableTarget::new(Some(DATABASE), "integration_users").expect("valid target");
    let mut session = EditSession::new(target.clone(), SqlDialect::MySql).with_page_size(1);
    let loaded = session
        .reload_page(&backend, 1)
        .await
        .expect("second page should load");
    assert_eq!(loaded, 1);
    assert_eq!(session.rows()[0].get("id"), Some(&Scalar::Integer(2)));

    let mut session = session.with_page_size(50);
    let loaded = session
        .reload_page(&backend, 0)
        .await
        .expect("page should load");
    assert_eq!(loaded, 2);
    assert!(session.columns().iter().any(|column| column.primary_key));

    session.record_edit(0, "email", Scalar::text("a2@example.com"));
    session.record_edit(1, "age", Scalar::Integer(41));
    let report = session.apply(&backend, None).await.expect("apply should run");
    assert!(report.is_complete());
    assert_eq!(report.applied.len(), 2);
    assert!(session.pending_changes().is_empty());

    let page = backend
        .fetch_page(&target, 50, 0)
        .await
        .expect("page should reload");
    assert_eq!(
        page.rows[0].get("email"),
        Some(&Scalar::text("a2@example.com"))
    );
    assert_eq!(page.rows[1].get("age"), Some(&Scalar::Integer(41)));

    backend.disconnect().await.expect("disconnect should succeed");
}

#[tokio::test(flavor = "current_thread")]
async fn stale_snapshot_is_reported_as_conflict() {
    if !mysql_integration_enabled() {
        return;
    }

    let profile = prepare_database().await;
    execute_sql(
        &profile,
        &[
            "DROP TABLE IF EXISTS integration_notes",
            "CREATE TABLE integration_notes (body VARCHAR(64) NULL, author VARCHAR(32) NULL)",
            "INSERT INTO integration_notes (body, author) VALUES ('draft', NULL)",
        ],
    )
    .await;

    let backend = MysqlEditBackend::from_profile(&profile);
    let target = TableTarget::new(Some(DATABASE), "integration_notes").expect("valid target");
    let mut session = EditSession::new(target, SqlDialect::MySql);
    session
        .reload(&backend, 50, 0)
        .await
        .expect("page should load");

    execute_sql(
        &profile,
        &["UPDATE integration_notes SET body = 'changed elsewhere'"],
    )
    .await;

    session.record_edit(0, "body", Scalar::text("final"));
    let report = session.apply(&backend, None).await.expect("apply should run");
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].conflict);
    assert_eq!(session.pending_changes().len(), 1);

    backend.disconnect().await.expect("disconnect should succeed");
}

#[tokio::test(flavor = "current_thread")]
async fn duplicate_unkeyed_rows_are_not_written() {
    if !mysql_integration_enabled() {
        return;
    }

    let profile = prepare_database().await;
    execute_sql(
        &profile,
        &[
            "DROP TABLE IF EXISTS integration_tags",
            "CREATE TABLE integration_tags (label VARCHAR(32) NOT NULL)",
            "INSERT INTO integration_tags (label) VALUES ('x'), ('x')",
        ],
    )
    .await;

    let backend = MysqlEditBackend::from_profile(&profile);
    let target = TableTarget::new(Some(DATABASE), "integration_tags").expect("valid target");
    let mut session = EditSession::new(target, SqlDialect::MySql);
    session
        .reload(&backend, 50, 0)
        .await
        .expect("page should load");

    session.record_edit(0, "label", Scalar::text("y"));
    let plan = session.plan();
    assert!(plan.statements.is_empty());
    assert!(matches!(
        plan.skipped[0].reason,
        SkipReason::AmbiguousRow { .. }
    ));

    backend.disconnect().await.expect("disconnect should succeed");
}
