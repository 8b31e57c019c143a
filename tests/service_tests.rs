//! Black-box tests of `DatabaseService` over an in-memory driver.
//!
//! Time is paused so backoff, connect deadlines and cache TTLs run
//! instantly and deterministically.

mod common;

use common::{service, service_with, test_config, Call, MockConnector};
use futures_util::future::join_all;
use mssql_mcp_bridge::database::metadata::SCHEMA_QUERY;
use mssql_mcp_bridge::database::{
    ParamValue, PoolState, ProcedureParam, QueryResult, RecordSet,
};
use mssql_mcp_bridge::error::{DriverError, ErrorKind};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn whitelisted(dbs: &[&str]) -> mssql_mcp_bridge::Config {
    let mut config = test_config();
    config.security.allowed_databases = dbs.iter().map(|s| s.to_string()).collect();
    config
}

fn trailer(return_value: Value, rows_affected: Value) -> RecordSet {
    RecordSet::with_columns(&["__return_value", "__rows_affected"])
        .push_row(vec![return_value, rows_affected])
}

fn schema_rows() -> RecordSet {
    RecordSet::with_columns(&[
        "table_schema",
        "table_name",
        "column_name",
        "ordinal_position",
        "data_type",
        "max_length",
        "numeric_precision",
        "numeric_scale",
        "is_nullable",
        "is_primary_key",
    ])
    .push_row(vec![
        json!("dbo"), json!("Users"), json!("Id"), json!(1), json!("int"),
        Value::Null, json!(10), json!(0), json!("NO"), json!(1),
    ])
    .push_row(vec![
        json!("dbo"), json!("Users"), json!("Email"), json!(2), json!("nvarchar"),
        json!(255), Value::Null, Value::Null, json!("YES"), json!(0),
    ])
}

fn schema_handler(call: &Call) -> Result<Vec<RecordSet>, DriverError> {
    if call.sql == SCHEMA_QUERY {
        Ok(vec![schema_rows()])
    } else {
        Ok(Vec::new())
    }
}

// =========================================================================
// Whitelist
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_empty_whitelist_allows_any_database() {
    let connector = MockConnector::new();
    let state = connector.state();
    let service = service(connector);

    let result = service.execute_query("SELECT 1", Some("AnyDb")).await.unwrap();

    assert_eq!(result.record_count(), 1);
    assert_eq!(state.calls()[0].database, "AnyDb");
}

#[tokio::test(start_paused = true)]
async fn test_database_outside_whitelist_is_rejected() {
    let connector = MockConnector::new();
    let state = connector.state();
    let service = service_with(&whitelisted(&["Db1", "Db2"]), connector);

    let err = service.execute_query("SELECT 1", Some("Db3")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PermissionError);
    assert_eq!(err.detail("database"), Some(&json!("Db3")));
    assert_eq!(err.detail("allowed"), Some(&json!(["Db1", "Db2"])));
    assert_eq!(state.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_whitelist_applies_to_every_operation() {
    let service = service_with(&whitelisted(&["Db1"]), MockConnector::new());

    let procedure = service
        .execute_stored_procedure("dbo.GetUsers", &[], Some("Db2"))
        .await
        .unwrap_err();
    let schema = service.get_schema(Some("Db2")).await.unwrap_err();

    assert_eq!(procedure.kind(), ErrorKind::PermissionError);
    assert_eq!(schema.kind(), ErrorKind::PermissionError);
    assert!(service.execute_query("SELECT 1", Some("Db1")).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_blank_database_targets_default() {
    let service = service_with(&whitelisted(&["Db1"]), MockConnector::new());

    let err = service.execute_query("SELECT 1", Some("   ")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PermissionError);
    assert_eq!(err.detail("database"), Some(&json!("master")));
}

// =========================================================================
// Query validation and context switching
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_drop_table_is_rejected() {
    let connector = MockConnector::new();
    let state = connector.state();
    let service = service(connector);

    let err = service.execute_query("DROP TABLE Foo", None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert!(err.message().starts_with("Only SELECT queries are allowed"));
    assert!(state.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_blocked_substring_in_select_is_rejected() {
    let service = service(MockConnector::new());

    let err = service
        .execute_query("SELECT * FROM sp_who", None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(err.detail("pattern"), Some(&json!("sp_")));
}

#[tokio::test(start_paused = true)]
async fn test_writes_are_rejected() {
    let service = service(MockConnector::new());

    for sql in [
        "INSERT INTO Users (Id) VALUES (1)",
        "UPDATE Users SET Name = 'x'",
        "DELETE FROM Users",
        "SELECT * INTO Copy FROM Users",
    ] {
        let err = service.execute_query(sql, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError, "{sql}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_empty_and_unparseable_queries() {
    let service = service(MockConnector::new());

    let empty = service.execute_query("  \n ", None).await.unwrap_err();
    let garbage = service.execute_query("SELEC FROM WHERE", None).await.unwrap_err();

    assert_eq!(empty.kind(), ErrorKind::ValidationError);
    assert_eq!(garbage.kind(), ErrorKind::SqlParserError);
}

#[tokio::test(start_paused = true)]
async fn test_every_batch_names_its_database() {
    let connector = MockConnector::new();
    let state = connector.state();
    let service = service(connector);

    service.execute_query("SELECT 1", None).await.unwrap();
    service.execute_query("SELECT 1", Some("MASTER")).await.unwrap();
    service.execute_query("SELECT 1", Some("Sales")).await.unwrap();
    service.execute_query("SELECT 1", None).await.unwrap();

    let databases: Vec<String> = state.calls().into_iter().map(|c| c.database).collect();
    assert_eq!(databases, vec!["master", "master", "Sales", "master"]);
    assert_eq!(state.session_database(), "master");
}

#[tokio::test(start_paused = true)]
async fn test_default_query_after_timed_out_switch_runs_in_default() {
    let connector = MockConnector::new().with_handler(|call| {
        if call.database == "Sales" {
            Err(DriverError::RequestTimeout(Duration::from_secs(30)))
        } else {
            Ok(vec![RecordSet::with_columns(&["name"]).push_row(vec![json!(call.database)])])
        }
    });
    let state = connector.state();
    let service = service(connector);

    let err = service.execute_query("SELECT 1", Some("Sales")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionTimeout);
    assert_eq!(state.session_database(), "Sales");

    let result = service.execute_query("SELECT DB_NAME() AS name", None).await.unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["rows"][0][0], json!("master"));

    let last = state.calls().pop().unwrap();
    assert_eq!(last.inherited, "Sales");
    assert_eq!(last.database, "master");
    assert_eq!(state.session_database(), "master");
    assert_eq!(state.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unsafe_database_name_is_rejected() {
    let connector = MockConnector::new();
    let state = connector.state();
    let service = service(connector);

    let err = service
        .execute_query("SELECT 1", Some("x]; DROP DATABASE y; --"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert!(state.calls().is_empty());
}

// =========================================================================
// Result shaping
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_empty_row_set_keeps_columns() {
    let service = service(
        MockConnector::new().with_handler(|_| Ok(vec![RecordSet::with_columns(&["Id", "Name"])])),
    );

    let result = service
        .execute_query("SELECT Id, Name FROM Users WHERE 1 = 0", None)
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_value(&result).unwrap(),
        json!({"columns": ["Id", "Name"], "rows": [], "recordCount": 0})
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_row_set_is_success() {
    let service = service(MockConnector::new().with_handler(|_| Ok(Vec::new())));

    let result = service.execute_query("SELECT 1", None).await.unwrap();

    assert!(matches!(result, QueryResult::Message(_)));
    assert_eq!(result.record_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rows_are_positional() {
    let service = service(MockConnector::new().with_handler(|_| {
        Ok(vec![RecordSet::with_columns(&["Id", "Name"])
            .push_row(vec![json!(1), json!("Ada")])
            .push_row(vec![json!(2), Value::Null])])
    }));

    let result = service.execute_query("SELECT Id, Name FROM Users", None).await.unwrap();
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["rows"], json!([[1, "Ada"], [2, null]]));
    assert_eq!(json["recordCount"], 2);
}

// =========================================================================
// Stored procedures
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_stored_procedure_with_rows() {
    let connector = MockConnector::new().with_handler(|_| {
        Ok(vec![
            RecordSet::with_columns(&["Id", "Name"]).push_row(vec![json!(5), json!("Ada")]),
            trailer(json!(0), json!(1)),
        ])
    });
    let state = connector.state();
    let service = service(connector);

    let result = service
        .execute_stored_procedure(
            "dbo.GetUsers",
            &[ProcedureParam::input("Id", "int", json!(5))],
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.columns, Some(vec!["Id".to_string(), "Name".to_string()]));
    assert_eq!(result.rows.as_ref().map(Vec::len), Some(1));
    assert_eq!(result.record_count, 1);
    assert_eq!(result.return_value, json!(0));
    assert_eq!(result.rows_affected, vec![1]);

    let call = &state.calls()[0];
    assert!(call.sql.contains("EXEC @__return_value = [dbo].[GetUsers] @Id = @P1"));
    assert_eq!(call.params, vec![ParamValue::Int(Some(5))]);
}

#[tokio::test(start_paused = true)]
async fn test_stored_procedure_output_parameters() {
    let service = service(MockConnector::new().with_handler(|_| {
        Ok(vec![RecordSet::with_columns(&["__return_value", "__rows_affected", "Total"])
            .push_row(vec![json!(0), json!(0), json!(42)])])
    }));

    let result = service
        .execute_stored_procedure(
            "CountUsers",
            &[
                ProcedureParam::input("@Active", "boolean", json!(true)),
                ProcedureParam::output("Total", "int"),
            ],
            None,
        )
        .await
        .unwrap();

    assert!(result.columns.is_none());
    assert!(result.message.is_some());
    assert_eq!(result.output.get("Total"), Some(&json!(42)));
    assert_eq!(result.return_value, json!(0));
}

#[tokio::test(start_paused = true)]
async fn test_stored_procedure_input_errors() {
    let connector = MockConnector::new();
    let state = connector.state();
    let service = service(connector);

    let bad_name = service
        .execute_stored_procedure("dbo.Get;Users", &[], None)
        .await
        .unwrap_err();
    let missing_type = service
        .execute_stored_procedure(
            "GetUsers",
            &[ProcedureParam {
                name: Some("Id".into()),
                ..Default::default()
            }],
            None,
        )
        .await
        .unwrap_err();
    let bad_value = service
        .execute_stored_procedure(
            "GetUsers",
            &[ProcedureParam::input("Id", "int", json!("five"))],
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(bad_name.kind(), ErrorKind::ValidationError);
    assert_eq!(missing_type.kind(), ErrorKind::ValidationError);
    assert_eq!(bad_value.kind(), ErrorKind::ValidationError);
    assert!(state.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_parameter_type_defaults_to_nvarchar() {
    let connector = MockConnector::new().with_handler(|_| Ok(vec![trailer(json!(0), json!(0))]));
    let state = connector.state();
    let service = service(connector);

    service
        .execute_stored_procedure(
            "Search",
            &[ProcedureParam::input("Term", "textish", json!("abc"))],
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        state.calls()[0].params,
        vec![ParamValue::String(Some("abc".to_string()))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_procedure_failure_kind() {
    let service = service(MockConnector::new().with_handler(|_| {
        Err(DriverError::other("Could not find stored procedure 'Nope'"))
    }));

    let err = service
        .execute_stored_procedure("Nope", &[], None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StoredProcedureError);
    assert_eq!(err.detail("procedure"), Some(&json!("Nope")));
}

// =========================================================================
// Error classification
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_driver_failures_are_classified() {
    let cases = [
        ("The SELECT permission was denied on the object 'Users'", ErrorKind::PermissionError),
        ("The INSERT statement conflicted with the FOREIGN KEY constraint", ErrorKind::ValidationError),
        ("Database 'Archive' does not exist. Make sure that the name is entered correctly.", ErrorKind::DatabaseError),
        ("Invalid column name 'Nope'", ErrorKind::QueryError),
    ];

    for (message, expected) in cases {
        let service = service(
            MockConnector::new().with_handler(move |_| Err(DriverError::other(message))),
        );
        let err = service.execute_query("SELECT Nope FROM Users", None).await.unwrap_err();
        assert_eq!(err.kind(), expected, "{message}");
        assert!(err.detail("query").is_some());
    }
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_does_not_rebuild() {
    let connector = MockConnector::new()
        .with_handler(|_| Err(DriverError::RequestTimeout(Duration::from_secs(30))));
    let state = connector.state();
    let service = service(connector);

    let err = service.execute_query("SELECT 1", None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionTimeout);
    assert_eq!(state.connects(), 1);
}

// =========================================================================
// Pool lifecycle
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_reports_attempts() {
    let connector = MockConnector::new().failing_always();
    let state = connector.state();
    let service = service(connector);

    let err = service.get_pool().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    assert_eq!(err.detail("attempts"), Some(&json!(3)));
    assert_eq!(state.connects(), 3);
    assert_eq!(
        state.connect_gaps(),
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
    assert_eq!(service.pool_state(), PoolState::Absent);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_is_capped() {
    let mut config = test_config();
    config.retry.max_attempts = 5;
    config.retry.max_delay = Duration::from_millis(300);

    let connector = MockConnector::new().failing_always();
    let state = connector.state();
    let service = service_with(&config, connector);

    service.get_pool().await.unwrap_err();

    let gaps = state.connect_gaps();
    assert_eq!(gaps.len(), 4);
    assert!(gaps.windows(2).all(|w| w[0] <= w[1]));
    assert!(gaps.iter().all(|g| *g <= Duration::from_millis(300)));
    assert_eq!(gaps[3], Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recover() {
    let connector = MockConnector::new().failing_times(2);
    let state = connector.state();
    let service = service(connector);

    service.get_pool().await.unwrap();

    assert_eq!(state.connects(), 3);
    assert_eq!(service.pool_state(), PoolState::Live);
}

#[tokio::test(start_paused = true)]
async fn test_missing_credentials_are_not_retried() {
    let connector = MockConnector::new().without_credentials();
    let state = connector.state();
    let service = service(connector);

    let err = service.get_pool().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(state.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_creation() {
    let connector = MockConnector::new().with_connect_delay(Duration::from_millis(500));
    let state = connector.state();
    let service = service(connector);

    let results = join_all((0..8).map(|_| service.get_pool())).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(state.connects(), 1);
    assert_eq!(service.pool_state(), PoolState::Live);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_failures_share_one_retry_sequence() {
    let connector = MockConnector::new().failing_always();
    let state = connector.state();
    let service = service(connector);

    let results = join_all((0..4).map(|_| service.execute_query("SELECT 1", None))).await;

    assert!(results.iter().all(|r| r
        .as_ref()
        .is_err_and(|e| e.kind() == ErrorKind::ConnectionError)));
    assert_eq!(state.connects(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_connect_deadline_times_out() {
    let mut config = test_config();
    config.retry.max_attempts = 1;

    let connector = MockConnector::new().hanging();
    let state = connector.state();
    let service = service_with(&config, connector);

    let err = service.get_pool().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    assert_eq!(err.detail("lastErrorKind"), Some(&json!("ConnectionTimeout")));
    assert_eq!(state.open_resources(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_in_flight_creation() {
    let connector = MockConnector::new().hanging();
    let state = connector.state();
    let service = Arc::new(service(connector));

    let waiter = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.get_pool().await.map(|_| ()) }
    });

    for _ in 0..10 {
        if state.open_resources() > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(service.pool_state(), PoolState::Connecting);

    service.close_pool();
    let err = waiter.await.unwrap().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    assert!(err.message().contains("cancelled"));
    assert_eq!(service.pool_state(), PoolState::Absent);
    assert_eq!(state.open_resources(), 0);

    service.close_pool();
    assert_eq!(service.pool_state(), PoolState::Absent);
}

#[tokio::test(start_paused = true)]
async fn test_pool_error_event_forces_rebuild() {
    let connector = MockConnector::new();
    let state = connector.state();
    let service = service(connector);

    service.get_pool().await.unwrap();
    state.raise_pool_error("socket closed");
    assert_eq!(service.pool_state(), PoolState::Absent);

    service.execute_query("SELECT 1", None).await.unwrap();
    assert_eq!(state.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_liveness_check_discards_pool() {
    let connector = MockConnector::new();
    let state = connector.state();
    let service = service(connector);

    service.get_pool().await.unwrap();
    state.healthy.store(false, Ordering::SeqCst);

    let err = service.get_pool().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    // The discarded pool plus one per failed verification attempt.
    assert_eq!(state.closed_pools(), 4);

    state.healthy.store(true, Ordering::SeqCst);
    service.get_pool().await.unwrap();
    assert_eq!(service.pool_state(), PoolState::Live);
}

#[tokio::test(start_paused = true)]
async fn test_connection_error_rebuilds_and_surfaces_original() {
    let failures = Arc::new(AtomicU32::new(1));
    let remaining = Arc::clone(&failures);
    let connector = MockConnector::new().with_handler(move |_| {
        if remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            Err(DriverError::Pool("connection reset".into()))
        } else {
            Ok(vec![RecordSet::with_columns(&["value"]).push_row(vec![json!(1)])])
        }
    });
    let state = connector.state();
    let service = service(connector);

    let err = service.execute_query("SELECT 1", None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    assert!(err.message().starts_with("Query execution failed"));
    assert!(err.detail("rebuildError").is_none());
    assert_eq!(state.connects(), 2);
    assert_eq!(service.pool_state(), PoolState::Live);

    assert!(service.execute_query("SELECT 1", None).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connection_errors_rebuild_once() {
    let connector = MockConnector::new().with_handler(|call| {
        if call.pool == 1 {
            Err(DriverError::Pool("connection reset".into()))
        } else {
            Ok(vec![RecordSet::with_columns(&["value"]).push_row(vec![json!(1)])])
        }
    });
    let state = connector.state();
    let service = service(connector);

    let results = join_all((0..3).map(|_| service.execute_query("SELECT 1", None))).await;

    assert!(results.iter().all(|r| r
        .as_ref()
        .is_err_and(|e| e.kind() == ErrorKind::ConnectionError)));
    assert!(state.calls().iter().all(|c| c.pool == 1));
    assert_eq!(state.connects(), 2);
    assert_eq!(state.closed_pools(), 1);

    let pool = service.get_pool().await.unwrap();
    assert_eq!(pool.generation(), 2);
    assert!(!pool.is_closed());
    assert!(service.execute_query("SELECT 1", None).await.is_ok());
    assert_eq!(state.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_rebuild_carries_both_errors() {
    let connector = MockConnector::new()
        .with_handler(|_| Err(DriverError::Pool("connection reset".into())));
    let state = connector.state();
    let service = service(connector);

    service.get_pool().await.unwrap();
    state.always_fail.store(true, Ordering::SeqCst);

    let err = service.execute_query("SELECT 1", None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    let original = err.detail("originalError").and_then(Value::as_str).unwrap();
    let rebuild = err.detail("rebuildError").and_then(Value::as_str).unwrap();
    assert!(original.contains("connection reset"));
    assert!(rebuild.contains("after 3 attempts"));
    assert_eq!(service.pool_state(), PoolState::Absent);
}

// =========================================================================
// Schema cache
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_schema_is_assembled() {
    let service = service(MockConnector::new().with_handler(schema_handler));

    let tables = service.get_schema(None).await.unwrap();

    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].full_name, "dbo.Users");
    assert_eq!(tables[0].columns[0].name, "Id");
    assert!(tables[0].columns[0].primary_key);
    assert_eq!(tables[0].columns[1].data_type, "nvarchar(255)");
    assert!(tables[0].columns[1].nullable);
}

#[tokio::test(start_paused = true)]
async fn test_schema_cache_ttl() {
    let connector = MockConnector::new().with_handler(schema_handler);
    let state = connector.state();
    let service = service(connector);

    let first = service.get_schema(Some("Sales")).await.unwrap();

    tokio::time::advance(Duration::from_millis(59_999)).await;
    let cached = service.get_schema(Some("Sales")).await.unwrap();
    assert!(Arc::ptr_eq(&first, &cached));
    assert_eq!(state.calls().len(), 1);

    tokio::time::advance(Duration::from_millis(1)).await;
    let refreshed = service.get_schema(Some("Sales")).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &refreshed));
    assert_eq!(*first, *refreshed);
    assert_eq!(state.calls().len(), 2);
    assert_eq!(state.calls()[1].database, "Sales");
}

#[tokio::test(start_paused = true)]
async fn test_schema_cache_is_per_database() {
    let connector = MockConnector::new().with_handler(schema_handler);
    let state = connector.state();
    let service = service(connector);

    service.get_schema(Some("Sales")).await.unwrap();
    service.get_schema(Some("sales")).await.unwrap();
    service.get_schema(Some("Sales")).await.unwrap();

    assert_eq!(state.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_schema_failure_is_not_cached() {
    let failures = Arc::new(AtomicU32::new(1));
    let remaining = Arc::clone(&failures);
    let connector = MockConnector::new().with_handler(move |call| {
        if remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            Err(DriverError::other("Invalid object name 'INFORMATION_SCHEMA.TABLES'"))
        } else {
            schema_handler(call)
        }
    });
    let service = service(connector);

    let err = service.get_schema(None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaError);

    assert_eq!(service.get_schema(None).await.unwrap().len(), 1);
}

// =========================================================================
// Health
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_health_check_reports_state() {
    let service = service_with(&whitelisted(&["Db1"]), MockConnector::new());

    let report = service.health_check().await;

    assert!(report.healthy);
    assert_eq!(report.pool_state, PoolState::Live);
    assert_eq!(report.allowed_databases, vec!["Db1"]);
    assert!(report.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_health_check_reports_schema_cache() {
    let service = service(MockConnector::new().with_handler(schema_handler));

    service.get_schema(None).await.unwrap();
    service.get_schema(None).await.unwrap();
    let report = service.health_check().await;
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(report.schema_cache_entries, 1);
    assert!((report.schema_cache_hit_rate - 50.0).abs() < 0.01);
    assert_eq!(json["schemaCacheTtlMs"], 60_000);
}

#[tokio::test(start_paused = true)]
async fn test_health_check_reports_failure() {
    let service = service(MockConnector::new().failing_always());

    let report = service.health_check().await;
    let json = serde_json::to_value(&report).unwrap();

    assert!(!report.healthy);
    assert_eq!(json["poolState"], "absent");
    assert_eq!(json["error"]["kind"], "ConnectionError");
}
