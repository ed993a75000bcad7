mod support;

use futures::TryStreamExt;
use quarry_core::{ConnectionConfig, Criteria, QuarryConfig, QuarryError, QueryOptions, Result, SqlValue, TextSearch};
use quarry_runtime::Database;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{Catalog, Event, ScriptedDriver, row};

async fn open(driver: &ScriptedDriver) -> Database {
    Database::open(&QuarryConfig::default(), Arc::new(driver.clone()))
        .await
        .unwrap()
}

fn execute(sql: &str, in_transaction: bool) -> Event {
    Event::Execute {
        sql: sql.to_string(),
        in_transaction,
    }
}

#[tokio::test]
async fn find_runs_the_compiled_statement() {
    let driver = ScriptedDriver::new(Catalog::standard())
        .with_handler(|_| Ok(vec![row(json!({ "id": 1, "name": "ada", "age": 36, "status": "active" }))]));
    let db = open(&driver).await;

    let criteria = Criteria::from_json(&json!({ "age": { "gte": 21 }, "status": "active" })).unwrap();
    let mut users = db.entity("users").unwrap();
    let statement = users.build_find(&criteria, &QueryOptions::new()).unwrap();
    assert_eq!(
        statement.sql,
        "SELECT * FROM \"public\".\"users\" WHERE \"age\" >= $1::int4 AND \"status\" = $2"
    );
    assert_eq!(statement.params, vec![SqlValue::Text("21".into()), SqlValue::Text("active".into())]);

    let rows = users.find(&criteria, &QueryOptions::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("ada"));
    assert_eq!(driver.statements(), vec![statement.sql]);
}

#[tokio::test]
async fn invalid_criteria_never_reach_the_driver() {
    let driver = ScriptedDriver::new(Catalog::standard());
    let db = open(&driver).await;

    let err = db
        .entity("users")
        .unwrap()
        .find(&Criteria::eq("shoe_size", json!(9)), &QueryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::InvalidCriteria(_)));
    assert!(driver.journal().is_empty());
}

#[tokio::test]
async fn unknown_entities_are_reported() {
    let driver = ScriptedDriver::new(Catalog::standard());
    let db = open(&driver).await;
    assert!(matches!(db.entity("nope"), Err(QuarryError::EntityNotFound(_))));
}

#[tokio::test]
async fn find_one_limits_to_a_single_row() {
    let driver = ScriptedDriver::new(Catalog::standard())
        .with_handler(|_| Ok(vec![row(json!({ "id": 3 }))]));
    let db = open(&driver).await;

    let found = db
        .entity("users")
        .unwrap()
        .find_one(&Criteria::primary_key(json!(3)), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(found, Some(row(json!({ "id": 3 }))));
    assert_eq!(
        driver.statements(),
        vec!["SELECT * FROM \"public\".\"users\" WHERE \"id\" = $1::int4 LIMIT $2"]
    );
}

#[tokio::test]
async fn count_reads_the_count_column() {
    let driver = ScriptedDriver::new(Catalog::standard())
        .with_handler(|_| Ok(vec![row(json!({ "count": 42 }))]));
    let db = open(&driver).await;

    let count = db
        .entity("users")
        .unwrap()
        .count(&Criteria::eq("status", json!("active")), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(count, 42);
    assert!(driver.statements()[0].starts_with("SELECT COUNT(*) AS count FROM \"public\".\"users\""));
}

#[tokio::test]
async fn stream_yields_rows_from_the_pool() {
    let driver = ScriptedDriver::new(Catalog::standard())
        .with_handler(|_| Ok(vec![row(json!({ "id": 1 })), row(json!({ "id": 2 }))]));
    let db = open(&driver).await;

    let users = db.entity("users").unwrap();
    let rows: Vec<_> = users
        .stream(&Criteria::all(), &QueryOptions::new())
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn save_updates_an_existing_row_in_one_transaction() {
    let driver = ScriptedDriver::new(Catalog::standard()).with_handler(|statement| {
        if statement.sql.starts_with("UPDATE") {
            Ok(vec![row(json!({ "id": 5, "name": "grace" }))])
        } else {
            Ok(Vec::new())
        }
    });
    let db = open(&driver).await;

    let saved = db
        .entity("users")
        .unwrap()
        .save(&row(json!({ "id": 5, "name": "grace" })))
        .await
        .unwrap();
    assert_eq!(saved["name"], json!("grace"));

    let journal = driver.journal();
    assert_eq!(journal.len(), 3);
    assert_eq!(journal[0], Event::Begin);
    assert!(matches!(&journal[1], Event::Execute { sql, in_transaction: true } if sql.starts_with("UPDATE")));
    assert_eq!(journal[2], Event::Commit);
}

#[tokio::test]
async fn save_inserts_when_no_row_has_the_key() {
    let driver = ScriptedDriver::new(Catalog::standard()).with_handler(|statement| {
        if statement.sql.starts_with("INSERT") {
            Ok(vec![row(json!({ "id": 6, "name": "linus" }))])
        } else {
            Ok(Vec::new())
        }
    });
    let db = open(&driver).await;

    let saved = db
        .entity("users")
        .unwrap()
        .save(&row(json!({ "id": 6, "name": "linus" })))
        .await
        .unwrap();
    assert_eq!(saved["id"], json!(6));

    let statements = driver.statements();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].starts_with("UPDATE"));
    assert!(statements[1].starts_with("INSERT"));
    assert_eq!(driver.journal().last(), Some(&Event::Commit));
}

#[tokio::test]
async fn save_without_a_key_inserts() {
    let driver = ScriptedDriver::new(Catalog::standard())
        .with_handler(|_| Ok(vec![row(json!({ "id": 7, "name": "new" }))]));
    let db = open(&driver).await;

    db.entity("users")
        .unwrap()
        .save(&row(json!({ "name": "new" })))
        .await
        .unwrap();
    assert_eq!(
        driver.statements(),
        vec!["INSERT INTO \"public\".\"users\" (\"name\") VALUES ($1) RETURNING *"]
    );
}

#[tokio::test]
async fn writes_to_views_are_unsupported() {
    let driver = ScriptedDriver::new(Catalog::standard());
    let db = open(&driver).await;

    let err = db
        .entity("reporting.summary")
        .unwrap()
        .insert(&[row(json!({ "status": "x" }))])
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::UnsupportedOperation { ref operation, .. } if operation == "insert"));

    let err = db
        .entity("users")
        .unwrap()
        .search(&Criteria::all(), &QueryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::UnsupportedOperation { .. }));

    let err = db.entity("add").unwrap().find(&Criteria::all(), &QueryOptions::new()).await.unwrap_err();
    assert!(matches!(err, QuarryError::UnsupportedOperation { .. }));
    assert!(driver.journal().is_empty());
}

#[tokio::test]
async fn transaction_commits_on_ok() {
    let driver = ScriptedDriver::new(Catalog::standard())
        .with_handler(|_| Ok(vec![row(json!({ "id": 1, "name": "a" }))]));
    let db = open(&driver).await;

    let inserted = db
        .with_transaction(|tx| {
            Box::pin(async move {
                let first = tx.entity("users")?.insert_one(&row(json!({ "name": "a" }))).await?;
                tx.with_transaction(|inner| {
                    Box::pin(async move {
                        inner.entity("orders")?.destroy(&Criteria::eq("user_id", json!(1))).await?;
                        Ok::<_, QuarryError>(())
                    })
                })
                .await?;
                Ok::<_, QuarryError>(first)
            })
        })
        .await
        .unwrap();
    assert_eq!(inserted["id"], json!(1));

    let journal = driver.journal();
    assert_eq!(journal.first(), Some(&Event::Begin));
    assert_eq!(journal.last(), Some(&Event::Commit));
    assert_eq!(journal.iter().filter(|e| **e == Event::Begin).count(), 1);
    assert!(journal.iter().all(|e| !matches!(e, Event::Execute { in_transaction: false, .. })));
}

#[tokio::test]
async fn transaction_rolls_back_on_error() {
    let driver = ScriptedDriver::new(Catalog::standard())
        .with_handler(|_| Ok(vec![row(json!({ "id": 1, "name": "a" }))]));
    let db = open(&driver).await;

    let result: Result<()> = db
        .with_transaction(|tx| {
            Box::pin(async move {
                tx.entity("users")?.insert_one(&row(json!({ "name": "a" }))).await?;
                Err::<(), _>(QuarryError::execution("caller gave up"))
            })
        })
        .await;
    assert!(matches!(result, Err(QuarryError::Execution { .. })));

    assert_eq!(
        driver.journal(),
        vec![
            Event::Begin,
            execute("INSERT INTO \"public\".\"users\" (\"name\") VALUES ($1) RETURNING *", true),
            Event::Rollback,
        ]
    );
}

#[tokio::test]
async fn streams_are_unavailable_inside_transactions() {
    let driver = ScriptedDriver::new(Catalog::standard());
    let db = open(&driver).await;

    let result: Result<()> = db
        .with_transaction(|tx| {
            Box::pin(async move {
                let users = tx.entity("users")?;
                users.stream(&Criteria::all(), &QueryOptions::new())?;
                Ok::<_, QuarryError>(())
            })
        })
        .await;
    assert!(matches!(result, Err(QuarryError::UnsupportedOperation { .. })));
    assert_eq!(driver.journal().last(), Some(&Event::Rollback));
}

#[tokio::test]
async fn documents_come_back_as_bodies_with_their_key() {
    let driver = ScriptedDriver::new(Catalog::standard())
        .with_handler(|_| Ok(vec![row(json!({ "id": 7, "body": { "title": "Rust", "tags": ["a"] } }))]));
    let db = open(&driver).await;
    let mut docs = db.entity("docs").unwrap();

    let found = docs
        .search(&Criteria::eq("title", json!("Rust")), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(found, vec![row(json!({ "id": 7, "title": "Rust", "tags": ["a"] }))]);

    let one = docs.find_doc(&json!(7)).await.unwrap();
    assert_eq!(one, Some(row(json!({ "id": 7, "title": "Rust", "tags": ["a"] }))));

    let hits = docs
        .search_doc(&TextSearch::new("rust"), &Criteria::all(), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    assert_eq!(
        driver.statements(),
        vec![
            "SELECT * FROM \"public\".\"docs\" WHERE (\"body\" #>> $1) = $2",
            "SELECT * FROM \"public\".\"docs\" WHERE \"id\" = $1::int4",
            "SELECT * FROM \"public\".\"docs\" WHERE \"search\" @@ plainto_tsquery($1)",
        ]
    );
}

#[tokio::test]
async fn save_doc_replaces_by_key_and_keeps_the_key_out_of_the_body() {
    let driver = ScriptedDriver::new(Catalog::standard()).with_handler(|statement| {
        assert!(statement.sql.starts_with("UPDATE \"public\".\"docs\" SET \"body\" = $1::jsonb"));
        assert_eq!(statement.params[0], SqlValue::Json(json!({ "title": "new" })));
        Ok(vec![row(json!({ "id": 7, "body": { "title": "new" } }))])
    });
    let db = open(&driver).await;

    let saved = db
        .entity("docs")
        .unwrap()
        .save_doc(&json!({ "id": 7, "title": "new" }))
        .await
        .unwrap();
    assert_eq!(saved, row(json!({ "id": 7, "title": "new" })));
    assert_eq!(driver.journal().last(), Some(&Event::Commit));
}

#[tokio::test]
async fn save_doc_inserts_new_documents() {
    let driver = ScriptedDriver::new(Catalog::standard())
        .with_handler(|_| Ok(vec![row(json!({ "id": 8, "body": { "title": "fresh" } }))]));
    let db = open(&driver).await;

    let saved = db
        .entity("docs")
        .unwrap()
        .save_doc(&json!({ "title": "fresh" }))
        .await
        .unwrap();
    assert_eq!(saved, row(json!({ "id": 8, "title": "fresh" })));
    assert_eq!(
        driver.statements(),
        vec!["INSERT INTO \"public\".\"docs\" (\"body\") VALUES ($1::jsonb) RETURNING *"]
    );
}

#[tokio::test]
async fn modify_merges_into_the_body() {
    let driver = ScriptedDriver::new(Catalog::standard())
        .with_handler(|_| Ok(vec![row(json!({ "id": 7, "body": { "title": "t", "seen": true } }))]));
    let db = open(&driver).await;

    let modified = db
        .entity("docs")
        .unwrap()
        .modify(&Criteria::primary_key(json!(7)), &json!({ "seen": true }))
        .await
        .unwrap();
    assert_eq!(modified, vec![row(json!({ "id": 7, "title": "t", "seen": true }))]);
    assert!(driver.statements()[0].contains("\"body\" = \"body\" || $1::jsonb"));
}

#[tokio::test]
async fn invoke_calls_the_function() {
    let driver = ScriptedDriver::new(Catalog::standard())
        .with_handler(|_| Ok(vec![row(json!({ "add": 5 }))]));
    let db = open(&driver).await;

    let rows = db.entity("add").unwrap().invoke(&[json!(2), json!(3)]).await.unwrap();
    assert_eq!(rows, vec![row(json!({ "add": 5 }))]);
    assert_eq!(
        driver.statements(),
        vec!["SELECT * FROM \"public\".\"add\"($1::integer, $2::integer)"]
    );

    let err = db.entity("users").unwrap().invoke(&[]).await.unwrap_err();
    assert!(matches!(err, QuarryError::UnsupportedOperation { .. }));
}

#[tokio::test]
async fn raw_queries_pass_parameters_through() {
    let driver = ScriptedDriver::new(Catalog::standard()).with_handler(|statement| {
        assert_eq!(statement.params, vec![SqlValue::Int(1)]);
        Ok(vec![row(json!({ "one": 1 }))])
    });
    let db = open(&driver).await;

    let rows = db.query("select $1::int4 as one", vec![SqlValue::Int(1)]).await.unwrap();
    assert_eq!(rows[0]["one"], json!(1));
}

#[tokio::test]
async fn statement_timeout_cancels_slow_statements() {
    let driver = ScriptedDriver::new(Catalog::standard()).with_delay(Duration::from_millis(500));
    let config = QuarryConfig {
        connection: ConnectionConfig {
            statement_timeout_ms: Some(20),
            ..ConnectionConfig::default()
        },
        ..QuarryConfig::default()
    };
    let db = Database::open(&config, Arc::new(driver)).await.unwrap();

    let err = db.query("select pg_sleep(1)", Vec::new()).await.unwrap_err();
    assert!(matches!(err, QuarryError::Cancelled(_)));
}
