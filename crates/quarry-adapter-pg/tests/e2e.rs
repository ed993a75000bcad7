//! End-to-end tests against a Docker PostgreSQL container.
//!
//! Run with:
//!   cargo test -p quarry-adapter-pg --test e2e -- --nocapture
//!
//! Requirements:
//!   - Docker must be running
//!   - Port 5434 must be available
//!
//! The test returns early, without failing, when the container cannot be
//! started.

use futures::TryStreamExt;
use quarry_core::{
    ConnectionConfig, Criteria, OrderItem, QuarryConfig, QuarryError, QueryOptions, SqlValue, TextSearch,
};
use quarry_runtime::{Database, Row};
use serde_json::{Value, json};
use sqlx::PgPool;
use std::process::Command;
use std::time::Duration;

const CONTAINER_NAME: &str = "quarry_test_postgres";
const POSTGRES_PORT: u16 = 5434;
const POSTGRES_PASSWORD: &str = "quarry_test_password";
const DATABASE_NAME: &str = "quarry_test";

const SCHEMA_SQL: &str = r#"
CREATE TYPE mood AS ENUM ('happy', 'sad');

CREATE TABLE users (
    id serial PRIMARY KEY,
    name text NOT NULL,
    email varchar(200),
    age int4,
    status text NOT NULL DEFAULT 'active',
    tags text[] NOT NULL DEFAULT '{}',
    mood mood,
    balance numeric(12, 2) NOT NULL DEFAULT 0,
    created_at timestamptz NOT NULL DEFAULT now()
);

CREATE TABLE orders (
    id serial PRIMARY KEY,
    user_id int4 NOT NULL REFERENCES users(id),
    total numeric(10, 2) NOT NULL
);

CREATE TABLE docs (
    id serial PRIMARY KEY,
    body jsonb NOT NULL,
    search tsvector GENERATED ALWAYS AS (to_tsvector('english', body ->> 'title')) STORED
);

CREATE TABLE readings (
    id serial PRIMARY KEY,
    f float8,
    score int4
);

CREATE SCHEMA reporting;
CREATE VIEW reporting.active_users AS SELECT id, name FROM users WHERE status = 'active';

CREATE FUNCTION add_numbers(a integer, b integer) RETURNS integer
    LANGUAGE sql IMMUTABLE AS 'SELECT a + b';

INSERT INTO users (name, email, age, status, tags, mood, balance) VALUES
    ('ada', 'ada@example.com', 36, 'active', '{admin,math}', 'happy', 10.50),
    ('grace', 'grace@example.com', 45, 'active', '{navy}', 'sad', 0),
    ('linus', NULL, 19, 'active', '{}', NULL, 3.25),
    ('ken', 'ken@example.com', 70, 'retired', '{unix}', 'happy', 1);

INSERT INTO readings (f, score) VALUES (1, 5), (1.5, NULL), (2, 7), (NULL, 9);

INSERT INTO docs (body) VALUES
    ('{"title": "Rust in production", "profile": {"city": "Paris"}, "rank": 3}'),
    ('{"title": "Postgres internals", "profile": {"city": "Berlin"}, "rank": 12}');
"#;

fn database_url() -> String {
    format!(
        "postgres://postgres:{}@localhost:{}/{}",
        POSTGRES_PASSWORD, POSTGRES_PORT, DATABASE_NAME
    )
}

fn start_postgres_container() -> Result<(), String> {
    let _ = Command::new("docker").args(["rm", "-f", CONTAINER_NAME]).output();

    let status = Command::new("docker")
        .args([
            "run",
            "-d",
            "--name",
            CONTAINER_NAME,
            "-e",
            &format!("POSTGRES_PASSWORD={}", POSTGRES_PASSWORD),
            "-e",
            &format!("POSTGRES_DB={}", DATABASE_NAME),
            "-p",
            &format!("{}:5432", POSTGRES_PORT),
            "postgres:16-alpine",
        ])
        .status()
        .map_err(|e| format!("Failed to start container: {}", e))?;

    if !status.success() {
        return Err("Failed to start PostgreSQL container".to_string());
    }
    Ok(())
}

fn stop_postgres_container() {
    let _ = Command::new("docker").args(["rm", "-f", CONTAINER_NAME]).output();
}

async fn wait_for_postgres() -> Result<PgPool, String> {
    for _ in 0..60 {
        if let Ok(pool) = PgPool::connect(&database_url()).await
            && sqlx::query("SELECT 1").fetch_one(&pool).await.is_ok()
        {
            return Ok(pool);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Err("PostgreSQL did not become ready in time".to_string())
}

struct TestContext {
    pool: PgPool,
    db: Database,
}

impl TestContext {
    async fn setup() -> Result<Self, String> {
        start_postgres_container()?;
        let pool = wait_for_postgres().await?;
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&pool)
            .await
            .map_err(|e| format!("Failed to initialize database: {}", e))?;

        let config = QuarryConfig {
            connection: ConnectionConfig::from_url(database_url()),
            ..QuarryConfig::default()
        };
        let db = quarry_adapter_pg::connect(&config)
            .await
            .map_err(|e| format!("Failed to open database: {}", e))?;
        Ok(Self { pool, db })
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        stop_postgres_container();
    }
}

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn criteria(value: Value) -> Criteria {
    Criteria::from_json(&value).unwrap()
}

#[tokio::test]
async fn e2e_all_tests() {
    let ctx = match TestContext::setup().await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Skipping end-to-end tests: {}", e);
            eprintln!("   Make sure Docker is running and port 5434 is available");
            return;
        }
    };

    introspection(&ctx).await;
    finds(&ctx).await;
    casts_and_decoding(&ctx).await;
    writes(&ctx).await;
    documents(&ctx).await;
    transactions(&ctx).await;
    functions_and_raw_sql(&ctx).await;
    one_connection_reuse().await;
    keyset_with_null_keys(&ctx).await;
    column_types(&ctx).await;
    reload(&ctx).await;
}

async fn introspection(ctx: &TestContext) {
    let registry = ctx.db.registry();
    let users = registry.lookup("users").unwrap();
    assert_eq!(users.primary_key, vec!["id"]);
    assert_eq!(users.column("mood").unwrap().udt_schema, "public");
    assert!(registry.lookup("public.docs").unwrap().is_document());
    assert!(registry.lookup("public.docs").unwrap().searchable);
    let view = registry.lookup("reporting.active_users").unwrap();
    assert!(!view.is_document());
    // Simple views are auto-updatable.
    assert!(view.insertable);
    assert_eq!(
        registry.lookup("add_numbers").unwrap().signatures[0].arg_types,
        vec!["integer", "integer"]
    );
}

async fn finds(ctx: &TestContext) {
    let mut users = ctx.db.entity("users").unwrap();

    let adults = users
        .find(
            &criteria(json!({ "age": { "gte": 21 }, "status": "active" })),
            &QueryOptions::new().order_by(OrderItem::asc("id")),
        )
        .await
        .unwrap();
    let names: Vec<&Value> = adults.iter().map(|r| &r["name"]).collect();
    assert_eq!(names, vec!["ada", "grace"]);

    let no_email = users.find(&criteria(json!({ "email": null })), &QueryOptions::new()).await.unwrap();
    assert_eq!(no_email.len(), 1);
    assert_eq!(no_email[0]["name"], json!("linus"));

    let count = users
        .count(&criteria(json!({ "tags @>": ["unix"] })), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(count, 1);

    let page = users
        .find(
            &Criteria::all(),
            &QueryOptions::new()
                .order_by(OrderItem::asc("id").after(json!(2)))
                .page_size(1),
        )
        .await
        .unwrap();
    assert_eq!(page[0]["id"], json!(3));

    let active: Vec<Row> = ctx
        .db
        .entity("reporting.active_users")
        .unwrap()
        .stream(&Criteria::all(), &QueryOptions::new())
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(active.len(), 3);
}

async fn casts_and_decoding(ctx: &TestContext) {
    let mut users = ctx.db.entity("users").unwrap();
    let ada = users
        .find_one(&criteria(json!({ "mood": "happy", "name like": "a%" })), &QueryOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ada["mood"], json!("happy"));
    assert_eq!(ada["balance"], json!("10.50"));
    assert_eq!(ada["tags"], json!(["admin", "math"]));
    assert!(ada["created_at"].is_string());

    let err = users
        .find(&criteria(json!({ "age": "not a number" })), &QueryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::Execution { code: Some(ref code), .. } if code == "22P02"));
}

async fn writes(ctx: &TestContext) {
    let mut users = ctx.db.entity("users").unwrap();
    let inserted = users
        .insert(&[
            row(json!({ "name": "barbara", "age": 30 })),
            row(json!({ "name": "edsger", "tags": ["dijkstra"] })),
        ])
        .await
        .unwrap();
    assert_eq!(inserted.len(), 2);
    assert_eq!(inserted[1]["tags"], json!(["dijkstra"]));

    let id = inserted[0]["id"].clone();
    let saved = users
        .save(&row(json!({ "id": id, "name": "barbara", "age": 31 })))
        .await
        .unwrap();
    assert_eq!(saved["age"], json!(31));

    let updated = users
        .update(&criteria(json!({ "name": "edsger" })), &row(json!({ "status": "retired" })))
        .await
        .unwrap();
    assert_eq!(updated[0]["status"], json!("retired"));

    let removed = users
        .destroy(&criteria(json!({ "name": ["barbara", "edsger"] })))
        .await
        .unwrap();
    assert_eq!(removed.len(), 2);
}

async fn documents(ctx: &TestContext) {
    let mut docs = ctx.db.entity("docs").unwrap();

    let paris = docs
        .search(&criteria(json!({ "profile.city": "Paris" })), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(paris.len(), 1);
    assert_eq!(paris[0]["title"], json!("Rust in production"));
    assert!(paris[0]["id"].is_number());

    let ranked = docs.search(&criteria(json!({ "rank >": 5 })), &QueryOptions::new()).await.unwrap();
    assert_eq!(ranked[0]["title"], json!("Postgres internals"));

    let hits = docs
        .search_doc(&TextSearch::new("postgres"), &Criteria::all(), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    let created = docs.save_doc(&json!({ "title": "Draft" })).await.unwrap();
    let id = created["id"].clone();
    let replaced = docs.save_doc(&json!({ "id": id, "title": "Final" })).await.unwrap();
    assert_eq!(replaced, row(json!({ "id": id, "title": "Final" })));

    let modified = docs
        .modify(&Criteria::primary_key(id.clone()), &json!({ "published": true }))
        .await
        .unwrap();
    assert_eq!(modified[0]["published"], json!(true));
    assert_eq!(modified[0]["title"], json!("Final"));

    assert_eq!(docs.count_doc(&criteria(json!({ "published": true }))).await.unwrap(), 1);
    assert!(docs.find_doc(&id).await.unwrap().is_some());
}

async fn transactions(ctx: &TestContext) {
    let result: quarry_core::Result<()> = ctx
        .db
        .with_transaction(|tx| {
            Box::pin(async move {
                tx.entity("orders")?
                    .insert_one(&row(json!({ "user_id": 1, "total": 9.99 })))
                    .await?;
                Err::<(), _>(QuarryError::execution("abandon"))
            })
        })
        .await;
    assert!(result.is_err());
    let orders = ctx
        .db
        .entity("orders")
        .unwrap()
        .count(&Criteria::all(), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(orders, 0);

    let err = ctx
        .db
        .with_transaction(|tx| {
            Box::pin(async move {
                tx.entity("orders")?
                    .insert_one(&row(json!({ "user_id": 999, "total": 1 })))
                    .await
            })
        })
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::Execution { code: Some(ref code), .. } if code == "23503"));
}

async fn functions_and_raw_sql(ctx: &TestContext) {
    let rows = ctx
        .db
        .entity("add_numbers")
        .unwrap()
        .invoke(&[json!(2), json!(3)])
        .await
        .unwrap();
    assert_eq!(rows[0]["add_numbers"], json!(5));

    let rows = ctx
        .db
        .query("SELECT $1::int4 + 1 AS next", vec![SqlValue::Int(41)])
        .await
        .unwrap();
    assert_eq!(rows[0]["next"], json!(42));
}

/// Every statement runs on the same connection, so each SQL text is
/// prepared once and reused with differently typed criteria values.
async fn one_connection_reuse() {
    let mut connection = ConnectionConfig::from_url(database_url());
    connection.pool.max_connections = 1;
    let config = QuarryConfig {
        connection,
        ..QuarryConfig::default()
    };
    let db = quarry_adapter_pg::connect(&config).await.unwrap();
    let mut readings = db.entity("readings").unwrap();

    for (f, id) in [(json!(1.5), 2), (json!(1), 1), (json!("1.5"), 2), (json!(2), 3)] {
        let rows = readings
            .find(&criteria(json!({ "f": f.clone() })), &QueryOptions::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1, "f = {}", f);
        assert_eq!(rows[0]["id"], json!(id), "f = {}", f);
    }

    let rows = readings
        .find(&criteria(json!({ "score": null })), &QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(rows[0]["id"], json!(2));

    // Null and non-null values for the same inserted columns.
    let first = readings
        .insert_one(&row(json!({ "f": null, "score": 1 })))
        .await
        .unwrap();
    let second = readings
        .insert_one(&row(json!({ "f": 0.25, "score": null })))
        .await
        .unwrap();
    assert_eq!(first["f"], Value::Null);
    assert_eq!(second["f"], json!(0.25));
    readings
        .destroy(&criteria(json!({ "id": [first["id"].clone(), second["id"].clone()] })))
        .await
        .unwrap();
}

async fn keyset_with_null_keys(ctx: &TestContext) {
    let mut readings = ctx.db.entity("readings").unwrap();

    let page = |after: Value| {
        QueryOptions::new()
            .order_by(OrderItem::asc("score").after(after))
            .page_size(10)
    };
    let ids = |rows: Vec<Row>| rows.iter().map(|r| r["id"].clone()).collect::<Vec<_>>();

    let rows = readings.find(&Criteria::all(), &page(json!(5))).await.unwrap();
    assert_eq!(ids(rows), vec![json!(3), json!(4), json!(2)]);

    let rows = readings.find(&Criteria::all(), &page(json!(9))).await.unwrap();
    assert_eq!(ids(rows), vec![json!(2)]);

    let descending = QueryOptions::new()
        .order_by(OrderItem::desc("score").after(json!(7)))
        .page_size(10);
    let rows = readings.find(&Criteria::all(), &descending).await.unwrap();
    assert_eq!(ids(rows), vec![json!(1)]);
}

async fn column_types(ctx: &TestContext) {
    let rows = ctx
        .db
        .query(
            r#"SELECT
                interval '1 day 2 hours 30 seconds' AS span,
                inet '10.0.0.1' AS host,
                inet '10.1.0.0/16' AS subnet,
                cidr '10.0.0.0/8' AS block,
                '\x0001ff'::bytea AS bin,
                12.34::money AS cash,
                ARRAY[date '2024-01-02', NULL] AS days,
                ARRAY[timestamp '2024-01-02 03:04:05'] AS stamps,
                ARRAY[interval '3 months'] AS spans,
                'sad'::mood AS feeling,
                to_tsvector('english', 'quick fox') AS words"#,
            Vec::new(),
        )
        .await
        .unwrap();
    let row = &rows[0];
    assert_eq!(row["span"], json!("P1DT2H30S"));
    assert_eq!(row["host"], json!("10.0.0.1"));
    assert_eq!(row["subnet"], json!("10.1.0.0/16"));
    assert_eq!(row["block"], json!("10.0.0.0/8"));
    assert_eq!(row["bin"], json!("\\x0001ff"));
    assert_eq!(row["cash"], json!("12.34"));
    assert_eq!(row["days"], json!(["2024-01-02", null]));
    assert_eq!(row["stamps"], json!(["2024-01-02T03:04:05"]));
    assert_eq!(row["spans"], json!(["P3M"]));
    assert_eq!(row["feeling"], json!("sad"));
    assert_eq!(row["words"], json!("'fox':2 'quick':1"));

    let err = ctx
        .db
        .query("SELECT point(1, 2) AS spot", Vec::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("unsupported column type POINT"), "{}", err);
}

async fn reload(ctx: &TestContext) {
    assert!(ctx.db.entity("invoices").is_err());
    sqlx::raw_sql("CREATE TABLE invoices (id serial PRIMARY KEY, amount int4)")
        .execute(&ctx.pool)
        .await
        .unwrap();
    let registry = ctx.db.reload().await.unwrap();
    assert!(registry.lookup("public.invoices").is_ok());
    assert!(ctx.db.entity("invoices").is_ok());
}
