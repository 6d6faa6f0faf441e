// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic modelbase usage example.
//!
//! Demonstrates:
//! 1. Connecting to an in-memory SQLite database
//! 2. Creating and updating rows through a repository
//! 3. Listing with a structured filter
//! 4. Synchronizing a collection in one transaction
//! 5. Importing rows and receiving lifecycle events
//! 6. Displaying metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::{json, Map, Value as JsonValue};

use modelbase::schema::{ColumnType, TableSchema};
use modelbase::storage::sql::SqlStore;
use modelbase::{ModelbaseConfig, Repository, Row, SyncOptions, ValidationContext, WriteMethod};

const COLUMNS: &[&str] = &["id", "email", "first_name", "balance"];

fn obj(value: JsonValue) -> Map<String, JsonValue> {
    value.as_object().cloned().unwrap_or_default()
}

fn require_email(row: &Row, ctx: &ValidationContext) -> Result<Row, Vec<String>> {
    if ctx.method == WriteMethod::Insert && row.get_non_null("email").is_none() {
        return Err(vec!["\"email\" is required".to_string()]);
    }
    Ok(row.clone())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures everything the repository emits)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("modelbase=info"))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║             modelbase: Basic Usage Example                    ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Connect and create the table
    // ─────────────────────────────────────────────────────────────────────────
    let config = ModelbaseConfig::for_url("sqlite::memory:");
    let store = SqlStore::connect(&config).await?;
    store
        .execute(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT UNIQUE,
                first_name TEXT,
                balance INTEGER,
                created_at INTEGER,
                updated_at INTEGER
            )",
        )
        .await?;

    let schema = TableSchema::new("users")
        .column("id", ColumnType::Integer)
        .column("email", ColumnType::Text)
        .column("first_name", ColumnType::Text)
        .column("balance", ColumnType::Integer)
        .column("created_at", ColumnType::Timestamp)
        .column("updated_at", ColumnType::Timestamp)
        .timestamps()
        .composite_key(&["email"])
        .validator(require_email);
    let users = Repository::with_config(schema, Arc::new(store), &config);
    println!("✅ Connected to {}\n", config.database_url);

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Create and update
    // ─────────────────────────────────────────────────────────────────────────
    println!("📝 Creating users...");
    for (email, name, balance) in [("ann@x.com", "Ann", 0), ("bob@x.com", "Bob", 100), ("cid@x.com", "Cid", 200)] {
        let created = users
            .create_one(&obj(json!({"email": email, "first_name": name, "balance": balance})), COLUMNS)
            .await?;
        println!("   └─ {}", created.to_json());
    }

    let updated = users
        .update_one(&obj(json!({"email": "bob@x.com", "balance": 150})), &["balance"])
        .await?;
    println!(
        "\n✏️  Updated bob: balance {:?} → {:?} (changed: {:?})",
        updated.saved_attributes().get("balance"),
        updated.get("balance"),
        updated.changed_columns()
    );

    match users.create_one(&obj(json!({"first_name": "Nobody"})), COLUMNS).await {
        Ok(_) => println!("   ⚠️  invalid row was accepted"),
        Err(e) => println!("   └─ rejected invalid row: {} ({})", e, e.code()),
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. List with a filter
    // ─────────────────────────────────────────────────────────────────────────
    let page = users
        .list(
            &obj(json!({
                "balance": {"operator": "between", "value": [50, 250]},
                "order_by": "-balance",
            })),
            COLUMNS,
        )
        .await?;
    println!("\n🔍 Balance between 50 and 250:\n   {}", page.to_json());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Sync the collection
    // ─────────────────────────────────────────────────────────────────────────
    let existing = users.list(&obj(json!({"paginate": false})), COLUMNS).await?.rows;
    let desired = vec![
        existing[0].clone().with("first_name", "Annie"),
        existing[1].clone(),
        Row::new().with("email", "dan@x.com").with("first_name", "Dan"),
    ];
    let result = users
        .bulk_sync(&existing, &desired, &["email", "first_name"], SyncOptions::default())
        .await?;
    println!(
        "\n🔄 Sync: {} inserted, {} updated, {} destroyed, {} unchanged",
        result.inserted.len(),
        result.updated.len(),
        result.destroyed.len(),
        result.unchanged.len()
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Import with events
    // ─────────────────────────────────────────────────────────────────────────
    let mut events = users.subscribe();
    let imported = users
        .import_many(
            &[
                obj(json!({"id": 1, "balance": 75})),
                obj(json!({"email": "eve@x.com", "first_name": "Eve"})),
            ],
            COLUMNS,
            |_, _| false,
        )
        .await?;
    println!("\n📥 Imported {} rows", imported);
    for _ in 0..imported {
        let event = events.recv().await?;
        println!("   └─ {} {}", event.name(), event.row().to_json());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📊 Metrics:");
    dump_metrics(&snapshotter);

    println!("\n👋 Done.");
    Ok(())
}

/// Dump all captured metrics
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let name = format!("{}{{{}}}", key.name(), labels.join(","));

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Histogram(samples) => {
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, samples.len(), sum));
            }
            DebugValue::Gauge(_) => {}
        }
    }
    counters.sort();
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    println!("   ┌─ Counters");
    for (name, value) in &counters {
        println!("   │  └─ {} = {}", name, value);
    }
    println!("   └─ Histograms");
    for (name, count, sum) in &histograms {
        println!("      └─ {} count={} sum={:.4}", name, count, sum);
    }
}
