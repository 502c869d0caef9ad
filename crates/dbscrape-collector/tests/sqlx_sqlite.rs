//! End-to-end scrape through the sqlx driver against a temporary SQLite
//! database shaped like `SYS.M_DISKS`.

use std::path::Path;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection as _};

use dbscrape_collector::{
    DisksFamily, ScanError, ScrapeCause, ScrapeCollector, ScrapeConfig, ScrapeErrorKind,
    SqlxDriver, Target,
};
use dbscrape_metrics::{AggregationData, MeasureValue, MetricsRegistry};
use dbscrape_trace::{RecentSpans, Sampler, SdkTracerProvider, Tracer, parent_based};

const STATEMENT: &str =
    "SELECT host, path, usage_type, total_size, used_size FROM m_disks ORDER BY id";

async fn seed(path: &Path, rows: &[(&str, &str, &str, Option<i64>, i64)]) {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .connect()
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE m_disks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            host TEXT NOT NULL,
            path TEXT NOT NULL,
            usage_type TEXT NOT NULL,
            total_size INTEGER,
            used_size INTEGER NOT NULL
        )",
    )
    .execute(&mut conn)
    .await
    .unwrap();
    for (host, path, usage, total, used) in rows {
        sqlx::query(
            "INSERT INTO m_disks (host, path, usage_type, total_size, used_size) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(*host)
        .bind(*path)
        .bind(*usage)
        .bind(*total)
        .bind(*used)
        .execute(&mut conn)
        .await
        .unwrap();
    }
    conn.close().await.unwrap();
}

fn collector(registry: &MetricsRegistry, spans: RecentSpans) -> ScrapeCollector<SqlxDriver> {
    let provider = SdkTracerProvider::builder()
        .with_sampler(parent_based(Sampler::AlwaysOn))
        .with_span_processor(spans)
        .build();
    let tracer = Tracer::new(provider);
    ScrapeCollector::new(
        SqlxDriver::new("sqlite"),
        registry.clone(),
        tracer,
        ScrapeConfig::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn scrapes_sqlite_table() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("disks.db");
    seed(
        &db,
        &[
            ("h1", "/data", "DATA", Some(1000), 400),
            ("h1", "/log", "LOG", Some(200), 50),
        ],
    )
    .await;

    let registry = MetricsRegistry::new();
    let spans = RecentSpans::new(32);
    let family = DisksFamily::register(&registry).unwrap().with_statement(STATEMENT);
    let collector = collector(&registry, spans.clone());

    let target = Target::new(db.to_str().unwrap(), "monitor", "unused");
    let report = collector.run(&target, &family).await.unwrap();

    assert_eq!(report.rows_scanned, 2);
    assert_eq!(report.tags[1], ("path".to_string(), "/log".to_string()));

    let total = registry.view_data("sys_m_disks/total_size").unwrap();
    assert_eq!(total.rows.len(), 1);
    assert_eq!(
        total.rows[0].data,
        AggregationData::LastValue(MeasureValue::Int(200))
    );

    let names: Vec<_> = spans
        .trace(report.trace_id)
        .into_iter()
        .map(|s| s.name.to_string())
        .collect();
    assert!(names.contains(&"sql_query_sys_m_disks".to_string()));
    assert!(names.contains(&"sql_close_db_conn".to_string()));
}

#[tokio::test]
async fn sqlite_null_is_scan_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("disks.db");
    seed(&db, &[("h1", "/data", "DATA", None, 400)]).await;

    let registry = MetricsRegistry::new();
    let family = DisksFamily::register(&registry).unwrap().with_statement(STATEMENT);
    let collector = collector(&registry, RecentSpans::new(8));

    let target = Target::new(db.to_str().unwrap(), "monitor", "unused");
    let err = collector.run(&target, &family).await.unwrap_err();

    assert_eq!(err.kind(), ScrapeErrorKind::Scan);
    assert!(matches!(
        err.cause,
        ScrapeCause::Scan(ScanError::Null { column: "TOTAL_SIZE" })
    ));
    assert!(registry.view_data("sys_m_disks/total_size").unwrap().rows.is_empty());
}

#[tokio::test]
async fn missing_table_is_query_error() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("disks.db");
    seed(&db, &[]).await;

    let registry = MetricsRegistry::new();
    // The stock statement targets SYS.M_DISKS, which SQLite does not have.
    let family = DisksFamily::register(&registry).unwrap();
    let collector = collector(&registry, RecentSpans::new(8));

    let target = Target::new(db.to_str().unwrap(), "monitor", "unused");
    let err = collector.run(&target, &family).await.unwrap_err();
    assert_eq!(err.kind(), ScrapeErrorKind::Query);
}
