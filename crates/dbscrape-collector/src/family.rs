//! Metric families: a fixed statement, its row schema, and the views its
//! records feed.

use dbscrape_metrics::{
    Aggregation, Measure, Measurement, MetricsRegistry, MetricsResult, TagKey, View,
};

use crate::driver::RawRow;
use crate::error::ScanError;
use crate::mapper::{Column, RowMapper, SchemaRow};

/// A query contract plus how its records become tags and measurements.
///
/// Families register their views once, on construction; scrapes only
/// record into them.
pub trait MetricFamily: RowMapper + Send + Sync {
    /// Short name, used in span names and self-metric tags.
    fn name(&self) -> &str;

    /// Read-only, parameterless statement producing [`RowMapper::columns`].
    fn statement(&self) -> &str;

    fn views(&self) -> &[View];

    /// Tag values derived from the selected record, in registration order.
    fn tags(&self, record: &Self::Record) -> Vec<(TagKey, String)>;

    fn measurements(&self, record: &Self::Record) -> Vec<Measurement>;
}

pub const DISKS_STATEMENT: &str =
    "SELECT HOST,PATH,USAGE_TYPE,TOTAL_SIZE,USED_SIZE FROM SYS.M_DISKS";

const DISKS_COLUMNS: &[Column] = &[
    Column::text("HOST"),
    Column::text("PATH"),
    Column::text("USAGE_TYPE"),
    Column::int("TOTAL_SIZE"),
    Column::int("USED_SIZE"),
];

/// One row of `SYS.M_DISKS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRecord {
    pub host: String,
    pub path: String,
    pub usage_type: String,
    pub total_size: i64,
    pub used_size: i64,
}

/// Volume size and usage per host, path and usage type.
#[derive(Debug, Clone)]
pub struct DisksFamily {
    statement: String,
    host: TagKey,
    path: TagKey,
    usage_type: TagKey,
    total_size: Measure,
    used_size: Measure,
    views: Vec<View>,
}

impl DisksFamily {
    pub const NAME: &'static str = "sys_m_disks";

    /// Register the family's tag keys, measures and views. Safe to call
    /// more than once against the same registry.
    pub fn register(registry: &MetricsRegistry) -> MetricsResult<Self> {
        let host = registry.register_tag_key("host")?;
        let path = registry.register_tag_key("path")?;
        let usage_type = registry.register_tag_key("usage_type")?;
        let keys = vec![host.clone(), path.clone(), usage_type.clone()];

        let total_size = Measure::int64("total_size", "Volume Size.", "MB");
        let used_size = Measure::int64("used_size", "Volume Used Space.", "MB");
        let views = vec![
            View::new(
                "sys_m_disks/total_size",
                "Volume Size.",
                total_size.clone(),
                keys.clone(),
                Aggregation::LastValue,
            ),
            View::new(
                "sys_m_disks/used_size",
                "Volume Used Space.",
                used_size.clone(),
                keys,
                Aggregation::LastValue,
            ),
        ];
        registry.register_views(&views)?;

        Ok(Self {
            statement: DISKS_STATEMENT.to_string(),
            host,
            path,
            usage_type,
            total_size,
            used_size,
            views,
        })
    }

    /// Replace the statement. The replacement must produce the same
    /// column order and types.
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = statement.into();
        self
    }
}

impl RowMapper for DisksFamily {
    type Record = DiskRecord;

    fn columns(&self) -> &'static [Column] {
        DISKS_COLUMNS
    }

    fn scan(&self, row: &RawRow) -> Result<DiskRecord, ScanError> {
        let row = SchemaRow::check(row, DISKS_COLUMNS)?;
        Ok(DiskRecord {
            host: row.text(0)?,
            path: row.text(1)?,
            usage_type: row.text(2)?,
            total_size: row.int(3)?,
            used_size: row.int(4)?,
        })
    }
}

impl MetricFamily for DisksFamily {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn statement(&self) -> &str {
        &self.statement
    }

    fn views(&self) -> &[View] {
        &self.views
    }

    fn tags(&self, record: &DiskRecord) -> Vec<(TagKey, String)> {
        vec![
            (self.host.clone(), record.host.clone()),
            (self.path.clone(), record.path.clone()),
            (self.usage_type.clone(), record.usage_type.clone()),
        ]
    }

    fn measurements(&self, record: &DiskRecord) -> Vec<Measurement> {
        vec![
            self.total_size.m(record.total_size),
            self.used_size.m(record.used_size),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::FieldValue;
    use dbscrape_metrics::{MeasureValue, Registration};

    fn disk_row(host: &str, path: &str, usage: &str, total: i64, used: i64) -> RawRow {
        RawRow::new(vec![
            host.into(),
            path.into(),
            usage.into(),
            total.into(),
            used.into(),
        ])
    }

    #[test]
    fn register_creates_views() {
        let registry = MetricsRegistry::new();
        let family = DisksFamily::register(&registry).unwrap();
        assert_eq!(family.views().len(), 2);
        assert_eq!(
            registry.view_names(),
            vec!["sys_m_disks/total_size", "sys_m_disks/used_size"]
        );
        assert!(registry.tag_key("usage_type").is_some());
    }

    #[test]
    fn register_twice_is_a_no_op() {
        let registry = MetricsRegistry::new();
        let first = DisksFamily::register(&registry).unwrap();
        let second = DisksFamily::register(&registry).unwrap();
        assert_eq!(registry.view_names().len(), 2);
        assert_eq!(
            registry.register_views(first.views()).unwrap(),
            Registration::AlreadyRegistered
        );
        assert_eq!(first.host, second.host);
    }

    #[test]
    fn scan_maps_columns_in_order() {
        let registry = MetricsRegistry::new();
        let family = DisksFamily::register(&registry).unwrap();
        let record = family.scan(&disk_row("h1", "/log", "LOG", 200, 50)).unwrap();
        assert_eq!(
            record,
            DiskRecord {
                host: "h1".into(),
                path: "/log".into(),
                usage_type: "LOG".into(),
                total_size: 200,
                used_size: 50,
            }
        );

        let tags = family.tags(&record);
        assert_eq!(tags[2].0.name(), "usage_type");
        assert_eq!(tags[2].1, "LOG");

        let values: Vec<_> = family
            .measurements(&record)
            .iter()
            .map(|m| (m.measure().name().to_string(), m.value()))
            .collect();
        assert_eq!(
            values,
            vec![
                ("total_size".to_string(), MeasureValue::Int(200)),
                ("used_size".to_string(), MeasureValue::Int(50)),
            ]
        );
    }

    #[test]
    fn scan_rejects_null_size() {
        let registry = MetricsRegistry::new();
        let family = DisksFamily::register(&registry).unwrap();
        let row = RawRow::new(vec![
            "h1".into(),
            "/data".into(),
            "DATA".into(),
            FieldValue::Null,
            400i64.into(),
        ]);
        assert_eq!(
            family.scan(&row),
            Err(ScanError::Null { column: "TOTAL_SIZE" })
        );
    }

    #[test]
    fn statement_override() {
        let registry = MetricsRegistry::new();
        let family = DisksFamily::register(&registry)
            .unwrap()
            .with_statement("SELECT * FROM disks");
        assert_eq!(family.statement(), "SELECT * FROM disks");
        assert_eq!(family.name(), "sys_m_disks");
    }
}
