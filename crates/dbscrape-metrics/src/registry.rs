//! The measurement registry.
//!
//! Holds registered tag keys, measures and views, plus the aggregated
//! rows of every view. Constructed once at process start and shared by
//! handle; safe for concurrent recorders.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use serde::Serialize;
use tracing::debug;

use dbscrape_trace::{SpanContext, TraceId};

use crate::error::{MetricsError, MetricsResult, TagError};
use crate::measure::{Measure, Measurement};
use crate::tags::{TagKey, TagSet};
use crate::view::{AggregationData, View};

/// Outcome of an idempotent registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    AlreadyRegistered,
}

/// Tags plus trace lineage that measurements are recorded under.
#[derive(Debug, Clone, Default)]
pub struct MeasureContext {
    pub tags: TagSet,
    pub span: Option<SpanContext>,
}

impl MeasureContext {
    pub fn new(tags: TagSet, span: SpanContext) -> Self {
        Self {
            tags,
            span: Some(span),
        }
    }

    /// A context with tags but no trace lineage.
    pub fn untraced(tags: TagSet) -> Self {
        Self { tags, span: None }
    }
}

/// One aggregated series of a view.
#[derive(Debug, Clone, Serialize)]
pub struct ViewRow {
    /// Tag values in the view's tag key order. Missing tags are empty.
    pub tags: Vec<(TagKey, String)>,
    pub data: AggregationData,
    /// Trace of the last recording into this row, if it was traced.
    #[serde(serialize_with = "dbscrape_trace::serialize_opt_trace_id")]
    pub exemplar: Option<TraceId>,
    pub updated_at: SystemTime,
}

/// Point-in-time copy of a view and its rows.
#[derive(Debug, Clone)]
pub struct ViewData {
    pub view: View,
    pub rows: Vec<ViewRow>,
}

struct RowState {
    data: AggregationData,
    exemplar: Option<TraceId>,
    updated_at: SystemTime,
}

struct ViewState {
    view: View,
    rows: BTreeMap<Vec<String>, RowState>,
}

#[derive(Default)]
struct Inner {
    tag_keys: HashMap<String, TagKey>,
    measures: HashMap<String, Measure>,
    views: BTreeMap<String, ViewState>,
}

/// Registry of measures and views with their aggregated data.
///
/// `Clone` shares the same underlying state.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("MetricsRegistry")
            .field("tag_keys", &inner.tag_keys.len())
            .field("measures", &inner.measures.len())
            .field("views", &inner.views.len())
            .finish()
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= 255 && name.bytes().all(|b| (0x21..=0x7e).contains(&b))
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves aggregation data consistent
    // (every mutation is a single insert or in-place update), so poisoning
    // is ignored.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a tag key by name. Registering the same name again
    /// returns the existing key.
    pub fn register_tag_key(&self, name: &str) -> MetricsResult<TagKey> {
        let mut inner = self.write();
        if let Some(key) = inner.tag_keys.get(name) {
            return Ok(key.clone());
        }
        let key = TagKey::new(name)?;
        inner.tag_keys.insert(name.to_string(), key.clone());
        debug!(tag_key = name, "tag key registered");
        Ok(key)
    }

    /// Register a measure. Re-registering an identical definition is a
    /// no-op; a different definition under the same name is a conflict.
    pub fn register_measure(&self, measure: &Measure) -> MetricsResult<Registration> {
        let mut inner = self.write();
        register_measure_locked(&mut inner, measure)
    }

    /// Register a batch of views, together with their measures and tag
    /// keys. Validation happens before any state changes, so a conflict
    /// leaves the registry untouched.
    pub fn register_views(&self, views: &[View]) -> MetricsResult<Registration> {
        let mut inner = self.write();

        for view in views {
            if !valid_name(&view.name) {
                return Err(MetricsError::InvalidName {
                    kind: "view",
                    name: view.name.clone(),
                });
            }
            if let Some(existing) = inner.views.get(&view.name) {
                if existing.view != *view {
                    return Err(MetricsError::Conflict {
                        kind: "view",
                        name: view.name.clone(),
                    });
                }
            }
            if let Some(existing) = inner.measures.get(view.measure.name()) {
                if *existing != view.measure {
                    return Err(MetricsError::Conflict {
                        kind: "measure",
                        name: view.measure.name().to_string(),
                    });
                }
            }
            if !valid_name(view.measure.name()) {
                return Err(MetricsError::InvalidName {
                    kind: "measure",
                    name: view.measure.name().to_string(),
                });
            }
        }

        let mut outcome = Registration::AlreadyRegistered;
        for view in views {
            register_measure_locked(&mut inner, &view.measure)?;
            for key in &view.tag_keys {
                inner
                    .tag_keys
                    .entry(key.name().to_string())
                    .or_insert_with(|| key.clone());
            }
            if !inner.views.contains_key(&view.name) {
                inner.views.insert(
                    view.name.clone(),
                    ViewState {
                        view: view.clone(),
                        rows: BTreeMap::new(),
                    },
                );
                debug!(view = %view.name, "view registered");
                outcome = Registration::Registered;
            }
        }
        Ok(outcome)
    }

    /// Build a tag set from registered keys.
    pub fn tag_set<'a, I>(&self, tags: I) -> Result<TagSet, TagError>
    where
        I: IntoIterator<Item = (&'a TagKey, &'a str)>,
    {
        let inner = self.read();
        let mut builder = TagSet::builder();
        for (key, value) in tags {
            if inner.tag_keys.get(key.name()) != Some(key) {
                return Err(TagError::Unregistered(key.name().to_string()));
            }
            builder = builder.insert(key, value)?;
        }
        Ok(builder.build())
    }

    /// Record measurements under a context. Every measurement is
    /// validated first; on error nothing is recorded.
    ///
    /// Returns the number of view rows updated.
    pub fn record(&self, ctx: &MeasureContext, measurements: &[Measurement]) -> MetricsResult<usize> {
        let mut inner = self.write();

        for key in ctx.tags.keys() {
            if inner.tag_keys.get(key.name()) != Some(key) {
                return Err(TagError::Unregistered(key.name().to_string()).into());
            }
        }
        for m in measurements {
            let measure = m.measure();
            if inner.measures.get(measure.name()) != Some(measure) {
                return Err(MetricsError::UnknownMeasure(measure.name().to_string()));
            }
            if !m.is_well_typed() {
                return Err(MetricsError::KindMismatch {
                    measure: measure.name().to_string(),
                    expected: measure.kind().as_str(),
                });
            }
        }

        let now = SystemTime::now();
        let exemplar = ctx.span.as_ref().map(SpanContext::trace_id);
        let mut updated = 0;
        for m in measurements {
            for state in inner.views.values_mut() {
                if state.view.measure != *m.measure() {
                    continue;
                }
                let key: Vec<String> = state
                    .view
                    .tag_keys
                    .iter()
                    .map(|k| ctx.tags.get(k).unwrap_or_default().to_string())
                    .collect();
                let aggregation = state.view.aggregation;
                state
                    .rows
                    .entry(key)
                    .and_modify(|row| {
                        row.data.add(m.value());
                        row.exemplar = exemplar;
                        row.updated_at = now;
                    })
                    .or_insert_with(|| RowState {
                        data: AggregationData::first(aggregation, m.value()),
                        exemplar,
                        updated_at: now,
                    });
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Snapshot of one view.
    pub fn view_data(&self, name: &str) -> Option<ViewData> {
        let inner = self.read();
        inner.views.get(name).map(snapshot_view)
    }

    /// Snapshot of every view, ordered by view name.
    pub fn snapshot(&self) -> Vec<ViewData> {
        let inner = self.read();
        inner.views.values().map(snapshot_view).collect()
    }

    pub fn view_names(&self) -> Vec<String> {
        self.read().views.keys().cloned().collect()
    }

    pub fn tag_key(&self, name: &str) -> Option<TagKey> {
        self.read().tag_keys.get(name).cloned()
    }
}

fn register_measure_locked(inner: &mut Inner, measure: &Measure) -> MetricsResult<Registration> {
    if !valid_name(measure.name()) {
        return Err(MetricsError::InvalidName {
            kind: "measure",
            name: measure.name().to_string(),
        });
    }
    match inner.measures.get(measure.name()) {
        Some(existing) if existing == measure => Ok(Registration::AlreadyRegistered),
        Some(_) => Err(MetricsError::Conflict {
            kind: "measure",
            name: measure.name().to_string(),
        }),
        None => {
            inner
                .measures
                .insert(measure.name().to_string(), measure.clone());
            debug!(measure = measure.name(), "measure registered");
            Ok(Registration::Registered)
        }
    }
}

fn snapshot_view(state: &ViewState) -> ViewData {
    let rows = state
        .rows
        .iter()
        .map(|(values, row)| ViewRow {
            tags: state
                .view
                .tag_keys
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect(),
            data: row.data,
            exemplar: row.exemplar,
            updated_at: row.updated_at,
        })
        .collect();
    ViewData {
        view: state.view.clone(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::MeasureValue;
    use crate::view::Aggregation;
    use dbscrape_trace::{SdkTracerProvider, Tracer};

    struct Fixture {
        registry: MetricsRegistry,
        host: TagKey,
        path: TagKey,
        total: Measure,
    }

    fn fixture() -> Fixture {
        let registry = MetricsRegistry::new();
        let host = registry.register_tag_key("host").unwrap();
        let path = registry.register_tag_key("path").unwrap();
        let total = Measure::int64("total_size", "Volume Size.", "MB");
        let view = View::new(
            "sys_m_disks/total_size",
            "Volume Size.",
            total.clone(),
            vec![host.clone(), path.clone()],
            Aggregation::LastValue,
        );
        registry.register_views(&[view]).unwrap();
        Fixture {
            registry,
            host,
            path,
            total,
        }
    }

    fn tags(f: &Fixture, host: &str, path: &str) -> TagSet {
        f.registry
            .tag_set([(&f.host, host), (&f.path, path)])
            .unwrap()
    }

    #[test]
    fn registration_is_idempotent() {
        let f = fixture();
        let view = f.registry.view_data("sys_m_disks/total_size").unwrap().view;

        assert_eq!(
            f.registry.register_views(&[view.clone()]).unwrap(),
            Registration::AlreadyRegistered
        );
        assert_eq!(
            f.registry.register_measure(&f.total).unwrap(),
            Registration::AlreadyRegistered
        );
        assert_eq!(f.registry.register_tag_key("host").unwrap(), f.host);
        assert_eq!(f.registry.view_names().len(), 1);

        // Aggregation state survives re-registration.
        let ctx = MeasureContext::untraced(tags(&f, "h1", "/data"));
        f.registry.record(&ctx, &[f.total.m(10i64)]).unwrap();
        f.registry.register_views(&[view]).unwrap();
        assert_eq!(f.registry.view_data("sys_m_disks/total_size").unwrap().rows.len(), 1);
    }

    #[test]
    fn conflicting_definitions_rejected() {
        let f = fixture();
        let other = Measure::float64("total_size", "Different.", "GB");
        assert!(matches!(
            f.registry.register_measure(&other),
            Err(MetricsError::Conflict { kind: "measure", .. })
        ));

        let view = View::new(
            "sys_m_disks/total_size",
            "Volume Size.",
            f.total.clone(),
            vec![f.host.clone()],
            Aggregation::Sum,
        );
        assert!(matches!(
            f.registry.register_views(&[view]),
            Err(MetricsError::Conflict { kind: "view", .. })
        ));
    }

    #[test]
    fn last_value_per_tag_combination() {
        let f = fixture();
        let a = MeasureContext::untraced(tags(&f, "h1", "/data"));
        let b = MeasureContext::untraced(tags(&f, "h1", "/log"));

        f.registry.record(&a, &[f.total.m(1000i64)]).unwrap();
        f.registry.record(&b, &[f.total.m(200i64)]).unwrap();
        f.registry.record(&a, &[f.total.m(900i64)]).unwrap();

        let data = f.registry.view_data("sys_m_disks/total_size").unwrap();
        assert_eq!(data.rows.len(), 2);
        let data_row = data
            .rows
            .iter()
            .find(|r| r.tags[1].1 == "/data")
            .unwrap();
        assert_eq!(data_row.data, AggregationData::LastValue(MeasureValue::Int(900)));
    }

    #[test]
    fn record_keeps_trace_exemplar() {
        let f = fixture();
        let span = Tracer::new(SdkTracerProvider::builder().build()).root("scrape");
        let ctx = MeasureContext::new(tags(&f, "h1", "/data"), span.context());
        f.registry.record(&ctx, &[f.total.m(5i64)]).unwrap();

        let row = &f.registry.view_data("sys_m_disks/total_size").unwrap().rows[0];
        assert_eq!(row.exemplar, Some(span.trace_id()));

        let json = serde_json::to_value(row).unwrap();
        assert_eq!(json["exemplar"], span.trace_id().to_string());
    }

    #[test]
    fn unregistered_tag_key_rejected() {
        let f = fixture();
        let stray = TagKey::new("stray").unwrap();
        let err = f.registry.tag_set([(&stray, "x")]).unwrap_err();
        assert_eq!(err, TagError::Unregistered("stray".to_string()));
    }

    #[test]
    fn invalid_record_changes_nothing() {
        let f = fixture();
        let ctx = MeasureContext::untraced(tags(&f, "h1", "/data"));
        let unknown = Measure::int64("unknown", "", "1");

        let err = f
            .registry
            .record(&ctx, &[f.total.m(1i64), unknown.m(2i64)])
            .unwrap_err();
        assert_eq!(err, MetricsError::UnknownMeasure("unknown".to_string()));
        assert!(f.registry.view_data("sys_m_disks/total_size").unwrap().rows.is_empty());

        let err = f.registry.record(&ctx, &[f.total.m(1.5f64)]).unwrap_err();
        assert!(matches!(err, MetricsError::KindMismatch { .. }));
    }

    #[test]
    fn concurrent_recorders() {
        let f = fixture();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = f.registry.clone();
                let ctx = MeasureContext::untraced(tags(&f, &format!("h{i}"), "/data"));
                let total = f.total.clone();
                std::thread::spawn(move || {
                    for v in 0..100i64 {
                        registry.record(&ctx, &[total.m(v)]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let data = f.registry.view_data("sys_m_disks/total_size").unwrap();
        assert_eq!(data.rows.len(), 8);
        for row in data.rows {
            assert_eq!(row.data, AggregationData::LastValue(MeasureValue::Int(99)));
        }
    }
}
