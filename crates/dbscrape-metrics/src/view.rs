//! Views: how raw measurements become reportable series.

use serde::Serialize;

use crate::measure::{Measure, MeasureValue};
use crate::tags::TagKey;

/// Aggregation function applied per tag-value combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Keep only the most recent value.
    LastValue,
    /// Count recordings.
    Count,
    /// Sum recorded values.
    Sum,
}

/// Aggregated state of one row of a view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AggregationData {
    LastValue(MeasureValue),
    Count(u64),
    Sum(f64),
}

impl AggregationData {
    pub(crate) fn first(aggregation: Aggregation, value: MeasureValue) -> Self {
        match aggregation {
            Aggregation::LastValue => Self::LastValue(value),
            Aggregation::Count => Self::Count(1),
            Aggregation::Sum => Self::Sum(value.as_f64()),
        }
    }

    pub(crate) fn add(&mut self, value: MeasureValue) {
        match self {
            Self::LastValue(last) => *last = value,
            Self::Count(n) => *n += 1,
            Self::Sum(sum) => *sum += value.as_f64(),
        }
    }
}

/// Binds a measure to a set of tag keys and an aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub name: String,
    pub description: String,
    pub measure: Measure,
    pub tag_keys: Vec<TagKey>,
    pub aggregation: Aggregation,
}

impl View {
    pub fn new(
        name: &str,
        description: &str,
        measure: Measure,
        tag_keys: Vec<TagKey>,
        aggregation: Aggregation,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            measure,
            tag_keys,
            aggregation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_value_replaces() {
        let mut data = AggregationData::first(Aggregation::LastValue, MeasureValue::Int(1000));
        data.add(MeasureValue::Int(200));
        assert_eq!(data, AggregationData::LastValue(MeasureValue::Int(200)));
    }

    #[test]
    fn count_and_sum_accumulate() {
        let mut count = AggregationData::first(Aggregation::Count, MeasureValue::Int(7));
        count.add(MeasureValue::Int(9));
        assert_eq!(count, AggregationData::Count(2));

        let mut sum = AggregationData::first(Aggregation::Sum, MeasureValue::Float(1.5));
        sum.add(MeasureValue::Int(2));
        assert_eq!(sum, AggregationData::Sum(3.5));
    }
}
