//! Measures and measurements.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Value type of a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureKind {
    Int64,
    Float64,
}

impl MeasureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int64 => "int64",
            Self::Float64 => "float64",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct MeasureDef {
    name: String,
    description: String,
    unit: String,
    kind: MeasureKind,
}

/// A named, typed quantity. Cheap to clone; equality is by definition.
#[derive(Clone, PartialEq, Eq)]
pub struct Measure(Arc<MeasureDef>);

impl Measure {
    pub fn int64(name: &str, description: &str, unit: &str) -> Self {
        Self::new(name, description, unit, MeasureKind::Int64)
    }

    pub fn float64(name: &str, description: &str, unit: &str) -> Self {
        Self::new(name, description, unit, MeasureKind::Float64)
    }

    fn new(name: &str, description: &str, unit: &str, kind: MeasureKind) -> Self {
        Self(Arc::new(MeasureDef {
            name: name.to_string(),
            description: description.to_string(),
            unit: unit.to_string(),
            kind,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn description(&self) -> &str {
        &self.0.description
    }

    pub fn unit(&self) -> &str {
        &self.0.unit
    }

    pub fn kind(&self) -> MeasureKind {
        self.0.kind
    }

    /// Pair this measure with a value.
    pub fn m(&self, value: impl Into<MeasureValue>) -> Measurement {
        Measurement {
            measure: self.clone(),
            value: value.into(),
        }
    }
}

impl fmt::Debug for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Measure")
            .field("name", &self.0.name)
            .field("unit", &self.0.unit)
            .field("kind", &self.0.kind)
            .finish()
    }
}

/// A recorded numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MeasureValue {
    Int(i64),
    Float(f64),
}

impl MeasureValue {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    fn kind(self) -> MeasureKind {
        match self {
            Self::Int(_) => MeasureKind::Int64,
            Self::Float(_) => MeasureKind::Float64,
        }
    }
}

impl From<i64> for MeasureValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for MeasureValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl fmt::Display for MeasureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// A (measure, value) pair, created transiently during a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    measure: Measure,
    value: MeasureValue,
}

impl Measurement {
    pub fn measure(&self) -> &Measure {
        &self.measure
    }

    pub fn value(&self) -> MeasureValue {
        self.value
    }

    /// Whether the value type matches the measure's declared kind.
    pub fn is_well_typed(&self) -> bool {
        self.value.kind() == self.measure.kind()
    }
}
