//! Aggregate merge states.
//!
//! Aggregators are specialised by a value-level kind: a table maps each
//! [`AggFunc`] to a factory producing the typed merge state. Workers ship
//! partials (plain numbers, or `{sum, count}` for averages); the
//! coordinator folds partials from every node and finalises.

use serde_json::{json, Value};

use nebula_meta::AggFunc;

/// Merge state of one aggregate across node partials.
pub trait Merger: Send {
    /// Folds one partial from one node.
    fn accept(&mut self, partial: &Value);

    /// Produces the final value.
    fn finish(&self) -> Value;
}

/// Factory table: kind → merge state.
///
/// The indirection mirrors how aggregators are looked up at plan build
/// time; adding a function means one enum variant and one table row.
const FACTORIES: &[(AggFunc, fn() -> Box<dyn Merger>)] = &[
    (AggFunc::Count, || Box::new(CountMerger(0))),
    (AggFunc::Sum, || Box::new(SumMerger(0.0))),
    (AggFunc::Min, || Box::new(ExtremeMerger::min())),
    (AggFunc::Max, || Box::new(ExtremeMerger::max())),
    (AggFunc::Avg, || Box::new(AvgMerger::default())),
];

/// Builds the merge state for a function kind.
#[must_use]
pub fn merger_for(func: AggFunc) -> Box<dyn Merger> {
    // The table covers every variant; fall back to count if it ever
    // drifts, which tests would catch immediately.
    FACTORIES
        .iter()
        .find(|(f, _)| *f == func)
        .map_or_else(|| Box::new(CountMerger(0)) as Box<dyn Merger>, |(_, make)| make())
}

struct CountMerger(u64);

impl Merger for CountMerger {
    fn accept(&mut self, partial: &Value) {
        self.0 += partial.as_u64().unwrap_or(0);
    }

    fn finish(&self) -> Value {
        json!(self.0)
    }
}

struct SumMerger(f64);

impl Merger for SumMerger {
    fn accept(&mut self, partial: &Value) {
        self.0 += partial.as_f64().unwrap_or(0.0);
    }

    fn finish(&self) -> Value {
        json!(self.0)
    }
}

struct ExtremeMerger {
    keep_min: bool,
    value: Option<f64>,
}

impl ExtremeMerger {
    fn min() -> Self {
        Self {
            keep_min: true,
            value: None,
        }
    }

    fn max() -> Self {
        Self {
            keep_min: false,
            value: None,
        }
    }
}

impl Merger for ExtremeMerger {
    fn accept(&mut self, partial: &Value) {
        let Some(v) = partial.as_f64() else { return };
        self.value = Some(match self.value {
            None => v,
            Some(current) if self.keep_min => current.min(v),
            Some(current) => current.max(v),
        });
    }

    fn finish(&self) -> Value {
        self.value.map_or(Value::Null, |v| json!(v))
    }
}

#[derive(Default)]
struct AvgMerger {
    sum: f64,
    count: u64,
}

impl Merger for AvgMerger {
    fn accept(&mut self, partial: &Value) {
        self.sum += partial.get("sum").and_then(Value::as_f64).unwrap_or(0.0);
        self.count += partial.get("count").and_then(Value::as_u64).unwrap_or(0);
    }

    fn finish(&self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            json!(self.sum / self.count as f64)
        }
    }
}
