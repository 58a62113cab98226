//! Identity equivalence between flight metadata records.
//!
//! The store forks a record whenever incoming metadata is not equivalent to
//! what the record already holds, so the comparison must be structural.
//! Comparing serialized JSON text is not acceptable: text is sensitive to key
//! order, and two producers that emit the same object with different field
//! order would fork a flight for no reason.

use serde_json::{Map, Number, Value};

use crate::telemetry::FlightMetadata;

/// Returns `true` iff both metadata records are deeply, structurally equal.
///
/// Mapping-typed fields compare regardless of key order; sequence-typed
/// fields compare element by element in order.
#[must_use]
pub fn equivalent(a: &FlightMetadata, b: &FlightMetadata) -> bool {
    maps_equivalent(a.fields(), b.fields())
}

/// Structural equality over arbitrary JSON values.
#[must_use]
pub fn values_equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equivalent(x, y),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equivalent(l, r))
        }
        (Value::Object(x), Value::Object(y)) => maps_equivalent(x, y),
        _ => false,
    }
}

fn maps_equivalent(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .all(|(key, left)| b.get(key).is_some_and(|right| values_equivalent(left, right)))
}

// `1` and `1.0` name the same quantity.
#[allow(clippy::float_cmp)]
fn numbers_equivalent(x: &Number, y: &Number) -> bool {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a == b;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
