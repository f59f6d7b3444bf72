use super::value::Value;
use std::cmp::Ordering;

/// Canonical type rank used to order values of different kinds (§3.3):
/// `null < bool < number-family < string < binary < object-id < datetime`.
/// Document and array are not legal index key types but are given a stable
/// rank above everything else so `cmp_value` stays a total order.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int32(_) | Value::Int64(_) | Value::Double(_) | Value::Decimal128(_) => 2,
        Value::String(_) => 3,
        Value::Binary(_, _) => 4,
        Value::ObjectId(_) => 5,
        Value::DateTime(_) => 6,
        Value::Array(_) => 7,
        Value::Document(_) => 8,
    }
}

fn as_numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Int32(i) => Some(*i as f64),
        Value::Int64(i) => Some(*i as f64),
        Value::Double(d) => Some(*d),
        Value::Decimal128(d) => Some(d.to_f64_approx()),
        _ => None,
    }
}

/// Orders two numbers by numeric value. `NaN` compares equal to `NaN` (so it
/// occupies a single slot as an index key) but greater than every finite
/// number (so sort order is still total and stable).
fn cmp_numeric(a: f64, b: f64) -> Ordering {
    if a.is_nan() && b.is_nan() {
        Ordering::Equal
    } else if a.is_nan() {
        Ordering::Greater
    } else if b.is_nan() {
        Ordering::Less
    } else {
        a.partial_cmp(&b).expect("non-NaN floats are totally ordered")
    }
}

/// The canonical cross-type ordering used for index keys (§3.3). Total: any
/// two values compare to exactly one of Less/Equal/Greater.
pub fn cmp_value(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Value::Binary(st1, b1), Value::Binary(st2, b2)) => st1.cmp(st2).then_with(|| b1.cmp(b2)),
        (Value::ObjectId(x), Value::ObjectId(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
        _ => {
            let (na, nb) = (as_numeric(a), as_numeric(b));
            match (na, nb) {
                (Some(na), Some(nb)) => cmp_numeric(na, nb),
                _ => Ordering::Equal,
            }
        }
    }
}

/// Equality derived from `cmp_value`, so two `NaN` keys are equal for
/// uniqueness purposes even though neither is less than the other.
pub fn eq_value(a: &Value, b: &Value) -> bool {
    cmp_value(a, b) == Ordering::Equal
}
