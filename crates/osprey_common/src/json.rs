//! Document helpers: defaulting sub-attribute accessors, a total order
//! over JSON values, object merge and URL path-segment encoding.

use std::cmp::Ordering;

use serde_json::{Map, Value};

/// Returns a boolean sub-attribute, or `default` if it is missing or not a
/// boolean.
pub fn get_bool(value: &Value, name: &str, default: bool) -> bool {
    match value.get(name) {
        Some(Value::Bool(b)) => *b,
        _ => default,
    }
}

/// Returns a numeric sub-attribute as i64, or `default` if it is missing
/// or not a number.
pub fn get_i64(value: &Value, name: &str, default: i64) -> i64 {
    match value.get(name) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
        _ => default,
    }
}

/// Returns a numeric sub-attribute as u64, or `default` if it is missing
/// or not a number.
pub fn get_u64(value: &Value, name: &str, default: u64) -> u64 {
    match value.get(name) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(default),
        _ => default,
    }
}

/// Returns a string sub-attribute, or `default` if it is missing or not a
/// string.
pub fn get_str<'a>(value: &'a Value, name: &str, default: &'a str) -> &'a str {
    match value.get(name) {
        Some(Value::String(s)) => s.as_str(),
        _ => default,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: Null < Bool < Number < String < Array <
/// Object. Numbers compare as f64; arrays element-wise then by length;
/// objects by sorted key sequence, then per-key values.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    let ra = type_rank(a);
    let rb = type_rank(b);
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let fx = x.as_f64().unwrap_or(0.0);
            let fy = y.as_f64().unwrap_or(0.0);
            fx.partial_cmp(&fy).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let ord = compare(ex, ey);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut keys_x: Vec<&String> = x.keys().collect();
            let mut keys_y: Vec<&String> = y.keys().collect();
            keys_x.sort();
            keys_y.sort();
            for (kx, ky) in keys_x.iter().zip(keys_y.iter()) {
                let ord = kx.cmp(ky);
                if ord != Ordering::Equal {
                    return ord;
                }
                let ord = compare(&x[kx.as_str()], &y[ky.as_str()]);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            keys_x.len().cmp(&keys_y.len())
        }
        _ => Ordering::Equal,
    }
}

/// Merge two objects; attributes of `right` win. Non-object inputs yield
/// `right` unchanged.
pub fn merge(left: &Value, right: &Value) -> Value {
    match (left, right) {
        (Value::Object(l), Value::Object(r)) => {
            let mut out: Map<String, Value> = l.clone();
            for (k, v) in r {
                out.insert(k.clone(), v.clone());
            }
            Value::Object(out)
        }
        _ => right.clone(),
    }
}

/// Percent-encode a string for use as a URL path segment. Unreserved
/// characters pass through, everything else is %XX-escaped.
pub fn url_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => {
                out.push('%');
                out.push_str(&format!("{:02X}", byte));
            }
        }
    }
    out
}
