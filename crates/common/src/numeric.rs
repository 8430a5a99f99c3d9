//! Lenient numeric parsing for upstream payloads.
//!
//! Upstreams send coordinates and speeds either as JSON numbers or as
//! strings using `.` or `,` as the decimal separator.

use serde_json::Value;

/// Parse a decimal string with either separator. Returns `None` for blank,
/// non-numeric, or non-finite input.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Read a number out of a JSON value that may be a number or a string.
pub fn decimal_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

/// Same as [`decimal_from_value`] for optional fields.
pub fn optional_decimal(value: Option<&Value>) -> Option<f64> {
    value.and_then(decimal_from_value)
}

/// Render an identifier that may arrive as a string or a number.
pub fn text_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
