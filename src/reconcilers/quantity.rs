use std::sync::OnceLock;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use regex::Regex;

/// A decimal number followed by an exponent or a binary/decimal SI suffix.
const QUANTITY_PATTERN: &str =
    r"^([+-]?(?:[0-9]+\.?[0-9]*|\.[0-9]+))(?:[eE]([+-]?[0-9]+)|([a-zA-Z]{0,2}))$";

/// The amount a quantity denotes in base units, eg. `0.5` and `500m` are both 0.5.
/// None for malformed quantities.
pub fn value_of(quantity: &Quantity) -> Option<f64> {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    let captures = REGEX
        .get_or_init(|| Regex::new(QUANTITY_PATTERN).unwrap())
        .captures(quantity.0.trim())?;

    let number: f64 = captures.get(1)?.as_str().parse().ok()?;
    if let Some(exponent) = captures.get(2) {
        return Some(number * 10f64.powi(exponent.as_str().parse().ok()?));
    }

    let multiplier = match captures.get(3).map_or("", |m| m.as_str()) {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        _ => return None,
    };
    Some(number * multiplier)
}

/// True if both quantities denote the same amount. Malformed ones are compared verbatim.
pub fn same_quantity(a: &Quantity, b: &Quantity) -> bool {
    match (value_of(a), value_of(b)) {
        (Some(a), Some(b)) => (a - b).abs() <= 4.0 * f64::EPSILON * a.abs().max(b.abs()),
        _ => a == b,
    }
}
