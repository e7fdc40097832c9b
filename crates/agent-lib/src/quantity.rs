//! Kubernetes quantity decoding
//!
//! Turns unit-suffixed strings such as `"500m"`, `"2Gi"` or `"4.5k"` into
//! floating-point base units (cores for CPU, bytes for memory). Decoding is
//! lenient: malformed input yields `0.0` instead of an error, since every
//! caller treats a missing figure as zero.

/// Binary suffixes, checked before the single-letter ones
const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1_048_576.0),
    ("Gi", 1_073_741_824.0),
    ("Ti", 1_099_511_627_776.0),
    ("Pi", 1_125_899_906_842_624.0),
    ("Ei", 1_152_921_504_606_846_976.0),
];

/// Decimal and sub-unit suffixes. `k` and `K` are both decimal kilo.
const DECIMAL_SUFFIXES: &[(char, f64)] = &[
    ('k', 1e3),
    ('K', 1e3),
    ('M', 1e6),
    ('G', 1e9),
    ('T', 1e12),
    ('P', 1e15),
    ('E', 1e18),
    ('m', 1e-3),
    ('u', 1e-6),
    ('n', 1e-9),
];

/// Decode a quantity string into base units, returning `0.0` on malformed input
pub fn decode(raw: &str) -> f64 {
    try_decode(raw).unwrap_or(0.0)
}

/// Decode a quantity string, returning `None` on malformed input
pub fn try_decode(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let (number, multiplier) = split_suffix(raw);

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    Some(value * multiplier)
}

/// Split a quantity into its numeric part and the suffix multiplier
fn split_suffix(raw: &str) -> (&str, f64) {
    for (suffix, multiplier) in BINARY_SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            return (number, *multiplier);
        }
    }

    if let Some(last) = raw.chars().last() {
        if let Some((_, multiplier)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| *s == last) {
            return (&raw[..raw.len() - last.len_utf8()], *multiplier);
        }
    }

    (raw, 1.0)
}
