//! Pure conversions from raw field text to typed values.
//!
//! Every function takes the raw value as `Option<&str>` (`None` when the
//! column is absent from the row) and never fails. Numeric conversions
//! report whether they had to substitute a null/default for text that was
//! present but unparseable, so callers can count coercion fallbacks.

/// A converted value plus whether a fallback was substituted for
/// non-empty, unparseable input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coerced<T> {
    pub value: T,
    pub fell_back: bool,
}

/// Trimmed text; empty becomes `None`.
pub fn text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Dates pass through as opaque trimmed text. No calendar validation.
pub fn date(raw: Option<&str>) -> Option<String> {
    text(raw)
}

/// `true`/`1` (any case) → true. Everything else, including missing, is false.
pub fn flag(raw: Option<&str>) -> bool {
    match raw.map(str::trim) {
        Some(s) => s.eq_ignore_ascii_case("true") || s == "1",
        None => false,
    }
}

/// Optional decimal: empty or unparseable becomes `None`.
pub fn decimal(raw: Option<&str>) -> Coerced<Option<f64>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Coerced {
            value: None,
            fell_back: false,
        },
        Some(s) => match parse_finite(s) {
            Some(v) => Coerced {
                value: Some(v),
                fell_back: false,
            },
            None => Coerced {
                value: None,
                fell_back: true,
            },
        },
    }
}

/// Required decimal: empty or unparseable becomes `default`.
pub fn decimal_or(raw: Option<&str>, default: f64) -> Coerced<f64> {
    let parsed = decimal(raw);
    Coerced {
        value: parsed.value.unwrap_or(default),
        fell_back: parsed.fell_back,
    }
}

/// Integral sequence number. Accepts `"2"` and `"2.0"`, rejects `"2.5"`.
pub fn sequence_number(raw: Option<&str>) -> Option<i64> {
    let s = raw.map(str::trim).filter(|s| !s.is_empty())?;
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    let v = parse_finite(s)?;
    if v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

fn parse_finite(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}
