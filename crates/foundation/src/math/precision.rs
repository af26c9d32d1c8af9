//! Deterministic float ordering.
//!
//! Sorting, ranking and arg-min selections over `f64` go through these helpers
//! so results never depend on NaN placement or `-0.0`.

use core::cmp::Ordering;

/// Canonicalize a floating-point value for deterministic ordering.
///
/// Rules:
/// - `-0.0` becomes `0.0`
/// - all NaNs become a single canonical NaN
pub fn canonical_f64(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else if v.is_nan() {
        f64::NAN
    } else {
        v
    }
}

/// Deterministic total ordering for floats.
pub fn stable_total_cmp_f64(a: f64, b: f64) -> Ordering {
    canonical_f64(a).total_cmp(&canonical_f64(b))
}

/// Index of the first item with the smallest key.
///
/// Ties keep the earliest item, so callers get input-order stability.
pub fn argmin_by_key<T>(items: &[T], mut key: impl FnMut(&T) -> f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, item) in items.iter().enumerate() {
        let k = key(item);
        match best {
            Some((_, bk)) if stable_total_cmp_f64(k, bk) != Ordering::Less => {}
            _ => best = Some((i, k)),
        }
    }
    best.map(|(i, _)| i)
}
