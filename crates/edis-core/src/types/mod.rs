//! Shared helpers for value-type handlers.

pub mod sorted_set;

/// Converts possibly-negative inclusive range indices to a concrete
/// `(start, stop)` pair over a collection of length `len`.
///
/// Negative indices count back from the end. A start at or past the end,
/// or an inverted range, is empty (`None`). A stop past the end clamps to
/// the last element; a stop before the start of the collection clamps to
/// the first. Shared by GETRANGE, LRANGE, and LTRIM.
pub fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len = len as i64;

    let s = if start < 0 { (len + start).max(0) } else { start };
    let e = if stop < 0 {
        (len + stop).max(0)
    } else {
        stop.min(len - 1)
    };

    if s >= len || s > e {
        return None;
    }
    Some((s as usize, e as usize))
}
