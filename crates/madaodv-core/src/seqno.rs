//! Sequence number arithmetic
//!
//! Destination sequence numbers wrap at 2^32. Two numbers are ordered by the
//! sign of their 32-bit difference, so `1` is newer than `u32::MAX`.

/// Signed distance from `b` to `a`
pub fn seqno_delta(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Whether `a` is strictly newer than `b`
pub fn seqno_greater(a: u32, b: u32) -> bool {
    seqno_delta(a, b) > 0
}

/// Whether `a` is at least as new as `b`
pub fn seqno_at_least(a: u32, b: u32) -> bool {
    seqno_delta(a, b) >= 0
}
