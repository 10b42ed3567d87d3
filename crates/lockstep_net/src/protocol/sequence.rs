//! # Sequence Numbers
//!
//! One byte, cycling through `1..=255`. 0 is reserved for "no ack".
//! Ordering is circular: `a` is newer than `b` when it is less than half a
//! circle ahead of it.

use std::cmp::Ordering;

/// Compares two sequence numbers on the circle.
///
/// Uses the signed 8-bit difference. Two values exactly half a circle apart
/// are ordered numerically, which keeps the comparison antisymmetric for
/// every pair.
#[inline]
#[must_use]
pub fn cmp_seq(a: u8, b: u8) -> Ordering {
    let diff = a.wrapping_sub(b) as i8;
    if diff == i8::MIN {
        return a.cmp(&b);
    }
    diff.cmp(&0)
}

/// Returns true if `a` is strictly newer than `b`.
#[inline]
#[must_use]
pub fn seq_newer(a: u8, b: u8) -> bool {
    cmp_seq(a, b) == Ordering::Greater
}

/// Successor of a sequence number, skipping the reserved 0.
#[inline]
#[must_use]
pub const fn next_seq(seq: u8) -> u8 {
    match seq.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

/// Predecessor of a sequence number, skipping the reserved 0.
#[inline]
#[must_use]
pub const fn prev_seq(seq: u8) -> u8 {
    match seq.wrapping_sub(1) {
        0 => u8::MAX,
        prev => prev,
    }
}
