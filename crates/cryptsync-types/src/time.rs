//! Timestamp comparison with optional FAT tolerance
//!
//! FAT stores write times with a 2-second granularity, and tools on either
//! side round differently. With tolerance enabled both values are rounded up
//! to the 2-second grid and values at most 4 seconds apart on that grid are
//! equal. On the grid that covers every pair of raw times less than 4
//! seconds apart.

use filetime::FileTime;
use std::cmp::Ordering;

/// FAT write-time granularity in nanoseconds
pub const FAT_GRANULARITY_NANOS: i128 = 2_000_000_000;

/// Largest rounded difference still treated as equal, in nanoseconds
pub const FAT_TOLERANCE_NANOS: i128 = 4_000_000_000;

fn to_nanos(time: FileTime) -> i128 {
    i128::from(time.unix_seconds()) * 1_000_000_000 + i128::from(time.nanoseconds())
}

/// Round a timestamp (nanoseconds since the Unix epoch) up to the 2-second grid
pub fn round_up_to_fat(nanos: i128) -> i128 {
    let rem = nanos.rem_euclid(FAT_GRANULARITY_NANOS);
    if rem == 0 {
        nanos
    } else {
        nanos - rem + FAT_GRANULARITY_NANOS
    }
}

/// Compare two modification times
///
/// `Ordering::Less` means `a` is older than `b`.
pub fn compare_time(a: FileTime, b: FileTime, fat_tolerance: bool) -> Ordering {
    if !fat_tolerance {
        return a.cmp(&b);
    }

    let rounded_a = round_up_to_fat(to_nanos(a));
    let rounded_b = round_up_to_fat(to_nanos(b));
    if (rounded_a - rounded_b).abs() <= FAT_TOLERANCE_NANOS {
        Ordering::Equal
    } else {
        rounded_a.cmp(&rounded_b)
    }
}
