//! Tag canonicalization.
//!
//! A tag such as `19.3.0-15` is split on `#`, `.` and `-`. Each component
//! is zero-padded to two digits and the tag is padded with `00` components
//! up to seven, giving a fixed-width digit string read as an integer:
//!
//! ```text
//! 19.3.0-15   → 19 03 00 15 00 00 00 → 19030015000000
//! 0.1.0-0     → 00 01 00 00 00 00 00 → 10000000000
//! ```
//!
//! Tags that do not reduce to digits canonicalize to `0`. Such failures are
//! logged and counted rather than raised.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

const DELIMITERS: [char; 3] = ['#', '.', '-'];
const COMPONENT_WIDTH: usize = 2;
const COMPONENTS: usize = 7;

static CANONICALIZE_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Tags that canonicalized to `0` because they were not numeric.
pub fn canonicalize_failures() -> u64 {
    CANONICALIZE_FAILURES.load(Ordering::Relaxed)
}

pub fn canonicalize(tag: &str) -> u64 {
    let mut digits = String::with_capacity(COMPONENT_WIDTH * COMPONENTS);
    let mut components = 0;
    for part in tag.split(|c: char| DELIMITERS.contains(&c)) {
        digits.push_str(&format!("{part:0>width$}", width = COMPONENT_WIDTH));
        components += 1;
    }
    for _ in components..COMPONENTS {
        digits.push_str("00");
    }

    let parsed = if digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse::<u64>().map_err(|e| e.to_string())
    } else {
        Err("non-numeric component".to_string())
    };
    match parsed {
        Ok(value) => value,
        Err(reason) => {
            CANONICALIZE_FAILURES.fetch_add(1, Ordering::Relaxed);
            warn!(%tag, %reason, "tag does not canonicalize, treating as 0");
            0
        }
    }
}
