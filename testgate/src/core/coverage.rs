//! Coverage extraction from `go test -cover` output.

use crate::core::patterns::{COVERAGE, Effect, matches};

/// Average the positive per-package coverage figures found in `output`.
///
/// Lines reporting `[no test files]` are ignored, as are packages at 0%.
/// Returns 0 when nothing qualifies.
pub fn average_coverage(output: &str) -> u8 {
    let mut total = 0.0_f64;
    let mut count = 0u32;

    for line in output.lines() {
        if matches(line, Effect::NoTestFiles) {
            continue;
        }
        let Some(caps) = COVERAGE.captures(line) else {
            continue;
        };
        let Ok(value) = caps[1].parse::<f64>() else {
            continue;
        };
        if value > 0.0 {
            total += value;
            count += 1;
        }
    }

    if count == 0 {
        return 0;
    }
    (total / f64::from(count)).round().clamp(0.0, 100.0) as u8
}
