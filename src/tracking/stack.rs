//! Call-stack capture for task and request traces.

use std::backtrace::Backtrace;

/// Frames whose symbol contains one of these belong to the capture machinery.
const INTERNAL_FRAMES: &[&str] = &[
    "std::backtrace",
    "monitor_hub::tracking::stack",
    "monitor_hub::tracking::supervisor",
];

/// Capture the current call stack with tracker-internal frames removed.
pub fn capture_stack() -> String {
    clean_stack(&Backtrace::force_capture().to_string())
}

/// Strip frames that belong to backtrace capture or the tracker itself.
///
/// Expects the `std::backtrace::Backtrace` text layout: a numbered symbol line
/// per frame followed by indented `at file:line` lines.
pub fn clean_stack(raw: &str) -> String {
    let mut kept = Vec::new();
    let mut skipping = false;

    for line in raw.lines() {
        if is_frame_header(line) {
            skipping = INTERNAL_FRAMES.iter().any(|marker| line.contains(marker));
        }
        if !skipping {
            kept.push(line);
        }
    }

    kept.join("\n")
}

fn is_frame_header(line: &str) -> bool {
    let trimmed = line.trim_start();
    match trimmed.split_once(": ") {
        Some((index, _)) => !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}
