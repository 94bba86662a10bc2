//! Structured logging helpers built on `tracing`.

use std::time::Instant;
use tracing::{debug, warn};

/// Time an async operation and log entry/exit at debug level.
pub async fn timed<F, T>(name: &str, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    debug!(operation = name, "starting");
    let result = future.await;
    debug!(operation = name, elapsed = ?start.elapsed(), "completed");
    result
}

/// Format a byte count in a human-readable unit, used when logging payload
/// sizes (prompt bodies, webhook responses) without dumping the whole blob.
pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Redact common secret-shaped substrings before a string reaches a log
/// line or an externally-posted artifact (log provider output, webhook
/// error bodies). Mirrors the allow-listed-env-var philosophy elsewhere in
/// this crate: never let secrets leak through an ambient logging path.
pub fn sanitize_for_logging(input: &str) -> String {
    let mut result = input.to_string();
    let patterns: &[(&str, &str)] = &[
        (r"(?i)(api[\s_-]?key)\s*[:=]\s*\S+", "$1=[REDACTED]"),
        (r"(?i)(password|passwd|pwd)\s*[:=]\s*\S+", "$1=[REDACTED]"),
        (r"(?i)(token)\s*[:=]\s*\S+", "$1=[REDACTED]"),
        (r"(?i)(secret)\s*[:=]\s*\S+", "$1=[REDACTED]"),
        (
            r"(?i)(authorization)\s*:\s*bearer\s+\S+",
            "$1: Bearer [REDACTED]",
        ),
    ];
    for (pattern, replacement) in patterns {
        match regex::Regex::new(pattern) {
            Ok(re) => result = re.replace_all(&result, *replacement).to_string(),
            Err(err) => warn!(%err, pattern, "invalid sanitize pattern, skipping"),
        }
    }
    result
}
