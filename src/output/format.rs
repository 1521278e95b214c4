//! Number formatting utilities for benchmark output.

/// Format a rate (messages/second) with SI suffixes and 3 significant figures.
/// - < 1K: "X.XX", "XX.X", or "XXX"
/// - 1K - 999K: "X.XXK", "XX.XK", or "XXXK"
/// - >= 1M: "X.XXM", "XX.XM", or "XXXM"
pub fn format_rate(value: f64) -> String {
    if value < 1_000.0 {
        format_3sig(value, "")
    } else if value < 1_000_000.0 {
        format_3sig(value / 1_000.0, "K")
    } else {
        format_3sig(value / 1_000_000.0, "M")
    }
}

/// Format a number with 3 significant figures and an optional suffix.
fn format_3sig(value: f64, suffix: &str) -> String {
    // Account for rounding: 9.995 rounds to 10.00, 99.95 rounds to 100.0
    if value < 9.995 {
        format!("{:.2}{}", value, suffix)
    } else if value < 99.95 {
        format!("{:.1}{}", value, suffix)
    } else {
        format!("{:.0}{}", value, suffix)
    }
}

/// Format a latency value in microseconds with autoscaling and 3 significant
/// figures: "us" below a millisecond, "ms" below a second, "s" above.
pub fn format_latency_us(us: f64) -> String {
    if us < 1_000.0 {
        format_3sig(us, "us")
    } else if us < 1_000_000.0 {
        format_3sig(us / 1_000.0, "ms")
    } else {
        format_3sig(us / 1_000_000.0, "s")
    }
}

/// Format a latency with padding for table alignment.
pub fn format_latency_padded(us: f64, width: usize) -> String {
    format!("{:>width$}", format_latency_us(us), width = width)
}

/// Format a duration given in milliseconds.
pub fn format_duration_ms(ms: f64) -> String {
    format_latency_us(ms * 1_000.0)
}

/// Format a count with SI suffixes for display.
/// - < 1K: raw number
/// - 1K - 999.9K: "XXX.XK"
/// - >= 1M: "X.XM"
pub fn format_count(value: u64) -> String {
    let v = value as f64;
    if v < 1_000.0 {
        format!("{}", value)
    } else if v < 1_000_000.0 {
        format!("{:.1}K", v / 1_000.0)
    } else if v < 1_000_000_000.0 {
        format!("{:.1}M", v / 1_000_000.0)
    } else {
        format!("{:.1}B", v / 1_000_000_000.0)
    }
}

/// Format bytes with binary suffixes.
pub fn format_bytes(bytes: u64) -> String {
    let v = bytes as f64;
    if v < 1_024.0 {
        format!("{}B", bytes)
    } else if v < 1_024.0 * 1_024.0 {
        format!("{:.1}KB", v / 1_024.0)
    } else if v < 1_024.0 * 1_024.0 * 1_024.0 {
        format!("{:.1}MB", v / (1_024.0 * 1_024.0))
    } else {
        format!("{:.2}GB", v / (1_024.0 * 1_024.0 * 1_024.0))
    }
}
