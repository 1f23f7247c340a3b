//! Duration parsing for ongoing job intervals.

use anyhow::Context;
use std::time::Duration;

/// Parse a duration string like "1h", "30m", "300s", "500ms" or "300".
///
/// Supports:
/// - Plain numbers (interpreted as seconds): "300"
/// - Milliseconds suffix: "500ms"
/// - Seconds suffix: "300s"
/// - Minutes suffix: "30m"
/// - Hours suffix: "1h"
///
/// A zero duration is rejected: an ongoing job would otherwise spin.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    let duration = if let Some(num_str) = s.strip_suffix("ms") {
        let millis: u64 = num_str
            .trim()
            .parse()
            .with_context(|| format!("Invalid milliseconds value: {num_str}"))?;
        Duration::from_millis(millis)
    } else if let Some(num_str) = s.strip_suffix('h') {
        let hours: u64 = num_str
            .trim()
            .parse()
            .with_context(|| format!("Invalid hours value: {num_str}"))?;
        Duration::from_secs(
            hours
                .checked_mul(3600)
                .with_context(|| format!("Duration too large: {s}"))?,
        )
    } else if let Some(num_str) = s.strip_suffix('m') {
        let minutes: u64 = num_str
            .trim()
            .parse()
            .with_context(|| format!("Invalid minutes value: {num_str}"))?;
        Duration::from_secs(
            minutes
                .checked_mul(60)
                .with_context(|| format!("Duration too large: {s}"))?,
        )
    } else if let Some(num_str) = s.strip_suffix('s') {
        let secs: u64 = num_str
            .trim()
            .parse()
            .with_context(|| format!("Invalid seconds value: {num_str}"))?;
        Duration::from_secs(secs)
    } else {
        let secs: u64 = s
            .parse()
            .with_context(|| format!("Invalid duration value: {s}"))?;
        Duration::from_secs(secs)
    };

    if duration.is_zero() {
        anyhow::bail!("Duration must be greater than zero: {s}");
    }
    Ok(duration)
}
