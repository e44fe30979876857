//! Human-readable rendering of fractional-minute durations.

const MINUTES_PER_HOUR: u64 = 60;
const MINUTES_PER_DAY: u64 = 24 * MINUTES_PER_HOUR;

/// Formats a duration given in (fractional) minutes.
///
/// - under a minute: `"45s"`
/// - under an hour: `"12m 30s"` or `"12m"`
/// - under a day: `"2h 5m"` or `"2h"`
/// - a day or more: `"1 day"`, `"3d 4h"`, `"3d 7m"` or `"3d"`
///
/// Values are rounded on the whole unit being displayed before they are split,
/// so a duration never renders as `"1m 60s"` or `"1h 60m"`. Negative and
/// non-finite values are treated as zero.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn format_minutes(minutes: f64) -> String {
    let minutes = if minutes.is_finite() && minutes > 0.0 {
        minutes
    } else {
        0.0
    };

    let total_seconds = (minutes * 60.0).round() as u64;
    if total_seconds < 60 {
        return format!("{total_seconds}s");
    }
    if total_seconds < 60 * MINUTES_PER_HOUR {
        let (mins, secs) = (total_seconds / 60, total_seconds % 60);
        return if secs > 0 {
            format!("{mins}m {secs}s")
        } else {
            format!("{mins}m")
        };
    }

    let total_minutes = minutes.round() as u64;
    if total_minutes < MINUTES_PER_DAY {
        let (hours, mins) = (total_minutes / MINUTES_PER_HOUR, total_minutes % MINUTES_PER_HOUR);
        return if mins > 0 {
            format!("{hours}h {mins}m")
        } else {
            format!("{hours}h")
        };
    }

    let days = total_minutes / MINUTES_PER_DAY;
    let hours = (total_minutes % MINUTES_PER_DAY) / MINUTES_PER_HOUR;
    let mins = total_minutes % MINUTES_PER_HOUR;

    if days == 1 && hours == 0 && mins == 0 {
        "1 day".to_string()
    } else if hours > 0 {
        format!("{days}d {hours}h")
    } else if mins > 0 {
        format!("{days}d {mins}m")
    } else {
        format!("{days}d")
    }
}
