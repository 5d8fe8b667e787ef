//! Human-readable frequencies and durations.

const FREQUENCY_UNITS: [(&str, f64); 4] = [("GHz", 1e9), ("MHz", 1e6), ("kHz", 1e3), ("Hz", 1.0)];
const TIME_UNITS: [(&str, f64); 4] = [("ns", 1e9), ("µs", 1e6), ("ms", 1e3), ("s", 1.0)];

/// Shortest decimal form of `value` with at most six significant digits.
fn significant(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{value}");
    }
    let magnitude = value.abs().log10().floor() as i32;
    let decimals = (5 - magnitude).clamp(0, 12) as usize;
    let text = format!("{value:.decimals$}");
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

/// `2500000.0` becomes `"2.5 MHz"`.
pub fn frequency_with_units(hz: f64) -> String {
    FREQUENCY_UNITS
        .iter()
        .find(|(_, scale)| hz / scale >= 1.0)
        .map_or_else(
            || significant(hz),
            |(unit, scale)| format!("{} {unit}", significant(hz / scale)),
        )
}

/// `0.0025` becomes `"2.5ms"`. Negative times (before the trigger) keep
/// their sign.
pub fn time_with_units(seconds: f64) -> String {
    TIME_UNITS
        .iter()
        .find(|(_, scale)| (seconds * scale).abs() < 1000.0)
        .map_or_else(
            || format!("{}s", significant(seconds)),
            |(unit, scale)| format!("{}{unit}", significant(seconds * scale)),
        )
}
