use chrono::Utc;
use std::time::Duration;

/// Wall-clock time in fractional seconds since the epoch, the unit of
/// `Detections::timestamp`.
pub fn current_timestamp_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs > 60 {
        let mins = secs / 60;
        let secs = secs % 60;
        format!("{}m {}s", mins, secs)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }

    #[test]
    fn test_timestamp_is_recent() {
        // 2020-01-01
        assert!(current_timestamp_secs() > 1_577_836_800.0);
    }
}
