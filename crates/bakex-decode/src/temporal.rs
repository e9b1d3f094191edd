//! Date and time rendering.
//!
//! SQL Server's modern date types count days since 0001-01-01; the
//! legacy `datetime` family counts from 1900-01-01. Day-to-civil
//! conversion uses the proleptic-Gregorian algorithm (shift the epoch to
//! 0000-03-01, split into 400-year eras, then derive year-of-era, day-of-
//! year, month and day).

use bakex_types::bytes::{i16_at, uint_at};

/// Days between 0001-01-01 and 1900-01-01 (proleptic Gregorian).
const DAYS_TO_1900: i64 = 693_595;

/// Convert a day count since 0001-01-01 into `(year, month, day)`.
#[must_use]
pub fn days_to_ymd(days: i64) -> (i64, u32, u32) {
    let z = days + 306;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m as u32, d as u32)
}

/// `date`: days since 0001-01-01, rendered `YYYY-MM-DD`.
#[must_use]
pub fn render_date(days: i64) -> String {
    let (y, m, d) = days_to_ymd(days);
    format!("{y:04}-{m:02}-{d:02}")
}

/// `datetime`: days since 1900-01-01 plus ticks at 1/300 s.
#[must_use]
pub fn render_datetime(days: i32, ticks: i32) -> String {
    let (y, m, d) = days_to_ymd(DAYS_TO_1900 + i64::from(days));
    let total_seconds = ticks / 300;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let millis = (ticks % 300) * 10 / 3;
    format!("{y:04}-{m:02}-{d:02} {hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

/// `smalldatetime`: days since 1900-01-01 plus minutes of day.
#[must_use]
pub fn render_smalldatetime(days: u16, minutes: u16) -> String {
    let (y, m, d) = days_to_ymd(DAYS_TO_1900 + i64::from(days));
    let hours = minutes / 60;
    let mins = minutes % 60;
    format!("{y:04}-{m:02}-{d:02} {hours:02}:{mins:02}:00")
}

/// Bytes of the time payload for a given `datetime2`/`time` scale.
#[must_use]
pub const fn time_bytes_for_scale(scale: u8) -> usize {
    match scale {
        0..=2 => 3,
        3..=4 => 4,
        _ => 5,
    }
}

/// `datetime2(s)`: scaled time then a 3-byte date.
#[must_use]
pub fn render_datetime2(data: &[u8], scale: u8) -> Option<String> {
    let scale = scale.min(7);
    let time_bytes = time_bytes_for_scale(scale);
    let time_val = uint_at(data, 0, time_bytes)?;
    let date_val = uint_at(data, time_bytes, 3)?;
    let (y, m, d) = days_to_ymd(date_val as i64);
    let time = format_scaled_time(time_val, scale);
    Some(format!("{y:04}-{m:02}-{d:02} {time}"))
}

/// `time(s)`: scaled time alone.
#[must_use]
pub fn render_time(data: &[u8], scale: u8) -> Option<String> {
    let scale = scale.min(7);
    let time_val = uint_at(data, 0, time_bytes_for_scale(scale))?;
    Some(format_scaled_time(time_val, scale))
}

/// `datetimeoffset(s)`: datetime2 plus a trailing `±HH:MM` zone offset
/// in minutes.
#[must_use]
pub fn render_datetimeoffset(data: &[u8], scale: u8) -> Option<String> {
    let scale = scale.min(7);
    let time_bytes = time_bytes_for_scale(scale);
    let datetime = render_datetime2(data, scale)?;
    let offset_minutes = i16_at(data, time_bytes + 3)?;
    let sign = if offset_minutes < 0 { '-' } else { '+' };
    let magnitude = offset_minutes.unsigned_abs();
    Some(format!(
        "{datetime}{sign}{:02}:{:02}",
        magnitude / 60,
        magnitude % 60
    ))
}

fn format_scaled_time(time_val: u64, scale: u8) -> String {
    let per_second = 10u64.pow(u32::from(scale));
    let total_seconds = time_val / per_second;
    let frac = time_val % per_second;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if scale > 0 {
        format!(
            "{hours:02}:{minutes:02}:{seconds:02}.{frac:0width$}",
            width = scale as usize
        )
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

#[cfg(test)]
mod temporal_tests {
    use super::*;

    #[test]
    fn civil_conversion_anchors() {
        assert_eq!(days_to_ymd(0), (1, 1, 1));
        assert_eq!(days_to_ymd(DAYS_TO_1900), (1900, 1, 1));
        assert_eq!(days_to_ymd(719_162), (1970, 1, 1));
        assert_eq!(days_to_ymd(738_886), (2024, 1, 2));
        // Leap day.
        assert_eq!(days_to_ymd(730_178), (2000, 2, 29));
    }

    #[test]
    fn date_rendering() {
        assert_eq!(render_date(0), "0001-01-01");
        assert_eq!(render_date(738_886), "2024-01-02");
    }

    #[test]
    fn datetime_tick_math() {
        // 1900-01-01 midnight.
        assert_eq!(render_datetime(0, 0), "1900-01-01 00:00:00.000");
        // 300 ticks = 1 second.
        assert_eq!(render_datetime(0, 300), "1900-01-01 00:00:01.000");
        // 100 ticks = 333 ms by the 10/3 rule.
        assert_eq!(render_datetime(0, 100), "1900-01-01 00:00:00.333");
        // One day later.
        assert_eq!(render_datetime(1, 0), "1900-01-02 00:00:00.000");
    }

    #[test]
    fn smalldatetime_rendering() {
        assert_eq!(render_smalldatetime(0, 0), "1900-01-01 00:00:00");
        assert_eq!(render_smalldatetime(1, 90), "1900-01-02 01:30:00");
    }

    #[test]
    fn scaled_time_widths() {
        assert_eq!(time_bytes_for_scale(0), 3);
        assert_eq!(time_bytes_for_scale(2), 3);
        assert_eq!(time_bytes_for_scale(3), 4);
        assert_eq!(time_bytes_for_scale(4), 4);
        assert_eq!(time_bytes_for_scale(5), 5);
        assert_eq!(time_bytes_for_scale(7), 5);
    }

    #[test]
    fn time_rendering_across_scales() {
        // 12:34:56 at scale 0: 45296 seconds.
        let ticks = 45_296u64;
        let mut data = ticks.to_le_bytes()[..3].to_vec();
        assert_eq!(render_time(&data, 0).unwrap(), "12:34:56");

        // Scale 3: same time with 789 ms.
        let ticks = 45_296_789u64;
        data = ticks.to_le_bytes()[..4].to_vec();
        assert_eq!(render_time(&data, 3).unwrap(), "12:34:56.789");

        // Scale 7 uses 5 bytes.
        let ticks = 452_961_234_567u64;
        data = ticks.to_le_bytes()[..5].to_vec();
        assert_eq!(render_time(&data, 7).unwrap(), "12:34:56.1234567");
    }

    #[test]
    fn truncated_time_payload_is_none() {
        assert_eq!(render_time(&[0, 0], 0), None);
        assert_eq!(render_datetime2(&[0, 0, 0, 0], 3), None);
    }

    #[test]
    fn datetimeoffset_rendering() {
        // 2024-01-02 03:04:05.678+05:30, scale 3.
        let mut data = Vec::new();
        let ticks = ((3 * 3600 + 4 * 60 + 5) * 1000 + 678) as u64;
        data.extend_from_slice(&ticks.to_le_bytes()[..4]);
        data.extend_from_slice(&(738_886u32).to_le_bytes()[..3]);
        data.extend_from_slice(&330i16.to_le_bytes());
        assert_eq!(
            render_datetimeoffset(&data, 3).unwrap(),
            "2024-01-02 03:04:05.678+05:30"
        );

        // Negative offset.
        let n = data.len();
        data[n - 2..].copy_from_slice(&(-480i16).to_le_bytes());
        assert_eq!(
            render_datetimeoffset(&data, 3).unwrap(),
            "2024-01-02 03:04:05.678-08:00"
        );
    }
}
