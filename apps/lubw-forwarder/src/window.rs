//! Query windows for the LUBW API.
//!
//! Windows are half-open `[start, end)` intervals carried with the UTC offset
//! of the reference zone at each bound. The API expects the local wall-clock
//! time without an offset suffix.

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::fmt;
use thiserror::Error;

pub const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub const DEFAULT_CHUNK_SIZE: usize = 100;
pub const DEFAULT_STEP_HOURS: u32 = 1;

// Longest clock jump a zone has ever made (Samoa skipped a whole day).
const MAX_GAP_HOURS: i64 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("window start {start} is not before end {end} on the local wall clock")]
pub struct InvalidWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl TimeWindow {
    pub fn new(
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Result<Self, InvalidWindow> {
        let window = Self { start, end };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> Result<(), InvalidWindow> {
        if self.start >= self.end || self.wire_start() >= self.wire_end() {
            return Err(InvalidWindow {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    pub fn wire_start(&self) -> String {
        self.start.format(WIRE_FORMAT).to_string()
    }

    pub fn wire_end(&self) -> String {
        self.end.format(WIRE_FORMAT).to_string()
    }

    /// Same instants, each bound carrying the zone's offset at that instant.
    pub fn in_zone(&self, timezone: &Tz) -> TimeWindow {
        TimeWindow {
            start: self.start.with_timezone(timezone).fixed_offset(),
            end: self.end.with_timezone(timezone).fixed_offset(),
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Lagging window policy for scheduled runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetPolicy {
    pub timezone: Tz,
    pub lag_hours: u32,
    pub window_hours: u32,
}

impl OffsetPolicy {
    pub fn window_at(&self, now: DateTime<Utc>) -> Result<TimeWindow, InvalidWindow> {
        offset_window(
            now.with_timezone(&self.timezone),
            self.lag_hours,
            self.window_hours,
        )
    }
}

/// Bounds are counted on the local wall clock. A start inside a skipped hour
/// moves back to the previous valid hour and an end moves forward; a repeated
/// hour resolves to its first occurrence.
pub fn offset_window<Z: TimeZone>(
    now: DateTime<Z>,
    lag_hours: u32,
    window_hours: u32,
) -> Result<TimeWindow, InvalidWindow> {
    let timezone = now.timezone();
    let hour = floor_to_hour(now.naive_local());
    let start = hour - Duration::hours(i64::from(lag_hours));
    let end = start + Duration::hours(i64::from(window_hours));
    TimeWindow::new(
        resolve_local(&timezone, start, -1),
        resolve_local(&timezone, end, 1),
    )
}

fn floor_to_hour(local: NaiveDateTime) -> NaiveDateTime {
    let past_hour = Duration::seconds(i64::from(local.minute() * 60 + local.second()))
        + Duration::nanoseconds(i64::from(local.nanosecond()));
    local - past_hour
}

fn resolve_local<Z: TimeZone>(
    timezone: &Z,
    local: NaiveDateTime,
    direction: i64,
) -> DateTime<FixedOffset> {
    for shift in 0..=MAX_GAP_HOURS {
        let candidate = local + Duration::hours(direction * shift);
        if let Some(resolved) = timezone.from_local_datetime(&candidate).earliest() {
            return resolved.fixed_offset();
        }
    }
    timezone.from_utc_datetime(&local).fixed_offset()
}

/// Splits `range` into contiguous sub-windows of `step_hours`; the last one is
/// clipped to `range.end`.
pub fn split_hourly(range: &TimeWindow, step_hours: u32) -> Vec<TimeWindow> {
    let step = Duration::hours(i64::from(step_hours.max(1)));
    let mut windows = Vec::new();
    let mut cursor = range.start;
    while cursor < range.end {
        let next = (cursor + step).min(range.end);
        windows.push(TimeWindow {
            start: cursor,
            end: next,
        });
        cursor = next;
    }
    windows
}

/// Groups sub-windows into batches requested as one spanning window each.
pub fn chunk_windows(windows: &[TimeWindow], chunk_size: usize) -> Vec<TimeWindow> {
    windows
        .chunks(chunk_size.max(1))
        .filter_map(|chunk| {
            let first = chunk.first()?;
            let last = chunk.last()?;
            Some(TimeWindow {
                start: first.start,
                end: last.end,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Berlin;

    fn ts(raw: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(raw).expect("timestamp")
    }

    #[test]
    fn offset_window_lags_behind_the_current_hour() {
        let now = Berlin
            .with_ymd_and_hms(2025, 5, 18, 17, 42, 10)
            .single()
            .expect("now");
        let window = offset_window(now, 3, 1).expect("window");
        assert_eq!(window.start, ts("2025-05-18T14:00:00+02:00"));
        assert_eq!(window.end, ts("2025-05-18T15:00:00+02:00"));
        assert_eq!(window.wire_start(), "2025-05-18T14:00:00");
        assert_eq!(window.wire_end(), "2025-05-18T15:00:00");
        assert_eq!(window.start.offset().local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn offset_window_keeps_each_bound_offset_across_dst_start() {
        let now = Berlin
            .with_ymd_and_hms(2025, 3, 30, 5, 10, 0)
            .single()
            .expect("now");
        let window = offset_window(now, 3, 1).expect("window");
        assert_eq!(window.wire_start(), "2025-03-30T01:00:00");
        assert_eq!(window.wire_end(), "2025-03-30T03:00:00");
        assert_eq!(window.start.offset().local_minus_utc(), 3600);
        assert_eq!(window.end.offset().local_minus_utc(), 2 * 3600);
        assert_eq!(window.end - window.start, Duration::hours(1));
    }

    #[test]
    fn offset_window_stays_one_wall_clock_hour_across_dst_end() {
        let now = Berlin
            .with_ymd_and_hms(2025, 10, 26, 4, 10, 0)
            .single()
            .expect("now");
        let window = offset_window(now, 3, 1).expect("window");
        assert_eq!(window.wire_start(), "2025-10-26T01:00:00");
        assert_eq!(window.wire_end(), "2025-10-26T02:00:00");
        assert_eq!(window.start, ts("2025-10-26T01:00:00+02:00"));
        assert_eq!(window.end, ts("2025-10-26T02:00:00+02:00"));

        let now = Berlin
            .with_ymd_and_hms(2025, 10, 26, 5, 10, 0)
            .single()
            .expect("now");
        let window = offset_window(now, 3, 1).expect("window");
        assert_eq!(window.wire_start(), "2025-10-26T02:00:00");
        assert_eq!(window.wire_end(), "2025-10-26T03:00:00");
        assert_eq!(window.start, ts("2025-10-26T02:00:00+02:00"));
        assert_eq!(window.end - window.start, Duration::hours(2));
    }

    #[test]
    fn windows_with_equal_wire_strings_are_rejected() {
        let err = TimeWindow::new(
            ts("2025-10-26T02:00:00+02:00"),
            ts("2025-10-26T02:00:00+01:00"),
        )
        .unwrap_err();
        assert_eq!(err.end, ts("2025-10-26T01:00:00Z"));
    }

    #[test]
    fn policy_uses_reference_zone() {
        let policy = OffsetPolicy {
            timezone: Berlin,
            lag_hours: 3,
            window_hours: 1,
        };
        let now = Utc
            .with_ymd_and_hms(2025, 1, 10, 12, 5, 0)
            .single()
            .expect("now");
        let window = policy.window_at(now).expect("window");
        assert_eq!(window.start, ts("2025-01-10T10:00:00+01:00"));
        assert_eq!(window.end, ts("2025-01-10T11:00:00+01:00"));
    }

    #[test]
    fn new_rejects_empty_and_inverted_windows() {
        let start = ts("2025-05-18T17:00:00+01:00");
        let end = ts("2025-05-18T18:00:00+01:00");
        assert!(TimeWindow::new(start, end).is_ok());
        assert!(TimeWindow::new(start, start).is_err());
        let err = TimeWindow::new(end, start).unwrap_err();
        assert_eq!(err.start, end);
    }

    #[test]
    fn split_hourly_produces_contiguous_clipped_windows() {
        let range = TimeWindow::new(
            ts("2025-05-18T00:00:00+01:00"),
            ts("2025-05-18T05:30:00+01:00"),
        )
        .expect("range");
        let windows = split_hourly(&range, DEFAULT_STEP_HOURS);
        assert_eq!(windows.len(), 6);
        assert_eq!(windows[0].start, range.start);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(windows[5].start, ts("2025-05-18T05:00:00+01:00"));
        assert_eq!(windows[5].end, range.end);
    }

    #[test]
    fn in_zone_renders_wire_times_in_local_wall_time() {
        let window = TimeWindow::new(
            ts("2025-03-30T00:00:00+00:00"),
            ts("2025-03-30T02:00:00+00:00"),
        )
        .expect("window")
        .in_zone(&Berlin);
        assert_eq!(window.wire_start(), "2025-03-30T01:00:00");
        assert_eq!(window.wire_end(), "2025-03-30T04:00:00");
        assert_eq!(window.start, ts("2025-03-30T00:00:00Z"));
    }

    #[test]
    fn chunk_windows_spans_each_batch() {
        let range = TimeWindow::new(
            ts("2025-05-18T00:00:00+01:00"),
            ts("2025-05-18T05:30:00+01:00"),
        )
        .expect("range");
        let chunks = chunk_windows(&split_hourly(&range, 1), 4);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start, range.start);
        assert_eq!(chunks[0].end, ts("2025-05-18T04:00:00+01:00"));
        assert_eq!(chunks[1].start, chunks[0].end);
        assert_eq!(chunks[1].end, range.end);
    }
}
