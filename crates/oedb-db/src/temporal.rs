//! Relative and absolute time token resolution.
//!
//! Search parameters and event validity accept either absolute timestamps
//! (`2026-08-07T12:00:00Z`) or relative tokens (`NOW`, `TODAY`, `LAST2HOURS`,
//! `NEXTWEEK`). A token resolves to a (start, stop) pair of [`TimeBound`]s:
//! keywords and relative patterns resolve to concrete UTC instants here;
//! anything else falls through as a literal string bound as a query
//! parameter, so malformed timestamps are rejected by `PostgreSQL` rather
//! than pre-judged by this layer.

use chrono::{DateTime, Days, Months, NaiveTime, TimeDelta, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// `(LAST|NEXT)(UNIT)` with implicit count 1, or `(LAST|NEXT)<N>(UNIT)S`.
/// The plural-without-count spelling (`LASTWEEKS`) is tolerated as count 1.
static RELATIVE: Lazy<Regex> = Lazy::new(|| {
    // The pattern is a compile-time constant; a parse failure is a bug.
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(
        r"^(LAST|NEXT)(?:([0-9]+)(YEAR|MONTH|WEEK|DAY|HOUR|MINUTE)S|(YEAR|MONTH|WEEK|DAY|HOUR|MINUTE)S?)$",
    )
    .unwrap();
    re
});

/// One side of a resolved time range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeBound {
    /// A concrete UTC instant.
    Instant(DateTime<Utc>),
    /// A literal timestamp string deferred to the storage layer.
    Literal(String),
}

/// A resolved (start, stop) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRange {
    /// Start of the range.
    pub start: TimeBound,
    /// End of the range.
    pub stop: TimeBound,
}

impl TimeRange {
    /// A degenerate range covering a single instant.
    pub const fn instant(at: DateTime<Utc>) -> Self {
        Self {
            start: TimeBound::Instant(at),
            stop: TimeBound::Instant(at),
        }
    }
}

/// Resolve one time token to a (start, stop) pair, relative to `now`.
///
/// - `NOW` resolves to the single instant `now`.
/// - `TODAY` / `TOMORROW` / `YESTERDAY` resolve to whole UTC days.
/// - `LAST<N><UNIT>S` resolves to `[now - N*unit, now)`; `NEXT...` to
///   `[now, now + N*unit)`. YEAR and MONTH arithmetic is calendar-aware.
/// - Anything else resolves to a literal with start == stop. Spaces are
///   folded back to `+` first: URL decoding turns an encoded timezone `+`
///   into a space.
pub fn resolve_at(token: &str, now: DateTime<Utc>) -> TimeRange {
    let folded = token.trim().replace(' ', "+");
    let upper = folded.to_uppercase();

    let day_start = |d: chrono::NaiveDate| d.and_time(NaiveTime::MIN).and_utc();
    let today = now.date_naive();

    match upper.as_str() {
        "NOW" => return TimeRange::instant(now),
        "TODAY" => {
            return TimeRange {
                start: TimeBound::Instant(day_start(today)),
                stop: TimeBound::Instant(day_start(shift_days(today, 1))),
            };
        }
        "TOMORROW" => {
            return TimeRange {
                start: TimeBound::Instant(day_start(shift_days(today, 1))),
                stop: TimeBound::Instant(day_start(shift_days(today, 2))),
            };
        }
        "YESTERDAY" => {
            return TimeRange {
                start: TimeBound::Instant(day_start(shift_days(today, -1))),
                stop: TimeBound::Instant(day_start(today)),
            };
        }
        _ => {}
    }

    if let Some(range) = resolve_relative(&upper, now) {
        return range;
    }

    TimeRange {
        start: TimeBound::Literal(folded.clone()),
        stop: TimeBound::Literal(folded),
    }
}

/// Resolve one time token relative to the current instant.
pub fn resolve(token: &str) -> TimeRange {
    resolve_at(token, Utc::now())
}

/// Compose a search range from independent `start` / `stop` tokens.
///
/// The `start` token contributes its start side, the `stop` token its stop
/// side; a missing side defaults to `now`. Neither supplied yields the
/// single instant `now`.
pub fn range_between_at(
    start: Option<&str>,
    stop: Option<&str>,
    now: DateTime<Utc>,
) -> TimeRange {
    TimeRange {
        start: start.map_or(TimeBound::Instant(now), |t| resolve_at(t, now).start),
        stop: stop.map_or(TimeBound::Instant(now), |t| resolve_at(t, now).stop),
    }
}

/// Compose a search range from independent tokens relative to now.
pub fn range_between(start: Option<&str>, stop: Option<&str>) -> TimeRange {
    range_between_at(start, stop, Utc::now())
}

fn resolve_relative(upper: &str, now: DateTime<Utc>) -> Option<TimeRange> {
    let caps = RELATIVE.captures(upper)?;
    let direction = caps.get(1).map(|m| m.as_str())?;
    // Counted and uncounted unit alternatives capture in different groups.
    let unit = caps.get(3).or_else(|| caps.get(4)).map(|m| m.as_str())?;
    let count: u32 = match caps.get(2) {
        Some(n) => n.as_str().parse().ok()?,
        None => 1,
    };

    let shifted = shift(now, unit, count, direction == "LAST")?;
    let (start, stop) = if direction == "LAST" {
        (shifted, now)
    } else {
        (now, shifted)
    };
    Some(TimeRange {
        start: TimeBound::Instant(start),
        stop: TimeBound::Instant(stop),
    })
}

/// Move `from` by `count` units, backwards when `back` is set.
///
/// Returns `None` on arithmetic overflow, which sends the token down the
/// literal fallthrough path.
fn shift(from: DateTime<Utc>, unit: &str, count: u32, back: bool) -> Option<DateTime<Utc>> {
    match unit {
        "YEAR" => {
            let months = Months::new(count.checked_mul(12)?);
            if back {
                from.checked_sub_months(months)
            } else {
                from.checked_add_months(months)
            }
        }
        "MONTH" => {
            let months = Months::new(count);
            if back {
                from.checked_sub_months(months)
            } else {
                from.checked_add_months(months)
            }
        }
        "WEEK" | "DAY" => {
            let factor = if unit == "WEEK" { 7 } else { 1 };
            let days = Days::new(u64::from(count).checked_mul(factor)?);
            if back {
                from.checked_sub_days(days)
            } else {
                from.checked_add_days(days)
            }
        }
        "HOUR" | "MINUTE" => {
            let secs_per = if unit == "HOUR" { 3600 } else { 60 };
            let delta = TimeDelta::try_seconds(i64::from(count).checked_mul(secs_per)?)?;
            if back {
                from.checked_sub_signed(delta)
            } else {
                from.checked_add_signed(delta)
            }
        }
        _ => None,
    }
}

fn shift_days(date: chrono::NaiveDate, offset: i64) -> chrono::NaiveDate {
    let shifted = if offset < 0 {
        date.checked_sub_days(Days::new(offset.unsigned_abs()))
    } else {
        date.checked_add_days(Days::new(offset.unsigned_abs()))
    };
    shifted.unwrap_or(date)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 15, 30, 45).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> TimeBound {
        TimeBound::Instant(Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap())
    }

    #[test]
    fn now_is_a_single_instant() {
        let range = resolve_at("NOW", at());
        assert_eq!(range.start, TimeBound::Instant(at()));
        assert_eq!(range.stop, TimeBound::Instant(at()));
    }

    #[test]
    fn today_is_the_current_utc_day() {
        let range = resolve_at("today", at());
        assert_eq!(range.start, day(2026, 8, 7));
        assert_eq!(range.stop, day(2026, 8, 8));
    }

    #[test]
    fn tomorrow_and_yesterday_shift_the_window() {
        let tomorrow = resolve_at("TOMORROW", at());
        assert_eq!(tomorrow.start, day(2026, 8, 8));
        assert_eq!(tomorrow.stop, day(2026, 8, 9));

        let yesterday = resolve_at("YESTERDAY", at());
        assert_eq!(yesterday.start, day(2026, 8, 6));
        assert_eq!(yesterday.stop, day(2026, 8, 7));
    }

    #[test]
    fn last_two_hours_ends_now() {
        let range = resolve_at("LAST2HOURS", at());
        let expected = at() - TimeDelta::try_hours(2).unwrap();
        assert_eq!(range.start, TimeBound::Instant(expected));
        assert_eq!(range.stop, TimeBound::Instant(at()));
    }

    #[test]
    fn implicit_count_is_one() {
        let range = resolve_at("NEXTWEEK", at());
        let expected = at().checked_add_days(Days::new(7)).unwrap();
        assert_eq!(range.start, TimeBound::Instant(at()));
        assert_eq!(range.stop, TimeBound::Instant(expected));
    }

    #[test]
    fn month_arithmetic_is_calendar_aware() {
        let jan31 = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        let range = resolve_at("NEXT1MONTHS", jan31);
        // January 31 + 1 month clamps to February 28.
        assert_eq!(
            range.stop,
            TimeBound::Instant(Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn counted_form_requires_plural() {
        // "LAST2WEEK" is not part of the grammar; it falls through literally.
        let range = resolve_at("LAST2WEEK", at());
        assert_eq!(range.start, TimeBound::Literal(String::from("LAST2WEEK")));
    }

    #[test]
    fn absolute_timestamp_falls_through_with_plus_fold() {
        // URL decoding turned the timezone "+" into a space.
        let range = resolve_at("2026-08-07T12:00:00 02:00", at());
        let expected = TimeBound::Literal(String::from("2026-08-07T12:00:00+02:00"));
        assert_eq!(range.start, expected);
        assert_eq!(range.stop, expected);
    }

    #[test]
    fn range_between_defaults_missing_sides_to_now() {
        let range = range_between_at(Some("YESTERDAY"), None, at());
        assert_eq!(range.start, day(2026, 8, 6));
        assert_eq!(range.stop, TimeBound::Instant(at()));

        let neither = range_between_at(None, None, at());
        assert_eq!(neither, TimeRange::instant(at()));
    }

    #[test]
    fn stop_token_contributes_its_stop_side() {
        let range = range_between_at(None, Some("NEXT3DAYS"), at());
        let expected = at().checked_add_days(Days::new(3)).unwrap();
        assert_eq!(range.start, TimeBound::Instant(at()));
        assert_eq!(range.stop, TimeBound::Instant(expected));
    }
}
