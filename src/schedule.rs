//! # Cron Schedule Evaluation
//!
//! Parser and evaluator for the five-field cron descriptors stored on sync
//! apps (`minute hour day-of-month month day-of-week`). Supported forms per
//! field: `*`, a number, `a-b`, `a,b,c`, `*/n` and `a-b/n`. Weekday 0 and 7
//! both mean Sunday.
//!
//! Descriptors are evaluated in civil time: the scheduler converts the
//! current instant into the configured timezone before matching, so a
//! schedule like `30 6 * * *` fires at 06:30 local regardless of DST.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike};
use thiserror::Error;

/// Errors produced while parsing a cron descriptor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("expected 5 fields, got {0}")]
    WrongFieldCount(usize),
    #[error("empty field or list entry in '{0}'")]
    EmptyField(String),
    #[error("'{value}' is not a valid number in field '{field}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("value {value} out of range {min}-{max} for field '{field}'")]
    OutOfRange {
        field: &'static str,
        value: u8,
        min: u8,
        max: u8,
    },
    #[error("inverted range '{0}'")]
    InvertedRange(String),
    #[error("invalid step in '{0}'")]
    InvalidStep(String),
}

/// A parsed five-field cron descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: BTreeSet<u8>,
    hours: BTreeSet<u8>,
    days_of_month: BTreeSet<u8>,
    months: BTreeSet<u8>,
    days_of_week: BTreeSet<u8>,
    dom_restricted: bool,
    dow_restricted: bool,
}

struct FieldSpec {
    name: &'static str,
    min: u8,
    max: u8,
    /// Day-of-week accepts 7 as an alias for Sunday.
    sunday_alias: bool,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    sunday_alias: false,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    sunday_alias: false,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    sunday_alias: false,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    sunday_alias: false,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    sunday_alias: true,
};

impl CronSchedule {
    /// Parse a five-field descriptor. Whitespace between fields is flexible.
    pub fn parse(descriptor: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = descriptor.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::WrongFieldCount(fields.len()));
        }

        let minutes = parse_field(fields[0], &MINUTE)?;
        let hours = parse_field(fields[1], &HOUR)?;
        let days_of_month = parse_field(fields[2], &DAY_OF_MONTH)?;
        let months = parse_field(fields[3], &MONTH)?;
        let days_of_week = parse_field(fields[4], &DAY_OF_WEEK)?;

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    /// Whether the descriptor fires at the given local instant (second granularity is ignored).
    pub fn matches_at<Tz: TimeZone>(&self, t: &DateTime<Tz>) -> bool {
        let minute = t.minute() as u8;
        let hour = t.hour() as u8;
        let dom = t.day() as u8;
        let month = t.month() as u8;
        let dow = t.weekday().num_days_from_sunday() as u8;

        if !self.minutes.contains(&minute)
            || !self.hours.contains(&hour)
            || !self.months.contains(&month)
        {
            return false;
        }

        // Classic cron day rule: when both day fields are restricted,
        // either one matching is enough.
        let dom_match = self.days_of_month.contains(&dom);
        let dow_match = self.days_of_week.contains(&dow);
        if self.dom_restricted && self.dow_restricted {
            dom_match || dow_match
        } else {
            dom_match && dow_match
        }
    }

    /// Most recent fire time at or before `now`, looking back at most
    /// `window_minutes`. Returns `None` if the descriptor did not fire
    /// within the window.
    pub fn last_fire_within<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
        window_minutes: u32,
    ) -> Option<DateTime<Tz>> {
        let truncated = now.clone()
            - Duration::seconds(now.second() as i64)
            - Duration::nanoseconds(now.nanosecond() as i64);

        for back in 0..=window_minutes {
            let candidate = truncated.clone() - Duration::minutes(back as i64);
            if self.matches_at(&candidate) {
                return Some(candidate);
            }
        }

        None
    }
}

fn parse_field(spec: &str, field: &FieldSpec) -> Result<BTreeSet<u8>, ScheduleError> {
    let mut values = BTreeSet::new();

    for atom in spec.split(',') {
        if atom.is_empty() {
            return Err(ScheduleError::EmptyField(spec.to_string()));
        }

        let (range_part, step) = match atom.split_once('/') {
            Some((range, step_str)) => {
                let step: u8 = step_str.parse().map_err(|_| {
                    ScheduleError::InvalidStep(atom.to_string())
                })?;
                if step == 0 {
                    return Err(ScheduleError::InvalidStep(atom.to_string()));
                }
                // Steps only apply to `*` and explicit ranges.
                if range_part_is_single_number(range) {
                    return Err(ScheduleError::InvalidStep(atom.to_string()));
                }
                (range, step)
            }
            None => (atom, 1),
        };

        let (start, end) = if range_part == "*" {
            (field.min, field.max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let start = parse_value(a, field)?;
            let end = parse_value(b, field)?;
            if start > end {
                return Err(ScheduleError::InvertedRange(atom.to_string()));
            }
            (start, end)
        } else {
            let value = parse_value(range_part, field)?;
            (value, value)
        };

        let mut current = start;
        while current <= end {
            values.insert(normalize(current, field));
            current = match current.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
    }

    Ok(values)
}

fn range_part_is_single_number(range: &str) -> bool {
    range != "*" && !range.contains('-')
}

fn parse_value(raw: &str, field: &FieldSpec) -> Result<u8, ScheduleError> {
    let value: u8 = raw.parse().map_err(|_| ScheduleError::InvalidNumber {
        field: field.name,
        value: raw.to_string(),
    })?;

    if value < field.min || value > field.max {
        return Err(ScheduleError::OutOfRange {
            field: field.name,
            value,
            min: field.min,
            max: field.max,
        });
    }

    Ok(value)
}

fn normalize(value: u8, field: &FieldSpec) -> u8 {
    if field.sunday_alias && value == 7 { 0 } else { value }
}

/// Wall-clock policy: due when the descriptor fired within the tolerance
/// window and no job for the app has started since that fire time.
pub fn due_wall_clock<Tz: TimeZone>(
    schedule: &CronSchedule,
    now: &DateTime<Tz>,
    last_started: Option<&DateTime<Tz>>,
    tolerance_minutes: u32,
) -> bool {
    match schedule.last_fire_within(now, tolerance_minutes) {
        Some(fire) => last_started.is_none_or(|started| *started < fire),
        None => false,
    }
}

/// Debounce policy: due when the app has never run, or enough time has
/// passed since its last run started.
pub fn due_debounce<Tz: TimeZone>(
    now: &DateTime<Tz>,
    last_started: Option<&DateTime<Tz>>,
    debounce_seconds: u64,
) -> bool {
    match last_started {
        None => true,
        Some(started) => {
            now.clone().signed_duration_since(started.clone())
                >= Duration::seconds(debounce_seconds as i64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn parses_wildcard_descriptor() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        assert!(schedule.matches_at(&at("2025-06-15T10:37:12Z")));
    }

    #[test]
    fn parses_fixed_daily_descriptor() {
        let schedule = CronSchedule::parse("30 6 * * *").unwrap();
        assert!(schedule.matches_at(&at("2025-06-15T06:30:00Z")));
        assert!(!schedule.matches_at(&at("2025-06-15T06:31:00Z")));
        assert!(!schedule.matches_at(&at("2025-06-15T07:30:00Z")));
    }

    #[test]
    fn parses_step_descriptor() {
        let schedule = CronSchedule::parse("*/15 * * * *").unwrap();
        for minute in [0, 15, 30, 45] {
            assert!(schedule.matches_at(&at(&format!("2025-06-15T10:{:02}:00Z", minute))));
        }
        assert!(!schedule.matches_at(&at("2025-06-15T10:20:00Z")));
    }

    #[test]
    fn parses_range_with_step() {
        let schedule = CronSchedule::parse("0 9-17/2 * * *").unwrap();
        for hour in [9, 11, 13, 15, 17] {
            assert!(schedule.matches_at(&at(&format!("2025-06-16T{:02}:00:00Z", hour))));
        }
        assert!(!schedule.matches_at(&at("2025-06-16T10:00:00Z")));
        assert!(!schedule.matches_at(&at("2025-06-16T18:00:00Z")));
    }

    #[test]
    fn parses_list_descriptor() {
        let schedule = CronSchedule::parse("0 0 1,15 * *").unwrap();
        assert!(schedule.matches_at(&at("2025-06-01T00:00:00Z")));
        assert!(schedule.matches_at(&at("2025-06-15T00:00:00Z")));
        assert!(!schedule.matches_at(&at("2025-06-02T00:00:00Z")));
    }

    #[test]
    fn weekday_seven_is_sunday() {
        let with_seven = CronSchedule::parse("0 8 * * 7").unwrap();
        let with_zero = CronSchedule::parse("0 8 * * 0").unwrap();
        // 2025-06-15 is a Sunday.
        let sunday = at("2025-06-15T08:00:00Z");
        let monday = at("2025-06-16T08:00:00Z");

        assert_eq!(with_seven, with_zero);
        assert!(with_seven.matches_at(&sunday));
        assert!(!with_seven.matches_at(&monday));
    }

    #[test]
    fn restricted_day_fields_match_either() {
        // Standard cron: dom OR dow when both are restricted.
        let schedule = CronSchedule::parse("0 0 13 * 5").unwrap();
        // 2025-06-13 is a Friday (both match), 2025-07-13 is a Sunday (dom only).
        assert!(schedule.matches_at(&at("2025-06-13T00:00:00Z")));
        assert!(schedule.matches_at(&at("2025-07-13T00:00:00Z")));
        // 2025-06-20 is a Friday (dow only).
        assert!(schedule.matches_at(&at("2025-06-20T00:00:00Z")));
        assert!(!schedule.matches_at(&at("2025-06-14T00:00:00Z")));
    }

    #[test]
    fn rejects_malformed_descriptors() {
        assert_eq!(
            CronSchedule::parse("* * * *"),
            Err(ScheduleError::WrongFieldCount(4))
        );
        assert!(matches!(
            CronSchedule::parse("60 * * * *"),
            Err(ScheduleError::OutOfRange { field: "minute", .. })
        ));
        assert!(matches!(
            CronSchedule::parse("* 24 * * *"),
            Err(ScheduleError::OutOfRange { field: "hour", .. })
        ));
        assert!(matches!(
            CronSchedule::parse("* * 0 * *"),
            Err(ScheduleError::OutOfRange { field: "day-of-month", .. })
        ));
        assert!(matches!(
            CronSchedule::parse("* * * 13 *"),
            Err(ScheduleError::OutOfRange { field: "month", .. })
        ));
        assert!(matches!(
            CronSchedule::parse("* * * * 8"),
            Err(ScheduleError::OutOfRange { field: "day-of-week", .. })
        ));
        assert_eq!(
            CronSchedule::parse("30-10 * * * *"),
            Err(ScheduleError::InvertedRange("30-10".to_string()))
        );
        assert_eq!(
            CronSchedule::parse("*/0 * * * *"),
            Err(ScheduleError::InvalidStep("*/0".to_string()))
        );
        assert_eq!(
            CronSchedule::parse("5/2 * * * *"),
            Err(ScheduleError::InvalidStep("5/2".to_string()))
        );
        assert!(matches!(
            CronSchedule::parse("a * * * *"),
            Err(ScheduleError::InvalidNumber { field: "minute", .. })
        ));
        assert_eq!(
            CronSchedule::parse("1,,2 * * * *"),
            Err(ScheduleError::EmptyField("1,,2".to_string()))
        );
    }

    #[test]
    fn last_fire_within_finds_recent_fire() {
        let schedule = CronSchedule::parse("30 6 * * *").unwrap();
        let now = at("2025-06-15T06:33:42Z");

        let fire = schedule.last_fire_within(&now, 5).unwrap();
        assert_eq!(fire, at("2025-06-15T06:30:00Z"));
    }

    #[test]
    fn last_fire_within_respects_window() {
        let schedule = CronSchedule::parse("30 6 * * *").unwrap();
        let now = at("2025-06-15T06:40:00Z");

        assert!(schedule.last_fire_within(&now, 5).is_none());
        assert!(schedule.last_fire_within(&now, 10).is_some());
    }

    #[test]
    fn wall_clock_due_once_per_fire() {
        let schedule = CronSchedule::parse("30 6 * * *").unwrap();
        let now = at("2025-06-15T06:32:00Z");

        // Never ran: due.
        assert!(due_wall_clock(&schedule, &now, None, 5));

        // Ran before today's fire: due again.
        let yesterday = at("2025-06-14T06:31:00Z");
        assert!(due_wall_clock(&schedule, &now, Some(&yesterday), 5));

        // Already ran after this fire: not due.
        let just_ran = at("2025-06-15T06:31:00Z");
        assert!(!due_wall_clock(&schedule, &now, Some(&just_ran), 5));

        // Outside the window entirely: not due.
        let late = at("2025-06-15T06:40:00Z");
        assert!(!due_wall_clock(&schedule, &late, None, 5));
    }

    #[test]
    fn debounce_due_after_interval() {
        let now = at("2025-06-15T10:00:00Z");

        assert!(due_debounce(&now, None, 300));
        assert!(!due_debounce(
            &now,
            Some(&at("2025-06-15T09:58:00Z")),
            300
        ));
        assert!(due_debounce(&now, Some(&at("2025-06-15T09:55:00Z")), 300));
    }

    #[test]
    fn matches_in_civil_time() {
        use chrono::TimeZone as _;
        let schedule = CronSchedule::parse("30 6 * * *").unwrap();
        let tz: chrono_tz::Tz = "Europe/Rome".parse().unwrap();

        // 04:30 UTC is 06:30 in Rome during DST.
        let utc = at("2025-06-15T04:30:00Z");
        assert!(!schedule.matches_at(&utc));
        assert!(schedule.matches_at(&utc.with_timezone(&tz)));

        // Same civil time in winter maps to a different UTC instant.
        let winter_local = tz.with_ymd_and_hms(2025, 1, 15, 6, 30, 0).unwrap();
        assert!(schedule.matches_at(&winter_local));
    }
}
