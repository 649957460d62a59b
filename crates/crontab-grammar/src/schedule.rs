use crate::error::{NextRunError, ScheduleError};
use crate::field::{parse_field, FieldKind, FieldSet};
use crate::line::NextRun;
use chrono::{Datelike, NaiveDateTime, TimeZone, Utc};
use std::str::FromStr;

/// How far past the reference instant the next-run search looks before giving
/// up. Eight years covers a February 29th schedule across a skipped leap year.
pub const SEARCH_HORIZON_YEARS: i32 = 8;

/// The `cron` evaluator has no calendar past this year.
const LAST_EVALUATED_YEAR: i32 = 2099;

/// A validated schedule expression: five calendar fields plus an optional
/// year, or one of the named macros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    kind: ScheduleKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScheduleKind {
    Calendar(Calendar),
    Reboot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CalendarFields {
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    years: Option<FieldSet>,
}

/// Parsed fields plus the `cron` schedules that evaluate them. The evaluator
/// requires both day fields to match, so restricted day-of-month and
/// day-of-week are split into two schedules and the earlier run wins.
#[derive(Debug, Clone)]
struct Calendar {
    fields: CalendarFields,
    evaluators: Vec<cron::Schedule>,
}

impl PartialEq for Calendar {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Calendar {}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let expr = expr.trim();
        if let Some(name) = expr.strip_prefix('@') {
            return Self::from_macro(name);
        }
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if !(5..=6).contains(&fields.len()) {
            return Err(ScheduleError::FieldCount {
                found: fields.len(),
            });
        }
        let years = match fields.get(5) {
            Some(text) => Some(parse_field(FieldKind::Year, text)?),
            None => None,
        };
        let fields = CalendarFields {
            minutes: parse_field(FieldKind::Minute, fields[0])?,
            hours: parse_field(FieldKind::Hour, fields[1])?,
            days_of_month: parse_field(FieldKind::DayOfMonth, fields[2])?,
            months: parse_field(FieldKind::Month, fields[3])?,
            days_of_week: parse_field(FieldKind::DayOfWeek, fields[4])?,
            years,
        };
        let evaluators = fields
            .evaluator_expressions()
            .into_iter()
            .map(|expression| {
                cron::Schedule::from_str(&expression).map_err(|err| ScheduleError::Evaluator {
                    message: err.to_string(),
                    expression,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            kind: ScheduleKind::Calendar(Calendar { fields, evaluators }),
        })
    }

    fn from_macro(name: &str) -> Result<Self, ScheduleError> {
        let expanded = match name {
            "yearly" | "annually" => "0 0 1 1 *",
            "monthly" => "0 0 1 * *",
            "weekly" => "0 0 * * 0",
            "daily" | "midnight" => "0 0 * * *",
            "hourly" => "0 * * * *",
            "reboot" => {
                return Ok(Self {
                    kind: ScheduleKind::Reboot,
                })
            }
            _ => {
                return Err(ScheduleError::UnknownMacro {
                    name: name.to_string(),
                })
            }
        };
        Self::parse(expanded)
    }

    /// Earliest minute strictly after `now` that satisfies every field.
    pub fn next_after(&self, now: NaiveDateTime) -> Result<NaiveDateTime, NextRunError> {
        match &self.kind {
            ScheduleKind::Reboot => Err(NextRunError::NotCalendar),
            ScheduleKind::Calendar(calendar) => calendar.next_after(now),
        }
    }

    pub fn next_run(&self, now: NaiveDateTime) -> NextRun {
        match self.next_after(now) {
            Ok(at) => NextRun::At(at),
            Err(NextRunError::NotCalendar) => NextRun::AtReboot,
            Err(NextRunError::NoOccurrence { .. }) => NextRun::NoOccurrence,
        }
    }
}

impl Calendar {
    fn next_after(&self, now: NaiveDateTime) -> Result<NaiveDateTime, NextRunError> {
        let exhausted = NextRunError::NoOccurrence {
            after: now,
            horizon_years: SEARCH_HORIZON_YEARS,
        };
        if now.year() > LAST_EVALUATED_YEAR {
            return Err(exhausted);
        }
        let last_year = now.year() + SEARCH_HORIZON_YEARS;
        // Naive local times are evaluated as UTC so no offset is applied.
        let after = Utc.from_utc_datetime(&now);
        self.evaluators
            .iter()
            .filter_map(|schedule| schedule.after(&after).next())
            .map(|at| at.naive_utc())
            .min()
            .filter(|at| at.year() <= last_year)
            .ok_or(exhausted)
    }
}

impl CalendarFields {
    /// Day-of-month and day-of-week are ORed when both are restricted, so
    /// that case yields one expression per day field.
    fn evaluator_expressions(&self) -> Vec<String> {
        let minutes = self.minutes.to_evaluator_field(FieldKind::Minute);
        let hours = self.hours.to_evaluator_field(FieldKind::Hour);
        let months = self.months.to_evaluator_field(FieldKind::Month);
        let years = self
            .years
            .as_ref()
            .map(|years| years.to_evaluator_field(FieldKind::Year));
        let dom = self.days_of_month.to_evaluator_field(FieldKind::DayOfMonth);
        let dow = self.days_of_week.to_evaluator_field(FieldKind::DayOfWeek);
        let day_pairs = if self.days_of_month.is_any() || self.days_of_week.is_any() {
            vec![(dom, dow)]
        } else {
            vec![(dom, "*".to_string()), ("*".to_string(), dow)]
        };
        day_pairs
            .into_iter()
            .map(|(dom, dow)| {
                let mut expression = format!("0 {minutes} {hours} {dom} {months} {dow}");
                if let Some(years) = &years {
                    expression.push(' ');
                    expression.push_str(years);
                }
                expression
            })
            .collect()
    }
}
