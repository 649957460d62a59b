use crate::error::ScheduleError;
use std::collections::BTreeSet;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];
// Names sidestep the evaluator numbering weekdays from Sunday = 1.
const EVALUATOR_WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldKind {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
    Year,
}

impl FieldKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            FieldKind::Minute => "minute",
            FieldKind::Hour => "hour",
            FieldKind::DayOfMonth => "day-of-month",
            FieldKind::Month => "month",
            FieldKind::DayOfWeek => "day-of-week",
            FieldKind::Year => "year",
        }
    }

    fn bounds(self) -> (u32, u32) {
        match self {
            FieldKind::Minute => (0, 59),
            FieldKind::Hour => (0, 23),
            FieldKind::DayOfMonth => (1, 31),
            FieldKind::Month => (1, 12),
            FieldKind::DayOfWeek => (0, 7),
            FieldKind::Year => (1970, 2099),
        }
    }

    /// Day-of-week is judged after 7 is folded onto 0, so 0-6 is full.
    fn covers_all(self, values: &BTreeSet<u32>) -> bool {
        let (min, max) = match self {
            FieldKind::DayOfWeek => (0, 6),
            _ => self.bounds(),
        };
        (min..=max).all(|value| values.contains(&value))
    }

    fn accepts_question(self) -> bool {
        matches!(self, FieldKind::DayOfMonth | FieldKind::DayOfWeek)
    }

    /// Characters a token may contain for a line to be read as a schedule at
    /// all. Anything accepted here but rejected by [`parse_field`] is an
    /// invalid schedule rather than a comment.
    pub(crate) fn accepts_char(self, ch: char) -> bool {
        if ch.is_ascii_digit() || matches!(ch, '*' | '/' | '-' | ',') {
            return true;
        }
        match self {
            FieldKind::Minute | FieldKind::Hour | FieldKind::Year => false,
            FieldKind::DayOfMonth => matches!(ch, '?' | 'L' | 'W'),
            FieldKind::Month => ch.is_ascii_uppercase(),
            FieldKind::DayOfWeek => ch.is_ascii_uppercase() || matches!(ch, '?' | '#'),
        }
    }

    fn named_value(self, token: &str) -> Option<u32> {
        let names: &[&str] = match self {
            FieldKind::Month => &MONTH_NAMES,
            FieldKind::DayOfWeek => &WEEKDAY_NAMES,
            _ => return None,
        };
        let index = names.iter().position(|name| *name == token)? as u32;
        match self {
            FieldKind::Month => Some(index + 1),
            _ => Some(index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldSet {
    values: BTreeSet<u32>,
    any: bool,
}

impl FieldSet {
    pub(crate) fn contains(&self, value: u32) -> bool {
        self.values.contains(&value)
    }

    /// True when the field allows every value in its range, however it was
    /// written. Day-of-month and day-of-week are ORed only when neither is.
    pub(crate) fn is_any(&self) -> bool {
        self.any
    }

    /// The set as a `cron` crate field: `*` or an explicit list.
    pub(crate) fn to_evaluator_field(&self, kind: FieldKind) -> String {
        if self.any {
            return "*".to_string();
        }
        let values: Vec<String> = self
            .values
            .iter()
            .map(|&value| match kind {
                FieldKind::DayOfWeek => EVALUATOR_WEEKDAYS[value as usize].to_string(),
                _ => value.to_string(),
            })
            .collect();
        values.join(",")
    }
}

pub(crate) fn parse_field(kind: FieldKind, text: &str) -> Result<FieldSet, ScheduleError> {
    if text.is_empty() {
        return Err(ScheduleError::Empty { field: kind.name() });
    }
    let mut values = BTreeSet::new();
    for part in text.split(',') {
        parse_part(kind, part, &mut values)?;
    }
    if kind == FieldKind::DayOfWeek && values.remove(&7) {
        values.insert(0);
    }
    let any = kind.covers_all(&values);
    Ok(FieldSet { values, any })
}

fn parse_part(kind: FieldKind, part: &str, values: &mut BTreeSet<u32>) -> Result<(), ScheduleError> {
    let (min, max) = kind.bounds();
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, Some(parse_step(kind, step)?)),
        None => (part, None),
    };
    let (start, end) = if range == "*" || (range == "?" && kind.accepts_question()) {
        (min, max)
    } else if let Some((start, end)) = range.split_once('-') {
        let start = parse_value(kind, start)?;
        let end = parse_value(kind, end)?;
        if start > end {
            return Err(ScheduleError::ReversedRange {
                field: kind.name(),
                start,
                end,
            });
        }
        (start, end)
    } else {
        let value = parse_value(kind, range)?;
        match step {
            Some(_) => (value, max),
            None => (value, value),
        }
    };
    let step = step.unwrap_or(1) as usize;
    values.extend((start..=end).step_by(step));
    Ok(())
}

fn parse_step(kind: FieldKind, text: &str) -> Result<u32, ScheduleError> {
    match text.parse::<u32>() {
        Ok(step) if step > 0 => Ok(step),
        _ => Err(ScheduleError::InvalidStep {
            field: kind.name(),
            step: text.to_string(),
        }),
    }
}

fn parse_value(kind: FieldKind, text: &str) -> Result<u32, ScheduleError> {
    if text.is_empty() {
        return Err(ScheduleError::Empty { field: kind.name() });
    }
    let value = if text.bytes().all(|b| b.is_ascii_digit()) {
        text.parse::<u32>().map_err(|_| ScheduleError::InvalidValue {
            field: kind.name(),
            value: text.to_string(),
        })?
    } else if let Some(value) = kind.named_value(text) {
        value
    } else if text.contains(['L', 'W', '#', '?']) {
        return Err(ScheduleError::Unsupported {
            field: kind.name(),
            token: text.to_string(),
        });
    } else {
        return Err(ScheduleError::InvalidValue {
            field: kind.name(),
            value: text.to_string(),
        });
    };
    let (min, max) = kind.bounds();
    if value < min || value > max {
        return Err(ScheduleError::OutOfRange {
            field: kind.name(),
            value,
            min,
            max,
        });
    }
    Ok(value)
}
