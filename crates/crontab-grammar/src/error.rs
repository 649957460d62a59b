use chrono::NaiveDateTime;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    FieldCount { found: usize },
    Empty { field: &'static str },
    InvalidValue { field: &'static str, value: String },
    Unsupported { field: &'static str, token: String },
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    InvalidStep { field: &'static str, step: String },
    ReversedRange {
        field: &'static str,
        start: u32,
        end: u32,
    },
    UnknownMacro { name: String },
    Evaluator { expression: String, message: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::FieldCount { found } => {
                write!(f, "expected 5 or 6 schedule fields, found {found}")
            }
            ScheduleError::Empty { field } => write!(f, "{field} field is empty"),
            ScheduleError::InvalidValue { field, value } => {
                write!(f, "invalid {field} value '{value}'")
            }
            ScheduleError::Unsupported { field, token } => {
                write!(f, "unsupported {field} syntax '{token}'")
            }
            ScheduleError::OutOfRange {
                field,
                value,
                min,
                max,
            } => write!(f, "{field} value {value} outside {min}-{max}"),
            ScheduleError::InvalidStep { field, step } => {
                write!(f, "invalid {field} step '{step}'")
            }
            ScheduleError::ReversedRange { field, start, end } => {
                write!(f, "{field} range {start}-{end} is reversed")
            }
            ScheduleError::UnknownMacro { name } => write!(f, "unknown macro '@{name}'"),
            ScheduleError::Evaluator {
                expression,
                message,
            } => write!(f, "cannot evaluate '{expression}': {message}"),
        }
    }
}

impl std::error::Error for ScheduleError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextRunError {
    /// `@reboot` has no calendar occurrence.
    NotCalendar,
    NoOccurrence {
        after: NaiveDateTime,
        horizon_years: i32,
    },
}

impl fmt::Display for NextRunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextRunError::NotCalendar => write!(f, "schedule only runs at reboot"),
            NextRunError::NoOccurrence {
                after,
                horizon_years,
            } => write!(
                f,
                "no occurrence within {horizon_years} years after {}",
                after.format("%Y-%m-%d %H:%M")
            ),
        }
    }
}

impl std::error::Error for NextRunError {}

/// Failure to read a crontab listing. Either variant means the listing is not
/// something this grammar understands, so the whole listing is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrammarError {
    MissingCommand {
        line: usize,
        text: String,
    },
    InvalidSchedule {
        line: usize,
        schedule: String,
        source: ScheduleError,
    },
}

impl GrammarError {
    pub fn line(&self) -> usize {
        match self {
            GrammarError::MissingCommand { line, .. } => *line,
            GrammarError::InvalidSchedule { line, .. } => *line,
        }
    }
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarError::MissingCommand { line, text } => {
                write!(f, "line {line}: schedule '{text}' has no command")
            }
            GrammarError::InvalidSchedule {
                line,
                schedule,
                source,
            } => write!(f, "line {line}: invalid schedule '{schedule}': {source}"),
        }
    }
}

impl std::error::Error for GrammarError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GrammarError::MissingCommand { .. } => None,
            GrammarError::InvalidSchedule { source, .. } => Some(source),
        }
    }
}
