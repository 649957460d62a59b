//! Crontab listing grammar: recognizes schedule lines, validates their fields
//! and computes the next time each job fires.

mod error;
mod field;
mod line;
mod schedule;

pub use error::{GrammarError, NextRunError, ScheduleError};
pub use line::{parse_crontab, NextRun, ScheduleEntry};
pub use schedule::{Schedule, SEARCH_HORIZON_YEARS};
