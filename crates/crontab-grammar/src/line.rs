use crate::error::GrammarError;
use crate::field::FieldKind;
use crate::schedule::Schedule;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

const CALENDAR_FIELDS: [FieldKind; 5] = [
    FieldKind::Minute,
    FieldKind::Hour,
    FieldKind::DayOfMonth,
    FieldKind::Month,
    FieldKind::DayOfWeek,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum NextRun {
    At(NaiveDateTime),
    AtReboot,
    NoOccurrence,
}

impl NextRun {
    pub fn at(&self) -> Option<NaiveDateTime> {
        match self {
            NextRun::At(at) => Some(*at),
            _ => None,
        }
    }
}

impl fmt::Display for NextRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextRun::At(at) => write!(f, "{}", at.format("%Y-%m-%d %H:%M")),
            NextRun::AtReboot => write!(f, "at reboot"),
            NextRun::NoOccurrence => write!(f, "never"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleEntry {
    pub schedule: String,
    pub command: String,
    pub next_run: NextRun,
}

/// Reads a `crontab -l` listing top to bottom.
///
/// Lines that do not look like a schedule (blank lines, comments, environment
/// assignments) are skipped. A schedule-shaped line without a command, or with
/// fields that do not validate, rejects the whole listing.
pub fn parse_crontab(raw: &str, now: NaiveDateTime) -> Result<Vec<ScheduleEntry>, GrammarError> {
    let mut entries = Vec::new();
    for (index, text) in raw.lines().enumerate() {
        let Some((schedule, command)) = split_line(text) else {
            continue;
        };
        if command.is_empty() {
            return Err(GrammarError::MissingCommand {
                line: index + 1,
                text: schedule.to_string(),
            });
        }
        let parsed = Schedule::parse(schedule).map_err(|source| GrammarError::InvalidSchedule {
            line: index + 1,
            schedule: schedule.to_string(),
            source,
        })?;
        entries.push(ScheduleEntry {
            schedule: schedule.to_string(),
            command: command.to_string(),
            next_run: parsed.next_run(now),
        });
    }
    Ok(entries)
}

/// Splits a schedule-shaped line into its schedule and command parts. The
/// command may be empty; `None` means the line is not a schedule at all.
fn split_line(text: &str) -> Option<(&str, &str)> {
    let line = text.trim();
    if line.starts_with('@') {
        return split_macro_line(line);
    }

    let mut tokens = Tokens::new(line);
    let mut schedule_end = 0;
    for kind in CALENDAR_FIELDS {
        let (start, token) = tokens.next()?;
        if !token.chars().all(|ch| kind.accepts_char(ch)) {
            return None;
        }
        schedule_end = start + token.len();
    }

    // A trailing year only counts when a command still follows it.
    let mut lookahead = tokens.clone();
    if let Some((start, token)) = lookahead.next() {
        if token.chars().all(|ch| FieldKind::Year.accepts_char(ch)) && lookahead.next().is_some() {
            schedule_end = start + token.len();
        }
    }

    Some((&line[..schedule_end], line[schedule_end..].trim_start()))
}

fn split_macro_line(line: &str) -> Option<(&str, &str)> {
    let name_len = line[1..]
        .bytes()
        .take_while(|b| b.is_ascii_lowercase())
        .count();
    if name_len == 0 {
        return None;
    }
    let end = 1 + name_len;
    let mut rest = line[end..].chars();
    let command = match rest.next() {
        None => "",
        Some(sep) if sep.is_whitespace() => rest.as_str(),
        Some(_) => return None,
    };
    Some((&line[..end], command))
}

#[derive(Clone)]
struct Tokens<'a> {
    line: &'a str,
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(line: &'a str) -> Self {
        Self { line, pos: 0 }
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = (usize, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.line[self.pos..];
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            return None;
        }
        let start = self.pos + (rest.len() - trimmed.len());
        let len = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        self.pos = start + len;
        Some((start, &self.line[start..start + len]))
    }
}
