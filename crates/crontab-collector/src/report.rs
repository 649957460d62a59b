use chrono::NaiveDateTime;
use crontab_grammar::ScheduleEntry;
use serde::Serialize;

use crate::target::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Ok,
    TransportError,
    ParseError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TargetStatus {
    Ok,
    TransportError { message: String },
    ParseError { line: usize, message: String },
}

impl TargetStatus {
    pub fn severity(&self) -> Severity {
        match self {
            TargetStatus::Ok => Severity::Ok,
            TargetStatus::TransportError { .. } => Severity::TransportError,
            TargetStatus::ParseError { .. } => Severity::ParseError,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, TargetStatus::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub host: String,
    pub user: String,
    pub status: TargetStatus,
    pub entries: Vec<ScheduleEntry>,
}

impl TargetReport {
    pub(crate) fn collected(target: &Target, entries: Vec<ScheduleEntry>) -> Self {
        Self {
            host: target.label(),
            user: target.crontab_user.clone(),
            status: TargetStatus::Ok,
            entries,
        }
    }

    pub(crate) fn failed(target: &Target, status: TargetStatus) -> Self {
        Self {
            host: target.label(),
            user: target.crontab_user.clone(),
            status,
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every target answered and at least one report is kept.
    Complete,
    /// Every target answered, but all of them were omitted as empty.
    NothingToReport,
    /// The deadline passed before every target answered.
    TimedOut,
    /// The workers stopped before every target answered.
    Incomplete,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: NaiveDateTime,
    pub expected: usize,
    pub received: usize,
    pub outcome: RunOutcome,
    pub worst: Severity,
    pub reports: Vec<TargetReport>,
}

impl RunReport {
    pub fn entry_count(&self) -> usize {
        self.reports.iter().map(|report| report.entries.len()).sum()
    }

    pub fn failed_targets(&self) -> impl Iterator<Item = &TargetReport> {
        self.reports.iter().filter(|report| !report.status.is_ok())
    }
}
