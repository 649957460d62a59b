use anyhow::Context;
use chrono::{DateTime, Local};
use crontab_collector::{RunOutcome, RunReport, TargetReport, TargetStatus};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use uuid::Uuid;

use crate::cli::ReportFormat;

pub(crate) const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReportMeta {
    pub(crate) run_id: Uuid,
    pub(crate) created_at: DateTime<Local>,
    pub(crate) version: &'static str,
}

impl ReportMeta {
    pub(crate) fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            created_at: Local::now(),
            version: VERSION,
        }
    }

    fn creation_time(&self) -> String {
        self.created_at.format("%Y-%m-%d %H:%M %Z").to_string()
    }
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    #[serde(flatten)]
    meta: &'a ReportMeta,
    #[serde(flatten)]
    report: &'a RunReport,
}

pub(crate) fn render(
    report: &RunReport,
    format: ReportFormat,
    meta: &ReportMeta,
) -> anyhow::Result<String> {
    match format {
        ReportFormat::Html => Ok(render_html(report, meta)),
        ReportFormat::Text => Ok(render_text(report, meta)),
        ReportFormat::Json => {
            let mut json = serde_json::to_string_pretty(&JsonDocument { meta, report })
                .context("failed to serialize report")?;
            json.push('\n');
            Ok(json)
        }
    }
}

/// Replaces the report at `path` in one step so readers never see a partial
/// file. `-` writes to stdout instead.
pub(crate) fn write_report(path: &Path, contents: &str) -> anyhow::Result<()> {
    if path == Path::new("-") {
        print!("{contents}");
        return Ok(());
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("invalid output path {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, contents).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move report into {}", path.display()))?;
    Ok(())
}

fn status_label(status: &TargetStatus) -> String {
    match status {
        TargetStatus::Ok => "ok".to_string(),
        TargetStatus::TransportError { message } => format!("unreachable: {message}"),
        TargetStatus::ParseError { message, .. } => format!("unreadable crontab: {message}"),
    }
}

fn outcome_note(report: &RunReport) -> Option<String> {
    match report.outcome {
        RunOutcome::TimedOut => Some(format!(
            "Timeout: only {} of {} servers answered.",
            report.received, report.expected
        )),
        RunOutcome::Incomplete => Some(format!(
            "Incomplete: only {} of {} servers answered.",
            report.received, report.expected
        )),
        RunOutcome::Complete | RunOutcome::NothingToReport => None,
    }
}

fn render_text(report: &RunReport, meta: &ReportMeta) -> String {
    let mut out = String::new();
    for target in &report.reports {
        let _ = writeln!(out, "{} ({})", target.host, target.user);
        if !target.status.is_ok() {
            let _ = writeln!(out, "  {}", status_label(&target.status));
        }
        let width = target
            .entries
            .iter()
            .map(|entry| entry.schedule.len())
            .max()
            .unwrap_or(0);
        for entry in &target.entries {
            let _ = writeln!(
                out,
                "  {:<width$}  {:<16}  {}",
                entry.schedule,
                entry.next_run.to_string(),
                entry.command,
            );
        }
        out.push('\n');
    }
    if let Some(note) = outcome_note(report) {
        let _ = writeln!(out, "{note}");
    }
    let _ = writeln!(
        out,
        "created {} by cron-overview v{}",
        meta.creation_time(),
        meta.version
    );
    out
}

fn render_html(report: &RunReport, meta: &ReportMeta) -> String {
    let mut out = String::new();
    out.push_str(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Cron overview</title>\n",
    );
    out.push_str(
        "<style>body{font-family:sans-serif}table{border-collapse:collapse}\
td,th{border:1px solid #ccc;padding:2px 8px;text-align:left}\
code{white-space:pre}.error{color:#b00}</style>\n</head>\n<body>\n<h1>Cron overview</h1>\n",
    );
    if let Some(note) = outcome_note(report) {
        let _ = writeln!(out, "<p class=\"error\">{}</p>", escape_html(&note));
    }
    for target in &report.reports {
        render_html_target(&mut out, target);
    }
    let _ = writeln!(
        out,
        "<footer>created {} by cron-overview v{}</footer>\n</body>\n</html>",
        escape_html(&meta.creation_time()),
        escape_html(meta.version)
    );
    out
}

fn render_html_target(out: &mut String, target: &TargetReport) {
    let _ = writeln!(
        out,
        "<h2>{} <small>({})</small></h2>",
        escape_html(&target.host),
        escape_html(&target.user)
    );
    if !target.status.is_ok() {
        let _ = writeln!(
            out,
            "<p class=\"error\">{}</p>",
            escape_html(&status_label(&target.status))
        );
        return;
    }
    if target.entries.is_empty() {
        out.push_str("<p>No cron entries.</p>\n");
        return;
    }
    out.push_str("<table>\n<tr><th>Schedule</th><th>Next run</th><th>Command</th></tr>\n");
    for entry in &target.entries {
        let _ = writeln!(
            out,
            "<tr><td><code>{}</code></td><td>{}</td><td><code>{}</code></td></tr>",
            escape_html(&entry.schedule),
            escape_html(&entry.next_run.to_string()),
            escape_html(&entry.command)
        );
    }
    out.push_str("</table>\n");
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
