//! Per-run audit reporting.
//!
//! A [`RunReporter`] collects structured action and error records while a run
//! progresses, mirrors every record as a timestamped trace line (also emitted
//! through `tracing`), and on [`finish`](RunReporter::finish) writes
//! `<report_dir>/<YYYY-MM-DD>/<run_id>.json` plus the matching `.txt` trace.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{LabelDelta, ThreadId};

/// Subject characters shown in trace lines.
const TRACE_SUBJECT_CHARS: usize = 30;

/// Errors writing a report to disk.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("report serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// The scheduler loop.
    Scheduler,
    /// A person on the command line.
    Manual,
    /// A tool wrapper that reads the JSON report from stdout.
    #[serde(rename = "mcp_call")]
    Mcp,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Scheduler => "scheduler",
            Trigger::Manual => "manual",
            Trigger::Mcp => "mcp_call",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stage an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Fetch,
    Parse,
    Validation,
    Llm,
    Apply,
    /// Not tied to a thread (label or candidate listing).
    Run,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Fetch => "fetch",
            ErrorKind::Parse => "parse",
            ErrorKind::Validation => "validation",
            ErrorKind::Llm => "llm",
            ErrorKind::Apply => "apply",
            ErrorKind::Run => "run",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labels decided for one classified thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub timestamp: DateTime<Utc>,
    pub thread_id: ThreadId,
    pub subject: String,
    pub labels_added: Vec<String>,
    pub labels_removed: Vec<String>,
    pub labels_kept: Vec<String>,
    /// Labels the classification called for that the mailbox does not have.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels_unresolved: Vec<String>,
    pub classification_reason: String,
}

/// A failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    /// `None` for run-level failures.
    pub thread_id: Option<ThreadId>,
    pub error_kind: ErrorKind,
    pub error: String,
    /// Whether the thread was left untouched.
    pub skipped: bool,
}

/// Run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub threads_scanned: usize,
    pub threads_modified: usize,
    pub threads_skipped: usize,
    pub threads_requiring_follow_up: usize,
    pub errors: usize,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned={} modified={} skipped={} follow_up={} errors={}",
            self.threads_scanned,
            self.threads_modified,
            self.threads_skipped,
            self.threads_requiring_follow_up,
            self.errors
        )
    }
}

/// The finalized, machine-readable record of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub triggered_by: Trigger,
    pub taxonomy_version: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub stats: RunStats,
    pub actions_required: Vec<ActionRecord>,
    pub errors: Vec<ErrorRecord>,
    pub summary: String,
    /// Where the JSON report was written, if persisting succeeded.
    #[serde(skip)]
    pub report_path: Option<PathBuf>,
}

/// Accumulates one run's records. Owned by the run coordinator.
pub struct RunReporter {
    run_id: String,
    trigger: Trigger,
    taxonomy_version: u32,
    started_at: DateTime<Utc>,
    started: Instant,
    report_dir: PathBuf,
    actions: Vec<ActionRecord>,
    errors: Vec<ErrorRecord>,
    trace: Vec<String>,
}

impl RunReporter {
    /// Starts a run with a fresh run id.
    pub fn new(trigger: Trigger, taxonomy_version: u32, report_dir: impl Into<PathBuf>) -> Self {
        let mut reporter = Self {
            run_id: Uuid::new_v4().to_string(),
            trigger,
            taxonomy_version,
            started_at: Utc::now(),
            started: Instant::now(),
            report_dir: report_dir.into(),
            actions: Vec::new(),
            errors: Vec::new(),
            trace: Vec::new(),
        };
        let line = format!(
            "RUN STARTED | run_id={} | triggered_by={}",
            reporter.run_id, trigger
        );
        reporter.log(line);
        reporter
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    /// Appends a timestamped trace line.
    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(run_id = %self.run_id, "{}", message);
        self.push_trace(message);
    }

    /// Records the labels actually changed on a classified thread.
    ///
    /// `applied` is what reached the mailbox; `unresolved` holds target
    /// changes that were dropped because the mailbox has no such label.
    pub fn log_action(
        &mut self,
        thread_id: &ThreadId,
        subject: &str,
        applied: &LabelDelta,
        kept: &BTreeSet<String>,
        unresolved: &BTreeSet<String>,
        reason: &str,
    ) {
        self.actions.push(ActionRecord {
            timestamp: Utc::now(),
            thread_id: thread_id.clone(),
            subject: subject.to_string(),
            labels_added: applied.to_add.iter().cloned().collect(),
            labels_removed: applied.to_remove.iter().cloned().collect(),
            labels_kept: kept.iter().cloned().collect(),
            labels_unresolved: unresolved.iter().cloned().collect(),
            classification_reason: reason.to_string(),
        });

        let mut line = format!(
            "THREAD | id={} | subject=\"{}\" | added={} | removed={}",
            thread_id,
            shorten(subject),
            join_or_none(&applied.to_add),
            join_or_none(&applied.to_remove)
        );
        if !unresolved.is_empty() {
            line.push_str(&format!(" | unresolved={}", join_or_none(unresolved)));
        }
        self.log(line);
    }

    /// Records a failure. `thread_id` is `None` for run-level failures.
    pub fn log_error(
        &mut self,
        thread_id: Option<&ThreadId>,
        kind: ErrorKind,
        error: &dyn fmt::Display,
    ) {
        let error = error.to_string();
        let thread = thread_id.map_or_else(|| "-".to_string(), ToString::to_string);

        tracing::warn!(
            run_id = %self.run_id,
            thread_id = %thread,
            kind = %kind,
            error = %error,
            "Run error recorded"
        );
        self.push_trace(format!(
            "ERROR | thread={} | kind={} | msg={}",
            thread, kind, error
        ));

        self.errors.push(ErrorRecord {
            timestamp: Utc::now(),
            thread_id: thread_id.cloned(),
            error_kind: kind,
            error,
            skipped: true,
        });
    }

    /// Finalizes the run and persists it.
    ///
    /// A write failure is logged and the report is still returned, with
    /// `report_path` left empty.
    pub async fn finish(mut self, stats: RunStats) -> RunReport {
        let finished_at = Utc::now();
        let duration_ms = self.started.elapsed().as_millis() as u64;
        let summary = stats.to_string();

        self.log(format!(
            "RUN COMPLETE | duration={}ms | {}",
            duration_ms, summary
        ));

        let mut report = RunReport {
            run_id: self.run_id.clone(),
            triggered_by: self.trigger,
            taxonomy_version: self.taxonomy_version,
            started_at: self.started_at,
            finished_at,
            duration_ms,
            stats,
            actions_required: std::mem::take(&mut self.actions),
            errors: std::mem::take(&mut self.errors),
            summary,
            report_path: None,
        };

        match write_report(&self.report_dir, &report, &self.trace).await {
            Ok(path) => {
                tracing::info!(run_id = %report.run_id, path = %path.display(), "Run report written");
                report.report_path = Some(path);
            }
            Err(e) => {
                tracing::error!(run_id = %report.run_id, error = %e, "Failed to write run report");
            }
        }

        report
    }

    fn push_trace(&mut self, message: String) {
        let stamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        self.trace.push(format!("[{}] {}", stamp, message));
    }
}

/// Writes the JSON report and text trace; returns the JSON path.
pub async fn write_report(
    report_dir: &Path,
    report: &RunReport,
    trace: &[String],
) -> Result<PathBuf, ReportError> {
    let day_dir = report_dir.join(report.started_at.format("%Y-%m-%d").to_string());
    tokio::fs::create_dir_all(&day_dir).await?;

    let json_path = day_dir.join(format!("{}.json", report.run_id));
    let txt_path = day_dir.join(format!("{}.txt", report.run_id));

    let json = serde_json::to_string_pretty(report)?;
    tokio::fs::write(&json_path, json).await?;

    let mut text = trace.join("\n");
    text.push('\n');
    tokio::fs::write(&txt_path, text).await?;

    Ok(json_path)
}

fn shorten(subject: &str) -> String {
    if subject.chars().count() > TRACE_SUBJECT_CHARS {
        let head: String = subject.chars().take(TRACE_SUBJECT_CHARS).collect();
        format!("{}...", head)
    } else {
        subject.to_string()
    }
}

fn join_or_none(labels: &BTreeSet<String>) -> String {
    if labels.is_empty() {
        "None".to_string()
    } else {
        labels.iter().cloned().collect::<Vec<_>>().join(",")
    }
}
