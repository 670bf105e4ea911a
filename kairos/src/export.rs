//! Plain-text session reports and the files they are written to.

use crate::model::Session;
use chrono::{Duration, Local};
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("An export is already in progress")]
    InProgress,

    #[error("Session {0} not found")]
    UnknownSession(Uuid),

    #[error("No sessions to export")]
    NothingToExport,

    #[error("No export directory available")]
    NoExportDir,

    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// `"<H>h <M>m"`
pub fn format_hours_minutes(duration: Duration) -> String {
    let minutes = duration.num_minutes().max(0);
    format!("{}h {}m", minutes / 60, minutes % 60)
}

fn or_default<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

pub fn session_document(session: &Session) -> String {
    let mut doc = String::new();
    let _ = writeln!(doc, "Kairos Session Report");
    let _ = writeln!(doc, "Date: {}", session.start_time.format("%B %-d, %Y"));
    let _ = writeln!(
        doc,
        "Total Work Time: {}",
        format_hours_minutes(session.total_work_duration())
    );

    for (i, wp) in session.work_periods.iter().enumerate() {
        let end = wp
            .end_time
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".to_string());
        let _ = writeln!(doc);
        let _ = writeln!(
            doc,
            "Work Period {} ({} - {}, {} min)",
            i + 1,
            wp.start_time.format("%H:%M"),
            end,
            wp.duration().num_minutes()
        );
        let _ = writeln!(doc, "Task: {}", or_default(&wp.task_description, "Not specified"));
        let _ = writeln!(doc, "Accomplishments:");
        let _ = writeln!(doc, "{}", or_default(&wp.input, "No notes recorded"));
        let _ = writeln!(doc, "Break Feedback:");
        let _ = writeln!(doc, "{}", or_default(&wp.break_feedback, "None"));
        let _ = writeln!(doc, "AI Insights:");
        let _ = writeln!(doc, "{}", or_default(&wp.ai_response, "None"));
    }

    let _ = writeln!(doc);
    let _ = writeln!(doc, "AI Report:");
    let _ = writeln!(doc, "{}", or_default(&session.ai_report, "No report generated"));
    doc
}

pub fn sessions_document(sessions: &[Session]) -> String {
    sessions
        .iter()
        .map(session_document)
        .collect::<Vec<_>>()
        .join("\n---\n\n")
}

/// Local summary used when no report could be generated.
pub fn synthesize_report(session: &Session) -> String {
    let count = session.work_periods.len();
    let minutes = session.total_work_duration().num_minutes();
    let mut report = format!(
        "You completed {} work period{} totaling {} minutes.",
        count,
        if count == 1 { "" } else { "s" },
        minutes
    );

    let mut tasks: Vec<&str> = Vec::new();
    for wp in &session.work_periods {
        let task = wp.task_description.trim();
        if !task.is_empty() && !tasks.contains(&task) {
            tasks.push(task);
        }
    }
    if !tasks.is_empty() {
        let _ = write!(report, " Tasks: {}.", tasks.join(", "));
    }

    let notes = session
        .work_periods
        .iter()
        .filter(|wp| !wp.input.trim().is_empty())
        .count();
    if notes > 0 {
        let _ = write!(report, " You recorded accomplishments for {} of them.", notes);
    }
    report
}

pub fn session_file_name(session: &Session) -> String {
    let id = session.id.simple().to_string();
    format!(
        "kairos-session-{}-{}.txt",
        session.start_time.format("%Y-%m-%d"),
        &id[..8]
    )
}

pub fn all_sessions_file_name() -> String {
    format!("kairos-sessions-{}.txt", Local::now().format("%Y%m%d-%H%M%S"))
}

/// Writes `contents` to `dir/file_name`, creating `dir` as needed.
pub fn write_document(dir: &Path, file_name: &str, contents: &str) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(file_name);
    fs::write(&path, contents).map_err(|source| ExportError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkPeriod;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> chrono::DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, h, m, 0).single().unwrap()
    }

    fn sample_session() -> Session {
        let mut session = Session::start("You: I'm working on the report".into());
        session.start_time = at(9, 0);

        let mut first = WorkPeriod::open("the quarterly report".into());
        first.start_time = at(9, 0);
        first.end_time = Some(at(9, 25));
        first.input = "Outlined sections".into();
        first.break_feedback = "Felt focused".into();
        first.ai_response = "Keep it up".into();

        let mut second = WorkPeriod::open(String::new());
        second.start_time = at(9, 55);
        second.end_time = Some(at(10, 40));

        session.work_periods = vec![first, second];
        session.end_time = Some(at(11, 0));
        session
    }

    #[test]
    fn hours_and_minutes() {
        assert_eq!(format_hours_minutes(Duration::minutes(70)), "1h 10m");
        assert_eq!(format_hours_minutes(Duration::seconds(59)), "0h 0m");
    }

    #[test]
    fn document_follows_template() {
        let doc = session_document(&sample_session());
        let expected = "\
Kairos Session Report
Date: March 5, 2024
Total Work Time: 1h 10m

Work Period 1 (09:00 - 09:25, 25 min)
Task: the quarterly report
Accomplishments:
Outlined sections
Break Feedback:
Felt focused
AI Insights:
Keep it up

Work Period 2 (09:55 - 10:40, 45 min)
Task: Not specified
Accomplishments:
No notes recorded
Break Feedback:
None
AI Insights:
None

AI Report:
No report generated
";
        assert_eq!(doc, expected);
    }

    #[test]
    fn all_sessions_are_separated() {
        let doc = sessions_document(&[sample_session(), sample_session()]);
        assert_eq!(doc.matches("Kairos Session Report").count(), 2);
        assert!(doc.contains("\n---\n"));
    }

    #[test]
    fn synthesized_report_summarizes_periods() {
        let report = synthesize_report(&sample_session());
        assert_eq!(
            report,
            "You completed 2 work periods totaling 70 minutes. Tasks: the quarterly report. \
             You recorded accomplishments for 1 of them."
        );
    }

    #[test]
    fn writes_into_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("exports");
        let path = write_document(&target, "report.txt", "hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        assert!(file_url(&path).starts_with("file://"));
    }
}
