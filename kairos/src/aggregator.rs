//! Groups completed work periods into sessions and is the only writer of
//! the `savedSessions` key.

use crate::ai::prompts;
use crate::config::{OrphanPolicy, SessionConfig};
use crate::events::BreakFeedback;
use crate::export::{self, ExportError};
use crate::model::{Session, WorkPeriod};
use crate::store::{KeyValueStore, SESSIONS_KEY};
use chrono::Local;
use kairos_ipc::{ExportStatus, SessionDetail, SessionSummary};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("No active session")]
    NoActiveSession,

    #[error("Session {0} is already active")]
    AlreadyActive(Uuid),
}

/// How a completed work period found its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Healed {
    NotNeeded,
    /// There was no active session; one was created for the period.
    SessionCreated,
}

/// A finalized session waiting for its report.
#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub session_id: Uuid,
    pub prompt: String,
    pub fallback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportTarget {
    Session(Uuid),
    All,
}

/// A document ready to be written outside the runtime.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub generation: u64,
    pub target: ExportTarget,
    pub dir: PathBuf,
    pub file_name: String,
    pub contents: String,
}

pub struct SessionAggregator {
    store: Box<dyn KeyValueStore>,
    config: SessionConfig,
    export_dir: Option<PathBuf>,
    sessions: Vec<Session>,
    current: Option<Uuid>,
    /// The active session was deleted while its chain kept running.
    current_deleted: bool,
    export: ExportStatus,
    export_generation: u64,
    last_persist_error: Option<String>,
}

impl SessionAggregator {
    pub fn load(
        store: Box<dyn KeyValueStore>,
        config: SessionConfig,
        export_dir: Option<PathBuf>,
    ) -> Self {
        let sessions = match store.get(SESSIONS_KEY) {
            Ok(Some(json)) => decode_sessions(&json),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read saved sessions, starting fresh: {}", e);
                Vec::new()
            }
        };

        let mut aggregator = Self {
            store,
            config,
            export_dir,
            sessions,
            current: None,
            current_deleted: false,
            export: ExportStatus::default(),
            export_generation: 0,
            last_persist_error: None,
        };
        aggregator.restore_open_session();
        info!(
            sessions = aggregator.sessions.len(),
            restored = aggregator.current.is_some(),
            "Sessions loaded"
        );
        aggregator
    }

    /// Restores the interrupted session, if any. Extra open sessions are
    /// finalized with a local report.
    fn restore_open_session(&mut self) {
        let newest = self
            .sessions
            .iter()
            .filter(|s| !s.is_completed())
            .max_by_key(|s| s.start_time)
            .map(|s| s.id);
        let Some(newest) = newest else {
            return;
        };

        let mut finalized = 0;
        for session in self
            .sessions
            .iter_mut()
            .filter(|s| !s.is_completed() && s.id != newest)
        {
            let end = session
                .work_periods
                .iter()
                .filter_map(|wp| wp.end_time)
                .max()
                .unwrap_or(session.start_time);
            session.end_time = Some(end);
            if session.ai_report.is_empty() {
                session.ai_report = export::synthesize_report(session);
            }
            finalized += 1;
        }
        if finalized > 0 {
            warn!(
                count = finalized,
                kept = %newest,
                "Found more than one open session; finalized the older ones"
            );
            self.persist();
        }

        self.current = Some(newest);
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn current_session(&self) -> Option<&Session> {
        let id = self.current?;
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn current_id(&self) -> Option<Uuid> {
        self.current
    }

    pub fn session(&self, id: Uuid) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.sessions.iter().map(Session::summary).collect()
    }

    pub fn detail(&self, id: Uuid) -> Option<SessionDetail> {
        self.session(id).map(Session::detail)
    }

    pub fn export_status(&self) -> ExportStatus {
        self.export.clone()
    }

    pub fn export_success_clear_after(&self) -> Duration {
        Duration::from_secs(self.config.export_success_clear_secs)
    }

    pub fn last_persist_error(&self) -> Option<&str> {
        self.last_persist_error.as_deref()
    }

    pub fn start_new_session(&mut self, seed_narration: String) -> Result<Uuid, SessionError> {
        if let Some(id) = self.current {
            return Err(SessionError::AlreadyActive(id));
        }
        let session = Session::start(seed_narration);
        let id = session.id;
        self.sessions.push(session);
        self.current = Some(id);
        self.current_deleted = false;
        info!(%id, "Session started");
        self.persist();
        Ok(id)
    }

    pub fn on_work_period_completed(&mut self, wp: WorkPeriod) -> Result<Healed, SessionError> {
        let mut healed = Healed::NotNeeded;
        if self.current.is_none() {
            error!(work_period = %wp.id, "Work period completed with no active session");
            // Only deleting the active session mid-chain may orphan a period.
            debug_assert!(
                self.current_deleted,
                "work period {} completed with no active session",
                wp.id
            );
            match self.config.orphan_policy {
                OrphanPolicy::Reject => return Err(SessionError::NoActiveSession),
                OrphanPolicy::AutoCreate => {
                    self.start_new_session(String::new())?;
                    healed = Healed::SessionCreated;
                }
            }
        }

        let session = self.current_mut().ok_or(SessionError::NoActiveSession)?;
        debug!(session = %session.id, work_period = %wp.id, "Appending work period");
        session.work_periods.push(wp);
        self.persist();
        Ok(healed)
    }

    /// Records feedback on a work period of the active session. Finalized
    /// sessions are left alone; returns whether a period was updated.
    pub fn on_break_feedback_received(&mut self, feedback: BreakFeedback) -> bool {
        let Some(wp) = self
            .current_mut()
            .and_then(|s| s.work_period_mut(feedback.work_period_id))
        else {
            debug!(work_period = %feedback.work_period_id, "Break feedback outside the active session");
            return false;
        };
        wp.break_feedback = feedback.feedback;
        wp.ai_response = feedback.ai_response;
        self.persist();
        true
    }

    /// Adds the narration of a chain started inside the active session.
    pub fn append_seed_narration(&mut self, narration: &str) -> bool {
        let narration = narration.trim();
        if narration.is_empty() {
            return false;
        }
        let Some(session) = self.current_mut() else {
            return false;
        };
        if !session.seed_narration.is_empty() {
            session.seed_narration.push_str("\n\n");
        }
        session.seed_narration.push_str(narration);
        self.persist();
        true
    }

    /// Finalizes the active session. The report is attached later.
    pub fn complete_current_session(&mut self) -> Result<ReportRequest, SessionError> {
        let session = self.current_mut().ok_or(SessionError::NoActiveSession)?;
        session.end_time = Some(Local::now());
        let request = ReportRequest {
            session_id: session.id,
            prompt: prompts::session_report(session),
            fallback: export::synthesize_report(session),
        };
        info!(
            id = %session.id,
            work_periods = session.work_periods.len(),
            "Session completed"
        );
        self.current = None;
        self.persist();
        Ok(request)
    }

    pub fn attach_report(&mut self, session_id: Uuid, report: String) -> bool {
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == session_id) else {
            debug!(%session_id, "Report for a deleted session");
            return false;
        };
        session.ai_report = report;
        self.persist();
        true
    }

    pub fn export_session(&mut self, id: Uuid) -> Result<ExportJob, ExportError> {
        if self.export.is_exporting {
            return Err(ExportError::InProgress);
        }
        let session = self.session(id).ok_or(ExportError::UnknownSession(id))?;
        let file_name = export::session_file_name(session);
        let contents = export::session_document(session);
        self.begin_export(ExportTarget::Session(id), file_name, contents)
    }

    pub fn export_all(&mut self) -> Result<ExportJob, ExportError> {
        if self.export.is_exporting {
            return Err(ExportError::InProgress);
        }
        if self.sessions.is_empty() {
            return Err(ExportError::NothingToExport);
        }
        let contents = export::sessions_document(&self.sessions);
        self.begin_export(ExportTarget::All, export::all_sessions_file_name(), contents)
    }

    fn begin_export(
        &mut self,
        target: ExportTarget,
        file_name: String,
        contents: String,
    ) -> Result<ExportJob, ExportError> {
        let dir = self.export_dir.clone().ok_or(ExportError::NoExportDir)?;
        self.export_generation += 1;
        self.export = ExportStatus {
            is_exporting: true,
            export_error: None,
            export_success: false,
        };
        Ok(ExportJob {
            generation: self.export_generation,
            target,
            dir,
            file_name,
            contents,
        })
    }

    /// Records the outcome of an export job. Returns the generation to clear
    /// the success flag for, on success.
    pub fn finish_export(
        &mut self,
        generation: u64,
        target: ExportTarget,
        result: Result<PathBuf, ExportError>,
    ) -> Option<u64> {
        if generation != self.export_generation || !self.export.is_exporting {
            return None;
        }
        self.export.is_exporting = false;

        match result {
            Ok(path) => {
                info!(path = %path.display(), "Export written");
                self.export.export_success = true;
                if let ExportTarget::Session(id) = target {
                    if let Some(session) = self.sessions.iter_mut().find(|s| s.id == id) {
                        session.export_link = export::file_url(&path);
                        self.persist();
                    }
                }
                Some(generation)
            }
            Err(e) => {
                error!("Export failed: {}", e);
                self.export.export_error = Some(e.to_string());
                None
            }
        }
    }

    pub fn clear_export_success(&mut self, generation: u64) {
        if generation == self.export_generation && !self.export.is_exporting {
            self.export.export_success = false;
        }
    }

    pub fn delete_session(&mut self, id: Uuid) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        if self.sessions.len() == before {
            return false;
        }
        if self.current == Some(id) {
            self.current = None;
            self.current_deleted = true;
        }
        info!(%id, "Session deleted");
        self.persist();
        true
    }

    pub fn delete_all(&mut self) {
        self.sessions.clear();
        self.current_deleted |= self.current.take().is_some();
        match self.store.remove(SESSIONS_KEY) {
            Ok(()) => self.last_persist_error = None,
            Err(e) => {
                error!("Failed to clear saved sessions: {}", e);
                self.last_persist_error = Some(e.to_string());
            }
        }
        info!("All sessions deleted");
    }

    fn current_mut(&mut self) -> Option<&mut Session> {
        let id = self.current?;
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    fn persist(&mut self) {
        let result = serde_json::to_string_pretty(&self.sessions)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                self.store
                    .set(SESSIONS_KEY, &json)
                    .map_err(|e| e.to_string())
            });
        match result {
            Ok(()) => self.last_persist_error = None,
            Err(e) => {
                error!("Failed to save sessions: {}", e);
                self.last_persist_error = Some(e);
            }
        }
    }
}

/// Decodes the saved array element by element, skipping what cannot be read.
fn decode_sessions(json: &str) -> Vec<Session> {
    let values: Vec<serde_json::Value> = match serde_json::from_str(json) {
        Ok(values) => values,
        Err(e) => {
            warn!("Ignoring unreadable saved sessions: {}", e);
            return Vec::new();
        }
    };
    values
        .into_iter()
        .enumerate()
        .filter_map(|(i, value)| match serde_json::from_value::<Session>(value) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(index = i, "Skipping unreadable session: {}", e);
                None
            }
        })
        .collect()
}
