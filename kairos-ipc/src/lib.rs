//! Inter-process communication between kairos and kairosctl
//!
//! We use Unix domain sockets for local IPC. Each connection carries exactly
//! one newline-terminated JSON `Command`; the daemon answers with a single
//! JSON `Response` and closes its half of the stream.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/kairos.sock";

/// Commands that kairosctl can send to kairos
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Stop,
    Reset,
    Status,
    SubmitNarration { text: String },
    SkipNarration,
    VoiceUtterance { text: String },
    SubmitWorkInput { text: String },
    SubmitBreakFeedback { text: String },
    DismissMessage,
    GetSettings,
    UpdateSettings(TimerSettings),
    ListSessions,
    ShowSession { id: String },
    ExportSession { id: String },
    ExportAll,
    ExportStatus,
    DeleteSession { id: String },
    DeleteAll,
    AiStatus,
}

/// Responses from kairos back to kairosctl
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Status(TimerStatus),
    Settings(TimerSettings),
    Sessions(Vec<SessionSummary>),
    Session(SessionDetail),
    Export(ExportStatus),
    Ai(AiStatus),
    Error(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Phase {
    Work,
    Delay,
    ShortBreak,
    LongBreak,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Work => "Work",
            Phase::Delay => "Delay",
            Phase::ShortBreak => "Short Break",
            Phase::LongBreak => "Long Break",
        }
    }

    pub fn is_break(&self) -> bool {
        matches!(self, Phase::ShortBreak | Phase::LongBreak)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Running,
    Paused,
    /// The pre-phase gate is waiting for task narration.
    AwaitingNarration { voice: bool },
    /// A work phase ran out and its post-period narration is pending.
    AwaitingWorkInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerStatus {
    pub phase: Phase,
    pub state: TimerState,
    pub time_remaining: u64, // seconds
    pub phase_total: u64,    // seconds
    pub current_cycle: u32,
    pub cycles_before_long_break: u32,
    pub task_description: String,
    pub ai_message: Option<String>,
    pub show_ai_reminder: bool,
    pub feedback_open: bool,
    pub active_session: Option<String>,
}

/// Durations and behavior flags for the cycle engine.
///
/// Persisted under the `timerSettings` key; the camelCase field names are a
/// stable schema and every missing field falls back to its default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct TimerSettings {
    pub work_minutes: u32,
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
    pub cycles_before_long_break: u32,
    pub delay_seconds: u32,
    pub use_voice_interaction: bool,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            work_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            cycles_before_long_break: 4,
            delay_seconds: 30,
            use_voice_interaction: false,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
}

impl TimerSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (name, value) in self.fields() {
            if value == 0 {
                return Err(SettingsError::NotPositive(name));
            }
        }
        Ok(())
    }

    /// Replaces every non-positive value with its default.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.work_minutes == 0 {
            self.work_minutes = defaults.work_minutes;
        }
        if self.short_break_minutes == 0 {
            self.short_break_minutes = defaults.short_break_minutes;
        }
        if self.long_break_minutes == 0 {
            self.long_break_minutes = defaults.long_break_minutes;
        }
        if self.cycles_before_long_break == 0 {
            self.cycles_before_long_break = defaults.cycles_before_long_break;
        }
        if self.delay_seconds == 0 {
            self.delay_seconds = defaults.delay_seconds;
        }
        self
    }

    /// Length of a phase in seconds.
    pub fn phase_seconds(&self, phase: Phase) -> u64 {
        match phase {
            Phase::Work => u64::from(self.work_minutes) * 60,
            Phase::ShortBreak => u64::from(self.short_break_minutes) * 60,
            Phase::LongBreak => u64::from(self.long_break_minutes) * 60,
            Phase::Delay => u64::from(self.delay_seconds),
        }
    }

    fn fields(&self) -> [(&'static str, u32); 5] {
        [
            ("workMinutes", self.work_minutes),
            ("shortBreakMinutes", self.short_break_minutes),
            ("longBreakMinutes", self.long_break_minutes),
            ("cyclesBeforeLongBreak", self.cycles_before_long_break),
            ("delaySeconds", self.delay_seconds),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub started_at: DateTime<Local>,
    pub ended_at: Option<DateTime<Local>>,
    pub work_periods: usize,
    pub total_work_secs: i64,
    pub has_report: bool,
    pub export_link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkPeriodDetail {
    pub id: String,
    pub started_at: DateTime<Local>,
    pub ended_at: Option<DateTime<Local>>,
    pub task_description: String,
    pub input: String,
    pub break_feedback: String,
    pub ai_response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub summary: SessionSummary,
    pub seed_narration: String,
    pub ai_report: String,
    pub periods: Vec<WorkPeriodDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportStatus {
    pub is_exporting: bool,
    pub export_error: Option<String>,
    pub export_success: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiStatus {
    pub online: bool,
    pub is_loading: bool,
    pub last_error: Option<String>,
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused - is kairos running?")]
    ConnectionRefused,

    #[error("Empty response from kairos")]
    EmptyResponse,
}

/// Sends one command and waits for the daemon's response.
pub async fn send_command(socket_path: &Path, command: &Command) -> Result<Response, IpcError> {
    let mut stream = UnixStream::connect(socket_path).await.map_err(|e| {
        if matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound
        ) {
            IpcError::ConnectionRefused
        } else {
            IpcError::Io(e)
        }
    })?;

    let msg = serde_json::to_vec(command)?;
    stream.write_all(&msg).await?;
    stream.write_all(b"\n").await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    if buf.iter().all(u8::is_ascii_whitespace) {
        return Err(IpcError::EmptyResponse);
    }
    Ok(serde_json::from_slice(&buf)?)
}
