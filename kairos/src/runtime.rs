//! The single owner of timer, session and settings state.
//!
//! Ticks, IPC commands and every asynchronous completion arrive as
//! `RuntimeMsg`s on one channel and are applied one at a time, so no two
//! mutations ever interleave. AI calls, report generation and export writes
//! run on spawned tasks and post their results back here.

use crate::aggregator::{ExportJob, ExportTarget, Healed, SessionAggregator, SessionError};
use crate::ai::AiTextService;
use crate::engine::{AiTicket, CycleEngine, Effect};
use crate::events::DomainEvent;
use crate::export::{self, ExportError};
use crate::notify::Notifier;
use crate::settings::SettingsStore;
use anyhow::{anyhow, Result};
use kairos_ipc::{Command, Response};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum RuntimeMsg {
    Tick,
    Command {
        command: Command,
        reply: oneshot::Sender<Response>,
    },
    AiResolved {
        ticket: AiTicket,
        text: String,
    },
    ReportReady {
        session_id: Uuid,
        report: String,
    },
    ExportFinished {
        generation: u64,
        target: ExportTarget,
        result: Result<PathBuf, ExportError>,
    },
    ClearExportSuccess {
        generation: u64,
    },
}

/// Cloneable sender used by the IPC server.
#[derive(Clone)]
pub struct RuntimeHandle {
    tx: mpsc::Sender<RuntimeMsg>,
}

impl RuntimeHandle {
    pub async fn request(&self, command: Command) -> Result<Response> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RuntimeMsg::Command { command, reply })
            .await
            .map_err(|_| anyhow!("runtime is not running"))?;
        rx.await.map_err(|_| anyhow!("runtime dropped the request"))
    }
}

pub struct Runtime {
    engine: CycleEngine,
    sessions: SessionAggregator,
    settings: SettingsStore,
    ai: AiTextService,
    notifier: Arc<dyn Notifier>,
    tx: mpsc::Sender<RuntimeMsg>,
    rx: mpsc::Receiver<RuntimeMsg>,
    /// Outstanding AI requests, flagged when they survive phase changes.
    in_flight: Vec<(bool, JoinHandle<()>)>,
}

impl Runtime {
    pub fn new(
        mut engine: CycleEngine,
        sessions: SessionAggregator,
        settings: SettingsStore,
        ai: AiTextService,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        if let Some(session) = sessions.current_session() {
            info!(id = %session.id, "Resuming interrupted session");
            engine.restore_session_narration(&session.seed_narration);
        }
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            engine,
            sessions,
            settings,
            ai,
            notifier,
            tx,
            rx,
            in_flight: Vec::new(),
        }
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn engine(&self) -> &CycleEngine {
        &self.engine
    }

    pub fn sessions(&self) -> &SessionAggregator {
        &self.sessions
    }

    /// Drives the runtime with a one-second tick. The runtime holds a sender
    /// of its own, so the loop never ends on its own; it runs until the task
    /// is aborted or the future dropped.
    pub async fn run(mut self) {
        let ticks = self.tx.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            loop {
                interval.tick().await;
                if ticks.send(RuntimeMsg::Tick).await.is_err() {
                    break;
                }
            }
        });

        info!("Runtime started");
        while let Some(msg) = self.rx.recv().await {
            self.dispatch(msg);
        }
        ticker.abort();
    }

    pub fn dispatch(&mut self, msg: RuntimeMsg) {
        match msg {
            RuntimeMsg::Tick => self.engine.tick(),
            RuntimeMsg::Command { command, reply } => {
                let response = self.execute(command);
                self.apply_effects();
                if reply.send(response).is_err() {
                    debug!("Client went away before the reply");
                }
                return;
            }
            RuntimeMsg::AiResolved { ticket, text } => self.engine.apply_ai_response(ticket, text),
            RuntimeMsg::ReportReady { session_id, report } => {
                self.sessions.attach_report(session_id, report);
            }
            RuntimeMsg::ExportFinished {
                generation,
                target,
                result,
            } => {
                if let Some(generation) = self.sessions.finish_export(generation, target, result) {
                    self.schedule_export_clear(generation);
                }
            }
            RuntimeMsg::ClearExportSuccess { generation } => {
                self.sessions.clear_export_success(generation)
            }
        }
        self.apply_effects();
    }

    fn execute(&mut self, command: Command) -> Response {
        debug!(?command, "Handling command");
        match command {
            Command::Start => {
                self.engine.start();
                Response::Ok
            }
            Command::Pause => {
                self.engine.pause();
                Response::Ok
            }
            Command::Resume => {
                self.engine.resume();
                Response::Ok
            }
            Command::Stop => {
                self.engine.stop();
                Response::Ok
            }
            Command::Reset => engine_reply(self.engine.reset()),
            Command::Status => Response::Status(self.engine.status(self.sessions.current_id())),
            Command::SubmitNarration { text } => engine_reply(self.engine.submit_narration(&text)),
            Command::SkipNarration => engine_reply(self.engine.skip_narration()),
            Command::VoiceUtterance { text } => engine_reply(self.engine.voice_utterance(&text)),
            Command::SubmitWorkInput { text } => {
                engine_reply(self.engine.submit_work_input(&text))
            }
            Command::SubmitBreakFeedback { text } => {
                engine_reply(self.engine.submit_break_feedback(&text))
            }
            Command::DismissMessage => {
                self.engine.dismiss_message();
                Response::Ok
            }
            Command::GetSettings => Response::Settings(self.settings.current()),
            Command::UpdateSettings(settings) => match self.settings.update(settings) {
                Ok(settings) => {
                    self.engine.update_settings(settings);
                    info!(?settings, "Settings updated");
                    Response::Settings(settings)
                }
                Err(e) => Response::Error(e.to_string()),
            },
            Command::ListSessions => Response::Sessions(self.sessions.summaries()),
            Command::ShowSession { id } => match parse_id(&id) {
                Ok(id) => match self.sessions.detail(id) {
                    Some(detail) => Response::Session(detail),
                    None => Response::Error(format!("Session {} not found", id)),
                },
                Err(response) => response,
            },
            Command::ExportSession { id } => match parse_id(&id) {
                Ok(id) => {
                    let job = self.sessions.export_session(id);
                    self.start_export(job)
                }
                Err(response) => response,
            },
            Command::ExportAll => {
                let job = self.sessions.export_all();
                self.start_export(job)
            }
            Command::ExportStatus => Response::Export(self.sessions.export_status()),
            Command::DeleteSession { id } => match parse_id(&id) {
                Ok(id) if self.sessions.delete_session(id) => Response::Ok,
                Ok(id) => Response::Error(format!("Session {} not found", id)),
                Err(response) => response,
            },
            Command::DeleteAll => {
                self.sessions.delete_all();
                Response::Ok
            }
            Command::AiStatus => Response::Ai(self.ai.status()),
        }
    }

    /// Routes everything the engine queued. Applying a domain event never
    /// produces new engine effects, so one drain is enough.
    fn apply_effects(&mut self) {
        for effect in self.engine.drain_effects() {
            match effect {
                Effect::RequestAi { ticket, prompt } => self.request_ai(ticket, prompt),
                Effect::CancelPending { detached } => self.cancel_in_flight(detached),
                Effect::Notify(notification) => self.notifier.deliver(&notification),
                Effect::Domain(event) => self.apply_domain_event(event),
            }
        }
    }

    fn apply_domain_event(&mut self, event: DomainEvent) {
        match event {
            DomainEvent::ChainStarted { narration } => {
                match self.sessions.start_new_session(narration.clone()) {
                    Ok(_) => {}
                    Err(SessionError::AlreadyActive(id)) => {
                        if self.sessions.append_seed_narration(&narration) {
                            info!(%id, "Chain restarted; narration added to the active session");
                        }
                    }
                    Err(e) => error!("Failed to start session: {}", e),
                }
            }
            DomainEvent::WorkPeriodCompleted(wp) => {
                match self.sessions.on_work_period_completed(wp) {
                    Ok(Healed::NotNeeded) => {}
                    Ok(Healed::SessionCreated) => {
                        warn!("Created a session for an orphaned work period")
                    }
                    Err(e) => error!("Work period dropped: {}", e),
                }
            }
            DomainEvent::FullCycleCompleted => match self.sessions.complete_current_session() {
                Ok(request) => {
                    let ai = self.ai.clone();
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let report = ai
                            .generate_with_fallback(&request.prompt, request.fallback)
                            .await;
                        let msg = RuntimeMsg::ReportReady {
                            session_id: request.session_id,
                            report,
                        };
                        if tx.send(msg).await.is_err() {
                            warn!("Runtime gone before the session report was ready");
                        }
                    });
                }
                Err(e) => warn!("Full cycle completed without a session: {}", e),
            },
            DomainEvent::BreakFeedbackReceived(feedback) => {
                self.sessions.on_break_feedback_received(feedback);
            }
        }
    }

    fn request_ai(&mut self, ticket: AiTicket, prompt: String) {
        self.in_flight.retain(|(_, task)| !task.is_finished());
        let detached = ticket.is_detached();
        let ai = self.ai.clone();
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            let text = ai.generate(&prompt).await;
            let _ = tx.send(RuntimeMsg::AiResolved { ticket, text }).await;
        });
        self.in_flight.push((detached, task));
    }

    fn cancel_in_flight(&mut self, include_detached: bool) {
        self.in_flight.retain(|(detached, task)| {
            if include_detached || !detached {
                task.abort();
                false
            } else {
                true
            }
        });
    }

    fn start_export(&mut self, job: Result<ExportJob, ExportError>) -> Response {
        let job = match job {
            Ok(job) => job,
            Err(e) => return Response::Error(e.to_string()),
        };
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let ExportJob {
                generation,
                target,
                dir,
                file_name,
                contents,
            } = job;
            let result = tokio::task::spawn_blocking(move || {
                export::write_document(&dir, &file_name, &contents)
            })
            .await
            .unwrap_or_else(|e| {
                Err(ExportError::Io {
                    path: PathBuf::new(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                })
            });
            let _ = tx
                .send(RuntimeMsg::ExportFinished {
                    generation,
                    target,
                    result,
                })
                .await;
        });
        Response::Export(self.sessions.export_status())
    }

    fn schedule_export_clear(&self, generation: u64) {
        let delay = self.sessions.export_success_clear_after();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(RuntimeMsg::ClearExportSuccess { generation }).await;
        });
    }
}

fn engine_reply<E: std::fmt::Display>(result: std::result::Result<(), E>) -> Response {
    match result {
        Ok(()) => Response::Ok,
        Err(e) => Response::Error(e.to_string()),
    }
}

fn parse_id(id: &str) -> std::result::Result<Uuid, Response> {
    Uuid::parse_str(id.trim()).map_err(|_| Response::Error(format!("Invalid session id: {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, SessionConfig};
    use crate::events::Notification;
    use crate::notify::{LogNotifier, MockNotifier};
    use crate::store::MemoryStore;
    use kairos_ipc::{Phase, TimerSettings, TimerState, TimerStatus};

    fn short_settings() -> TimerSettings {
        TimerSettings {
            work_minutes: 3,
            short_break_minutes: 1,
            long_break_minutes: 1,
            cycles_before_long_break: 1,
            delay_seconds: 2,
            use_voice_interaction: false,
        }
    }

    fn runtime_with(notifier: Arc<dyn Notifier>, export_dir: Option<PathBuf>) -> Runtime {
        let settings_json = serde_json::to_string(&short_settings()).unwrap();
        let settings = SettingsStore::load(Box::new(MemoryStore::with(
            crate::store::SETTINGS_KEY,
            &settings_json,
        )));
        let engine = CycleEngine::new(settings.current(), EngineConfig::default());
        let sessions = SessionAggregator::load(
            Box::new(MemoryStore::new()),
            SessionConfig::default(),
            export_dir,
        );
        Runtime::new(
            engine,
            sessions,
            settings,
            AiTextService::offline(Duration::from_millis(800)),
            notifier,
        )
    }

    fn runtime() -> Runtime {
        runtime_with(Arc::new(LogNotifier), None)
    }

    fn command(rt: &mut Runtime, command: Command) -> Response {
        let (reply, mut rx) = oneshot::channel();
        rt.dispatch(RuntimeMsg::Command { command, reply });
        rx.try_recv().unwrap()
    }

    fn status(rt: &mut Runtime) -> TimerStatus {
        match command(rt, Command::Status) {
            Response::Status(status) => status,
            other => panic!("unexpected response {:?}", other),
        }
    }

    fn ticks(rt: &mut Runtime, n: u64) {
        for _ in 0..n {
            rt.dispatch(RuntimeMsg::Tick);
        }
    }

    async fn deliver_next(rt: &mut Runtime) {
        let msg = rt.rx.recv().await.unwrap();
        rt.dispatch(msg);
    }

    fn started() -> Runtime {
        let mut rt = runtime();
        command(&mut rt, Command::Start);
        command(
            &mut rt,
            Command::SubmitNarration {
                text: "I'm working on the release notes.".into(),
            },
        );
        rt
    }

    #[tokio::test(start_paused = true)]
    async fn narration_starts_a_session() {
        let mut rt = runtime();
        assert!(matches!(command(&mut rt, Command::Start), Response::Ok));
        assert_eq!(status(&mut rt).state, TimerState::AwaitingNarration { voice: false });
        assert!(rt.sessions().current_session().is_none());

        command(
            &mut rt,
            Command::SubmitNarration {
                text: "I'm working on the release notes.".into(),
            },
        );
        let status = status(&mut rt);
        assert_eq!(status.state, TimerState::Running);
        assert_eq!(status.task_description, "the release notes");
        let session = rt.sessions().current_session().unwrap();
        assert_eq!(session.seed_narration, "I'm working on the release notes.");
        assert_eq!(status.active_session, Some(session.id.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn reminder_resolves_through_the_channel() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_deliver()
            .withf(|n| matches!(n, Notification::WrapUpReminder(_)))
            .times(1)
            .return_const(());
        let mut rt = runtime_with(Arc::new(notifier), None);
        command(&mut rt, Command::Start);
        command(&mut rt, Command::SkipNarration);

        ticks(&mut rt, 60);
        deliver_next(&mut rt).await;

        let status = status(&mut rt);
        assert!(status.show_ai_reminder);
        assert!(status.ai_message.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_pending_requests() {
        let mut rt = started();
        ticks(&mut rt, 60);
        command(&mut rt, Command::Stop);

        tokio::time::sleep(Duration::from_secs(5)).await;
        while let Ok(msg) = rt.rx.try_recv() {
            rt.dispatch(msg);
        }
        let status = status(&mut rt);
        assert_eq!(status.ai_message, None);
        assert!(!status.show_ai_reminder);
        assert_eq!(status.phase, Phase::Work);
        assert_eq!(status.state, TimerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn full_cycle_finalizes_session_and_attaches_report() {
        let mut notifier = MockNotifier::new();
        notifier.expect_deliver().return_const(());
        let mut rt = runtime_with(Arc::new(notifier), None);
        command(&mut rt, Command::Start);
        command(
            &mut rt,
            Command::SubmitNarration {
                text: "Focus on the changelog".into(),
            },
        );
        let session_id = rt.sessions().current_id().unwrap();

        ticks(&mut rt, 180);
        assert_eq!(status(&mut rt).state, TimerState::AwaitingWorkInput);
        command(
            &mut rt,
            Command::SubmitWorkInput {
                text: "Wrote it".into(),
            },
        );
        ticks(&mut rt, 2);
        assert_eq!(status(&mut rt).phase, Phase::LongBreak);
        ticks(&mut rt, 60);

        assert!(rt.sessions().current_session().is_none());
        let session = rt.sessions().session(session_id).unwrap();
        assert!(session.is_completed());
        assert_eq!(session.work_periods.len(), 1);
        assert_eq!(session.work_periods[0].input, "Wrote it");

        // the reminder and engagement requests from this run were cancelled;
        // the next message is the report
        loop {
            let msg = rt.rx.recv().await.unwrap();
            let is_report = matches!(msg, RuntimeMsg::ReportReady { .. });
            rt.dispatch(msg);
            if is_report {
                break;
            }
        }
        let report = &rt.sessions().session(session_id).unwrap().ai_report;
        assert!(report.starts_with("You completed 1 work period"));
    }

    #[tokio::test(start_paused = true)]
    async fn export_reports_success_then_clears_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = runtime_with(Arc::new(LogNotifier), Some(dir.path().to_path_buf()));
        command(&mut rt, Command::Start);
        command(&mut rt, Command::SkipNarration);
        let id = rt.sessions().current_id().unwrap();

        match command(&mut rt, Command::ExportSession { id: id.to_string() }) {
            Response::Export(status) => assert!(status.is_exporting),
            other => panic!("unexpected response {:?}", other),
        }
        assert!(matches!(
            command(&mut rt, Command::ExportAll),
            Response::Error(_)
        ));

        deliver_next(&mut rt).await;
        assert!(rt.sessions().export_status().export_success);
        let link = rt.sessions().session(id).unwrap().export_link.clone();
        assert!(link.starts_with("file://"));

        deliver_next(&mut rt).await;
        assert_eq!(rt.sessions().export_status(), kairos_ipc::ExportStatus::default());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_settings_are_rejected() {
        let mut rt = runtime();
        let response = command(
            &mut rt,
            Command::UpdateSettings(TimerSettings {
                work_minutes: 0,
                ..short_settings()
            }),
        );
        assert!(matches!(response, Response::Error(_)));
        assert!(matches!(
            command(&mut rt, Command::GetSettings),
            Response::Settings(s) if s == short_settings()
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn bad_ids_are_reported() {
        let mut rt = runtime();
        assert!(matches!(
            command(&mut rt, Command::ShowSession { id: "nope".into() }),
            Response::Error(_)
        ));
        assert!(matches!(
            command(
                &mut rt,
                Command::DeleteSession {
                    id: Uuid::new_v4().to_string()
                }
            ),
            Response::Error(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn restored_session_skips_the_gate() {
        let mut rt = started();
        let seed = rt.sessions().current_session().unwrap().seed_narration.clone();
        let sessions = SessionAggregator::load(
            Box::new(MemoryStore::with(
                crate::store::SESSIONS_KEY,
                &serde_json::to_string(rt.sessions().sessions()).unwrap(),
            )),
            SessionConfig::default(),
            None,
        );
        rt = Runtime::new(
            CycleEngine::new(short_settings(), EngineConfig::default()),
            sessions,
            SettingsStore::load(Box::new(MemoryStore::new())),
            AiTextService::offline(Duration::ZERO),
            Arc::new(LogNotifier),
        );

        command(&mut rt, Command::Start);
        let status = status(&mut rt);
        assert_eq!(status.state, TimerState::Running);
        assert_eq!(rt.engine().narration(), Some(seed.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn restarted_chain_keeps_both_narrations() {
        let mut rt = started();
        let session_id = rt.sessions().current_id().unwrap();
        ticks(&mut rt, 10);
        command(&mut rt, Command::Stop);

        command(&mut rt, Command::Start);
        assert_eq!(status(&mut rt).state, TimerState::AwaitingNarration { voice: false });
        command(
            &mut rt,
            Command::SubmitNarration {
                text: "Now the upgrade guide.".into(),
            },
        );

        assert_eq!(status(&mut rt).state, TimerState::Running);
        assert_eq!(rt.sessions().current_id(), Some(session_id));
        assert_eq!(rt.sessions().sessions().len(), 1);
        assert_eq!(
            rt.sessions().current_session().unwrap().seed_narration,
            "I'm working on the release notes.\n\nNow the upgrade guide."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn handle_round_trips_through_run() {
        let rt = runtime();
        let handle = rt.handle();
        tokio::spawn(rt.run());

        let response = handle.request(Command::AiStatus).await.unwrap();
        match response {
            Response::Ai(status) => assert!(!status.online),
            other => panic!("unexpected response {:?}", other),
        }
    }
}
