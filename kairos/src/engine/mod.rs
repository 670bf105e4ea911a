//! The interval state machine.
//!
//! `CycleEngine` is synchronous and owns no clock: a driver calls `tick()`
//! once per second and forwards user input and AI completions. Everything the
//! engine wants done outside itself (AI requests, notifications, domain
//! events, cancellation) is queued as an `Effect` and collected with
//! `drain_effects()`. The engine never persists.

pub mod gate;

use crate::ai::{fallback, prompts};
use crate::config::EngineConfig;
use crate::events::{BreakFeedback, DomainEvent, Notification};
use crate::extract::extract_task_from_conversation;
use crate::model::WorkPeriod;
use chrono::Local;
use gate::{Gate, GateMode, Utterance};
use kairos_ipc::{Phase, TimerSettings, TimerState, TimerStatus};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EngineError {
    #[error("No work input is pending")]
    NoWorkInputPending,

    #[error("No task narration is pending")]
    NoNarrationPending,

    #[error("The current gate is not a voice conversation")]
    NotVoiceGate,

    #[error("No break feedback is being collected")]
    NoFeedbackSlot,

    #[error("Submit or skip the pending work input first")]
    WorkInputPending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiRequest {
    WrapUpReminder,
    BreakEngagement,
    FeedbackResponse { work_period_id: Uuid, feedback: String },
    GateReply,
}

/// Identifies an outstanding AI request and the engine state it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiTicket {
    pub epoch: u64,
    pub generation: u64,
    pub request: AiRequest,
}

impl AiTicket {
    /// Detached requests outlive phase transitions and pauses; only `stop()`
    /// cancels them.
    pub fn is_detached(&self) -> bool {
        matches!(self.request, AiRequest::FeedbackResponse { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    RequestAi { ticket: AiTicket, prompt: String },
    CancelPending { detached: bool },
    Notify(Notification),
    Domain(DomainEvent),
}

pub struct CycleEngine {
    settings: TimerSettings,
    options: EngineConfig,
    phase: Phase,
    /// The phase the current (or most recent) Delay followed.
    delay_after: Phase,
    state: TimerState,
    time_remaining: u64,
    phase_total: u64,
    current_cycle: u32,
    open_work_period: Option<WorkPeriod>,
    last_completed: Option<Uuid>,
    narration: Option<String>,
    task_description: String,
    gate: Option<Gate>,
    reminder_shown: bool,
    engagement_scheduled: bool,
    engagement_due_in: Option<u64>,
    epoch: u64,
    generation: u64,
    ai_message: Option<String>,
    show_ai_reminder: bool,
    feedback_slot: Option<Uuid>,
    outbox: Vec<Effect>,
}

impl CycleEngine {
    pub fn new(settings: TimerSettings, options: EngineConfig) -> Self {
        let phase_total = settings.phase_seconds(Phase::Work);
        Self {
            settings,
            options,
            phase: Phase::Work,
            delay_after: Phase::Work,
            state: TimerState::Idle,
            time_remaining: phase_total,
            phase_total,
            current_cycle: 1,
            open_work_period: None,
            last_completed: None,
            narration: None,
            task_description: String::new(),
            gate: None,
            reminder_shown: false,
            engagement_scheduled: false,
            engagement_due_in: None,
            epoch: 0,
            generation: 0,
            ai_message: None,
            show_ai_reminder: false,
            feedback_slot: None,
            outbox: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TimerState::Running
    }

    pub fn time_remaining(&self) -> u64 {
        self.time_remaining
    }

    pub fn phase_total(&self) -> u64 {
        self.phase_total
    }

    pub fn current_cycle(&self) -> u32 {
        self.current_cycle
    }

    pub fn settings(&self) -> &TimerSettings {
        &self.settings
    }

    pub fn open_work_period(&self) -> Option<&WorkPeriod> {
        self.open_work_period.as_ref()
    }

    pub fn narration(&self) -> Option<&str> {
        self.narration.as_deref()
    }

    pub fn task_description(&self) -> &str {
        &self.task_description
    }

    pub fn ai_message(&self) -> Option<&str> {
        self.ai_message.as_deref()
    }

    pub fn show_ai_reminder(&self) -> bool {
        self.show_ai_reminder
    }

    pub fn feedback_slot(&self) -> Option<Uuid> {
        self.feedback_slot
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn gate(&self) -> Option<&Gate> {
        self.gate.as_ref()
    }

    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.outbox)
    }

    pub fn status(&self, active_session: Option<Uuid>) -> TimerStatus {
        TimerStatus {
            phase: self.phase,
            state: self.state,
            time_remaining: self.time_remaining,
            phase_total: self.phase_total,
            current_cycle: self.current_cycle,
            cycles_before_long_break: self.settings.cycles_before_long_break,
            task_description: self.task_description.clone(),
            ai_message: self.ai_message.clone(),
            show_ai_reminder: self.show_ai_reminder,
            feedback_open: self.feedback_slot.is_some(),
            active_session: active_session.map(|id| id.to_string()),
        }
    }

    /// Marks the chain as already narrated, e.g. when an interrupted session
    /// is restored at startup.
    pub fn restore_session_narration(&mut self, narration: &str) {
        self.task_description = extract_task_from_conversation(narration);
        self.narration = Some(narration.to_string());
    }

    pub fn start(&mut self) {
        match self.state {
            TimerState::Idle | TimerState::Paused => {}
            _ => return,
        }

        if self.needs_gate() {
            self.open_gate();
        } else {
            self.begin_running();
        }
        self.check_invariants();
    }

    pub fn resume(&mut self) {
        self.start();
    }

    pub fn pause(&mut self) {
        if self.state != TimerState::Running {
            return;
        }
        self.state = TimerState::Paused;
        self.cancel_pending(false);
        debug!(remaining = self.time_remaining, "Timer paused");
        self.check_invariants();
    }

    pub fn stop(&mut self) {
        self.cancel_pending(true);
        self.state = TimerState::Idle;
        self.open_work_period = None;
        self.last_completed = None;
        self.narration = None;
        self.task_description.clear();
        self.gate = None;
        self.current_cycle = 1;
        self.delay_after = Phase::Work;
        self.set_phase(Phase::Work);
        self.dismiss_message();
        info!("Timer stopped");
        self.check_invariants();
    }

    /// Rewinds the current phase to its full length under the current settings.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        if self.state == TimerState::AwaitingWorkInput {
            return Err(EngineError::WorkInputPending);
        }
        self.cancel_pending(false);
        self.state = TimerState::Idle;
        self.gate = None;
        if self.phase == Phase::Work {
            self.open_work_period = None;
        }
        let phase = self.phase;
        self.set_phase(phase);
        self.check_invariants();
        Ok(())
    }

    pub fn update_settings(&mut self, settings: TimerSettings) {
        let elapsed = self.phase_total.saturating_sub(self.time_remaining);
        self.settings = settings;
        self.current_cycle = self
            .current_cycle
            .clamp(1, settings.cycles_before_long_break.max(1));
        self.phase_total = settings.phase_seconds(self.phase);
        // A finished work phase stays finished until its input arrives.
        self.time_remaining = if self.state == TimerState::AwaitingWorkInput {
            0
        } else {
            self.phase_total.saturating_sub(elapsed)
        };
        self.check_invariants();
    }

    pub fn tick(&mut self) {
        if self.state != TimerState::Running {
            return;
        }
        self.time_remaining = self.time_remaining.saturating_sub(1);

        if let Some(due) = self.engagement_due_in {
            if due <= 1 {
                self.engagement_due_in = None;
                self.request_engagement();
            } else {
                self.engagement_due_in = Some(due - 1);
            }
        }

        match self.phase {
            Phase::Work => {
                if !self.reminder_shown
                    && self.time_remaining > 0
                    && self.time_remaining == self.options.reminder_at_secs
                {
                    self.reminder_shown = true;
                    let task = self
                        .open_work_period
                        .as_ref()
                        .map(|wp| wp.task_description.clone())
                        .unwrap_or_default();
                    self.request_ai(AiRequest::WrapUpReminder, prompts::wrap_up_reminder(&task));
                }
            }
            Phase::ShortBreak | Phase::LongBreak => {
                let offset = self.options.engagement_offset_secs;
                if !self.engagement_scheduled
                    && self.phase_total > offset
                    && self.time_remaining == self.phase_total - offset
                {
                    self.engagement_scheduled = true;
                    if self.options.engagement_delay_secs == 0 {
                        self.request_engagement();
                    } else {
                        self.engagement_due_in = Some(self.options.engagement_delay_secs);
                    }
                }
            }
            Phase::Delay => {}
        }

        if self.time_remaining == 0 {
            self.complete_phase();
        }
        self.check_invariants();
    }

    pub fn submit_work_input(&mut self, text: &str) -> Result<(), EngineError> {
        if self.state != TimerState::AwaitingWorkInput {
            return Err(EngineError::NoWorkInputPending);
        }
        let mut work_period = self
            .open_work_period
            .take()
            .ok_or(EngineError::NoWorkInputPending)?;
        work_period.input = text.to_string();
        self.last_completed = Some(work_period.id);
        info!(id = %work_period.id, "Work period completed");
        self.outbox
            .push(Effect::Domain(DomainEvent::WorkPeriodCompleted(work_period)));

        self.delay_after = Phase::Work;
        self.enter_phase(Phase::Delay);
        self.check_invariants();
        Ok(())
    }

    pub fn submit_narration(&mut self, text: &str) -> Result<(), EngineError> {
        let gate = self.gate.as_mut().ok_or(EngineError::NoNarrationPending)?;
        let narration = gate.finish_with(text);
        self.finish_gate(narration);
        Ok(())
    }

    pub fn skip_narration(&mut self) -> Result<(), EngineError> {
        let gate = self.gate.as_ref().ok_or(EngineError::NoNarrationPending)?;
        let narration = gate.skip();
        self.finish_gate(narration);
        Ok(())
    }

    pub fn voice_utterance(&mut self, text: &str) -> Result<(), EngineError> {
        let gate = self.gate.as_mut().ok_or(EngineError::NoNarrationPending)?;
        if gate.mode() != GateMode::Voice {
            return Err(EngineError::NotVoiceGate);
        }
        match gate.utterance(text) {
            Utterance::Finished(narration) => self.finish_gate(narration),
            Utterance::Clarify(prompt) => self.ai_message = Some(prompt.to_string()),
            Utterance::Forward(prompt) => self.request_ai(AiRequest::GateReply, prompt),
        }
        Ok(())
    }

    pub fn submit_break_feedback(&mut self, text: &str) -> Result<(), EngineError> {
        let work_period_id = self.feedback_slot.take().ok_or(EngineError::NoFeedbackSlot)?;
        self.ai_message = None;
        let feedback = text.trim();
        if feedback.is_empty() {
            return Ok(());
        }
        self.request_ai(
            AiRequest::FeedbackResponse {
                work_period_id,
                feedback: feedback.to_string(),
            },
            prompts::feedback_response(feedback),
        );
        Ok(())
    }

    pub fn dismiss_message(&mut self) {
        self.ai_message = None;
        self.show_ai_reminder = false;
        self.feedback_slot = None;
    }

    /// Applies a resolved AI request, unless the state it was issued for is gone.
    pub fn apply_ai_response(&mut self, ticket: AiTicket, text: String) {
        if ticket.generation != self.generation {
            debug!(?ticket.request, "Dropping AI response from a stopped run");
            return;
        }
        let current = ticket.epoch == self.epoch;

        match ticket.request {
            AiRequest::FeedbackResponse {
                work_period_id,
                feedback,
            } => {
                if current {
                    self.ai_message = Some(text.clone());
                }
                self.outbox
                    .push(Effect::Domain(DomainEvent::BreakFeedbackReceived(BreakFeedback {
                        work_period_id,
                        feedback,
                        ai_response: text,
                    })));
            }
            request if !current => {
                debug!(?request, "Dropping stale AI response");
            }
            AiRequest::WrapUpReminder => {
                self.ai_message = Some(text.clone());
                self.show_ai_reminder = true;
                self.outbox
                    .push(Effect::Notify(Notification::WrapUpReminder(text)));
            }
            AiRequest::BreakEngagement => {
                self.ai_message = Some(text);
                self.feedback_slot = self.last_completed;
            }
            AiRequest::GateReply => {
                if let Some(gate) = self.gate.as_mut() {
                    gate.coach_reply(&text);
                    self.ai_message = Some(text);
                }
            }
        }
    }

    fn needs_gate(&self) -> bool {
        self.phase == Phase::Work
            && self.current_cycle == 1
            && self.open_work_period.is_none()
            && self.narration.is_none()
    }

    fn open_gate(&mut self) {
        let mode = if self.settings.use_voice_interaction {
            GateMode::Voice
        } else {
            GateMode::Text
        };
        self.gate = Some(Gate::new(mode, self.options.clarify_threshold_chars));
        self.state = TimerState::AwaitingNarration {
            voice: mode == GateMode::Voice,
        };
        self.ai_message = Some(fallback::canned(fallback::Category::Start).to_string());
        debug!(?mode, "Waiting for task narration");
    }

    fn finish_gate(&mut self, narration: String) {
        self.gate = None;
        self.cancel_pending(false);
        self.task_description = extract_task_from_conversation(&narration);
        self.narration = Some(narration.clone());
        self.ai_message = None;
        info!(task = %self.task_description, "Task narration captured");
        self.outbox
            .push(Effect::Domain(DomainEvent::ChainStarted { narration }));
        self.begin_running();
        self.check_invariants();
    }

    fn begin_running(&mut self) {
        self.state = TimerState::Running;
        if self.phase == Phase::Work && self.open_work_period.is_none() {
            self.open_work_period = Some(WorkPeriod::open(self.task_description.clone()));
        }
    }

    fn complete_phase(&mut self) {
        let finished = self.phase;
        info!(phase = finished.name(), cycle = self.current_cycle, "Phase complete");
        self.outbox
            .push(Effect::Notify(Notification::PhaseComplete {
                phase: finished,
                is_work_phase: finished == Phase::Work,
            }));

        match finished {
            Phase::Work => {
                let task = self.task_description.clone();
                let work_period = self
                    .open_work_period
                    .get_or_insert_with(|| WorkPeriod::open(task));
                work_period.end_time = Some(Local::now());
                self.cancel_pending(false);
                self.state = TimerState::AwaitingWorkInput;
            }
            Phase::Delay => {
                let next = if self.delay_after == Phase::Work {
                    if self.current_cycle % self.settings.cycles_before_long_break.max(1) == 0 {
                        Phase::LongBreak
                    } else {
                        Phase::ShortBreak
                    }
                } else {
                    Phase::Work
                };
                self.enter_phase(next);
            }
            Phase::ShortBreak => {
                let cycles = self.settings.cycles_before_long_break.max(1);
                self.current_cycle = (self.current_cycle + 1).min(cycles);
                self.delay_after = Phase::ShortBreak;
                self.enter_phase(Phase::Delay);
            }
            Phase::LongBreak => {
                self.current_cycle = 1;
                self.narration = None;
                self.task_description.clear();
                self.outbox.push(Effect::Domain(DomainEvent::FullCycleCompleted));
                self.delay_after = Phase::LongBreak;
                self.enter_phase(Phase::Delay);
            }
        }
    }

    fn enter_phase(&mut self, next: Phase) {
        self.cancel_pending(false);
        self.set_phase(next);
        self.show_ai_reminder = false;
        if next == Phase::Work {
            self.ai_message = None;
            self.feedback_slot = None;
        }
        if self.needs_gate() {
            self.open_gate();
        } else {
            self.begin_running();
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.phase_total = self.settings.phase_seconds(phase);
        self.time_remaining = self.phase_total;
        self.reminder_shown = false;
        self.engagement_scheduled = false;
        self.engagement_due_in = None;
    }

    fn request_engagement(&mut self) {
        let prompt = prompts::break_engagement(self.phase);
        self.request_ai(AiRequest::BreakEngagement, prompt);
    }

    fn request_ai(&mut self, request: AiRequest, prompt: String) {
        let ticket = AiTicket {
            epoch: self.epoch,
            generation: self.generation,
            request,
        };
        self.outbox.push(Effect::RequestAi { ticket, prompt });
    }

    /// Invalidates every outstanding side effect of the current epoch.
    fn cancel_pending(&mut self, detached: bool) {
        self.epoch += 1;
        if detached {
            self.generation += 1;
        }
        self.engagement_due_in = None;
        self.outbox.push(Effect::CancelPending { detached });
    }

    fn check_invariants(&self) {
        debug_assert!(
            (1..=self.settings.cycles_before_long_break).contains(&self.current_cycle),
            "cycle {} outside 1..={}",
            self.current_cycle,
            self.settings.cycles_before_long_break
        );
        debug_assert!(
            self.open_work_period.is_none() || self.phase == Phase::Work,
            "open work period outside a work phase"
        );
        debug_assert!(self.time_remaining <= self.phase_total);
    }
}
