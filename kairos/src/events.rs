//! Typed channels between the cycle engine and everything downstream of it.

use crate::model::WorkPeriod;
use kairos_ipc::Phase;
use uuid::Uuid;

/// Events the session aggregator consumes, in the order the engine emits them.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// The pre-phase gate resolved for a new chain.
    ChainStarted { narration: String },
    WorkPeriodCompleted(WorkPeriod),
    /// A long break ran out; the chain is over.
    FullCycleCompleted,
    BreakFeedbackReceived(BreakFeedback),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakFeedback {
    pub work_period_id: Uuid,
    pub feedback: String,
    pub ai_response: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    WrapUpReminder(String),
    PhaseComplete { phase: Phase, is_work_phase: bool },
}

impl Notification {
    pub fn title(&self) -> &'static str {
        match self {
            Notification::WrapUpReminder(_) => "Time to wrap up",
            Notification::PhaseComplete { .. } => "Phase complete",
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notification::WrapUpReminder(message) => message.clone(),
            Notification::PhaseComplete {
                phase,
                is_work_phase: true,
            } => format!("{} finished. Note what you got done.", phase.name()),
            Notification::PhaseComplete { phase, .. } => format!("{} finished.", phase.name()),
        }
    }
}
