//! Pre-phase input gate: collects task narration before a chain's first
//! work phase, either as one free-text answer or as a short conversation.

use crate::ai::prompts;

const READY_TRIGGERS: &[&str] = &["ready", "let's go", "start", "begin", "yes", "sure", "okay", "ok"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    Text,
    Voice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    You,
    Coach,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

/// What the engine should do with one voice utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Utterance {
    /// A ready phrase; carries the finished narration.
    Finished(String),
    /// Too short to forward; carries the local clarifying prompt.
    Clarify(&'static str),
    /// Needs a conversational reply; carries the prompt.
    Forward(String),
}

#[derive(Debug, Clone)]
pub struct Gate {
    mode: GateMode,
    turns: Vec<Turn>,
    clarify_threshold: usize,
}

pub fn is_ready_trigger(text: &str) -> bool {
    let text = text.to_lowercase();
    READY_TRIGGERS.iter().any(|t| text.contains(t))
}

impl Gate {
    pub fn new(mode: GateMode, clarify_threshold: usize) -> Self {
        Self {
            mode,
            turns: Vec::new(),
            clarify_threshold,
        }
    }

    pub fn mode(&self) -> GateMode {
        self.mode
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn utterance(&mut self, text: &str) -> Utterance {
        let text = text.trim();
        self.push(Speaker::You, text);

        if is_ready_trigger(text) {
            return Utterance::Finished(self.narration());
        }
        if text.chars().count() < self.clarify_threshold {
            self.push(Speaker::Coach, prompts::CLARIFYING_PROMPT);
            return Utterance::Clarify(prompts::CLARIFYING_PROMPT);
        }
        Utterance::Forward(prompts::conversation_reply(&self.narration()))
    }

    pub fn coach_reply(&mut self, text: &str) {
        self.push(Speaker::Coach, text);
    }

    /// Finishes with typed text. Voice mode keeps the conversation around it.
    pub fn finish_with(&mut self, text: &str) -> String {
        match self.mode {
            GateMode::Text => text.trim().to_string(),
            GateMode::Voice => {
                if !text.trim().is_empty() {
                    self.push(Speaker::You, text.trim());
                }
                self.narration()
            }
        }
    }

    pub fn skip(&self) -> String {
        match self.mode {
            GateMode::Text => String::new(),
            GateMode::Voice => self.narration(),
        }
    }

    pub fn narration(&self) -> String {
        self.turns
            .iter()
            .map(|turn| {
                let who = match turn.speaker {
                    Speaker::You => "You",
                    Speaker::Coach => "Coach",
                };
                format!("{}: {}", who, turn.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push(&mut self, speaker: Speaker, text: &str) {
        self.turns.push(Turn {
            speaker,
            text: text.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_phrases_match_anywhere_ignoring_case() {
        assert!(is_ready_trigger("OK"));
        assert!(is_ready_trigger("Alright, LET'S GO then"));
        assert!(is_ready_trigger("I'm ready"));
        assert!(!is_ready_trigger("I'm writing the migration plan"));
    }

    #[test]
    fn short_utterances_get_a_local_clarifying_prompt() {
        let mut gate = Gate::new(GateMode::Voice, 10);
        assert_eq!(gate.utterance("docs"), Utterance::Clarify(prompts::CLARIFYING_PROMPT));
        assert_eq!(gate.turns().len(), 2);
        assert_eq!(gate.turns()[1].speaker, Speaker::Coach);
    }

    #[test]
    fn longer_utterances_are_forwarded_with_history() {
        let mut gate = Gate::new(GateMode::Voice, 10);
        match gate.utterance("I'm working on the billing migration") {
            Utterance::Forward(prompt) => {
                assert!(prompt.contains("You: I'm working on the billing migration"))
            }
            other => panic!("expected forward, got {:?}", other),
        }
    }

    #[test]
    fn trigger_finishes_with_full_history() {
        let mut gate = Gate::new(GateMode::Voice, 10);
        let _ = gate.utterance("I'm working on the billing migration");
        gate.coach_reply("Which part first?");
        let outcome = gate.utterance("The schema, let's go");
        assert_eq!(
            outcome,
            Utterance::Finished(
                "You: I'm working on the billing migration\nCoach: Which part first?\nYou: The schema, let's go"
                    .to_string()
            )
        );
    }

    #[test]
    fn skip_in_text_mode_is_empty() {
        let gate = Gate::new(GateMode::Text, 10);
        assert_eq!(gate.skip(), "");
    }
}
