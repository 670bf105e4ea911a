//! Prompt shapes for every place the engine or aggregator asks for text.

use crate::model::Session;
use kairos_ipc::Phase;
use std::fmt::Write;

pub fn wrap_up_reminder(task_description: &str) -> String {
    let mut prompt = String::from("The user's focused work session is ending in 2 minutes.");
    if !task_description.is_empty() {
        let _ = write!(prompt, " They are working on: {}.", task_description);
    }
    prompt.push_str(
        " Write a short, encouraging reminder (at most two sentences) to wrap up and note what they accomplished.",
    );
    prompt
}

pub fn break_engagement(phase: Phase) -> String {
    let kind = if phase == Phase::LongBreak { "long" } else { "short" };
    format!(
        "The user is now on a {} break after a focused work period. \
         In one friendly sentence suggest a way to rest, then ask one short question about how the last work period went.",
        kind
    )
}

pub fn feedback_response(feedback: &str) -> String {
    format!(
        "During their break the user shared this feedback about their last work period: \"{}\". \
         Reply in at most two sentences: acknowledge it and offer one practical insight for the next work period.",
        feedback.trim()
    )
}

pub fn conversation_reply(history: &str) -> String {
    format!(
        "You are a focus coach helping the user get ready to begin a work session. \
         Conversation so far:\n{}\n\
         Reply in one or two sentences: ask a clarifying question about what they will work on, \
         or tell them to say \"ready\" when they want to begin.",
        history
    )
}

/// Short prompt shown locally when an utterance is too terse to forward.
pub const CLARIFYING_PROMPT: &str =
    "Could you tell me a bit more about what you want to work on? Say \"ready\" whenever you want to start.";

pub fn session_report(session: &Session) -> String {
    let mut prompt = String::from(
        "Write a brief productivity report for this focus session. \
         Summarize what was accomplished, point out patterns in focus and energy, \
         and suggest one improvement for next time.\n",
    );
    if !session.seed_narration.is_empty() {
        let _ = writeln!(prompt, "\nSession plan:\n{}", session.seed_narration);
    }
    for (i, wp) in session.work_periods.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "\nWork period {} ({} min)",
            i + 1,
            wp.duration().num_minutes()
        );
        if !wp.task_description.is_empty() {
            let _ = writeln!(prompt, "Task: {}", wp.task_description);
        }
        if !wp.input.is_empty() {
            let _ = writeln!(prompt, "Accomplished: {}", wp.input);
        }
        if !wp.break_feedback.is_empty() {
            let _ = writeln!(prompt, "Break feedback: {}", wp.break_feedback);
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::fallback::{classify, Category};
    use crate::model::WorkPeriod;
    use chrono::Duration;

    #[test]
    fn prompts_land_in_their_fallback_category() {
        assert_eq!(classify(&wrap_up_reminder("the report")), Category::Reminder);
        assert_eq!(classify(&break_engagement(Phase::ShortBreak)), Category::Break);
        assert_eq!(classify(&feedback_response("it went well")), Category::Feedback);
        assert_eq!(classify(&conversation_reply("You: I'm writing docs")), Category::Start);
        assert_eq!(classify(&session_report(&Session::start(String::new()))), Category::Report);
    }

    #[test]
    fn report_lists_each_period() {
        let mut session = Session::start("Plan: docs".into());
        let mut wp = WorkPeriod::open("the docs".into());
        wp.end_time = Some(wp.start_time + Duration::minutes(25));
        wp.input = "wrote two pages".into();
        wp.break_feedback = "tired".into();
        session.work_periods.push(wp);

        let prompt = session_report(&session);
        assert!(prompt.contains("Work period 1 (25 min)"));
        assert!(prompt.contains("Task: the docs"));
        assert!(prompt.contains("Accomplished: wrote two pages"));
        assert!(prompt.contains("Break feedback: tired"));
        assert!(prompt.contains("Plan: docs"));
    }
}
