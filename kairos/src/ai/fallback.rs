//! Canned responses used whenever the language model is unavailable.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Reminder,
    Report,
    Feedback,
    Start,
    Break,
    General,
}

// Checked in order; the first category with a matching keyword wins.
const KEYWORDS: &[(Category, &[&str])] = &[
    (Category::Reminder, &["ending in 2 minutes", "wrap up"]),
    (Category::Report, &["report"]),
    (Category::Feedback, &["feedback"]),
    (Category::Start, &["start", "begin", "ready"]),
    (Category::Break, &["break"]),
];

pub fn classify(prompt: &str) -> Category {
    let prompt = prompt.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| prompt.contains(w)))
        .map(|(category, _)| *category)
        .unwrap_or(Category::General)
}

pub fn canned(category: Category) -> &'static str {
    match category {
        Category::Reminder => {
            "Your work session is ending in 2 minutes. Start wrapping up and jot down what you accomplished."
        }
        Category::Report => {
            "Great session! You stayed with your work periods through to the end. Look over your notes to see what moved forward and carry that momentum into the next session."
        }
        Category::Feedback => {
            "Thanks for sharing. Reflecting on how it went is part of recharging. Enjoy the rest of your break!"
        }
        Category::Start => "Let's get started! What are you planning to work on this session?",
        Category::Break => {
            "Time for a break! Step away from the screen, stretch, and grab some water. How did that last work period go?"
        }
        Category::General => "Keep up the good work. Stay focused and take breaks when you need them.",
    }
}

pub fn for_prompt(prompt: &str) -> &'static str {
    canned(classify(prompt))
}
