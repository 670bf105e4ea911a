use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use kairos_ipc::{
    send_command, Command, ExportStatus, Response, SessionDetail, SessionSummary, TimerSettings,
    TimerState, TimerStatus, DEFAULT_SOCKET_PATH,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kairosctl")]
#[command(about = "Control the Kairos focus timer", long_about = None)]
struct Cli {
    /// Path to the daemon's socket
    #[arg(long, env = "KAIROS_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the timer
    Start,
    /// Pause the timer
    Pause,
    /// Resume the timer
    Resume,
    /// Stop the timer and end the current chain
    Stop,
    /// Restart the current phase
    Reset,
    /// Get timer status
    Status,
    /// Answer the task prompt before the first work phase
    Narrate { text: String },
    /// Skip the task prompt
    SkipNarration,
    /// Say something in a voice conversation
    Say { text: String },
    /// Record what you got done in the work phase that just ended
    Done {
        #[arg(default_value = "")]
        text: String,
    },
    /// Answer the break check-in
    Feedback {
        #[arg(default_value = "")]
        text: String,
    },
    /// Dismiss the current coach message
    Dismiss,
    /// Show or change timer settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// List saved sessions
    Sessions,
    /// Show one session in detail
    Show { id: String },
    /// Export one session, or all sessions when no id is given
    Export { id: Option<String> },
    /// Show the status of the last export
    ExportStatus,
    /// Delete one session
    Delete { id: String },
    /// Delete every saved session
    DeleteAll,
    /// Show the AI service status
    Ai,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Change one or more settings
    Set {
        #[arg(long)]
        work: Option<u32>,
        #[arg(long)]
        short_break: Option<u32>,
        #[arg(long)]
        long_break: Option<u32>,
        #[arg(long)]
        cycles: Option<u32>,
        #[arg(long)]
        delay: Option<u32>,
        #[arg(long)]
        voice: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Convert CLI command to IPC command
    let command = match cli.command {
        Commands::Start => Command::Start,
        Commands::Pause => Command::Pause,
        Commands::Resume => Command::Resume,
        Commands::Stop => Command::Stop,
        Commands::Reset => Command::Reset,
        Commands::Status => Command::Status,
        Commands::Narrate { text } => Command::SubmitNarration { text },
        Commands::SkipNarration => Command::SkipNarration,
        Commands::Say { text } => Command::VoiceUtterance { text },
        Commands::Done { text } => Command::SubmitWorkInput { text },
        Commands::Feedback { text } => Command::SubmitBreakFeedback { text },
        Commands::Dismiss => Command::DismissMessage,
        Commands::Settings { action: None } => Command::GetSettings,
        Commands::Settings {
            action:
                Some(SettingsAction::Set {
                    work,
                    short_break,
                    long_break,
                    cycles,
                    delay,
                    voice,
                }),
        } => {
            let Response::Settings(mut settings) =
                send_command(&cli.socket, &Command::GetSettings).await?
            else {
                bail!("Unexpected response to settings request");
            };
            settings.work_minutes = work.unwrap_or(settings.work_minutes);
            settings.short_break_minutes = short_break.unwrap_or(settings.short_break_minutes);
            settings.long_break_minutes = long_break.unwrap_or(settings.long_break_minutes);
            settings.cycles_before_long_break = cycles.unwrap_or(settings.cycles_before_long_break);
            settings.delay_seconds = delay.unwrap_or(settings.delay_seconds);
            settings.use_voice_interaction = voice.unwrap_or(settings.use_voice_interaction);
            Command::UpdateSettings(settings)
        }
        Commands::Sessions => Command::ListSessions,
        Commands::Show { id } => Command::ShowSession { id },
        Commands::Export { id: Some(id) } => Command::ExportSession { id },
        Commands::Export { id: None } => Command::ExportAll,
        Commands::ExportStatus => Command::ExportStatus,
        Commands::Delete { id } => Command::DeleteSession { id },
        Commands::DeleteAll => Command::DeleteAll,
        Commands::Ai => Command::AiStatus,
    };

    let response = send_command(&cli.socket, &command).await?;

    match response {
        Response::Ok => println!("OK"),
        Response::Status(status) => print_status(&status),
        Response::Settings(settings) => print_settings(&settings),
        Response::Sessions(sessions) => print_sessions(&sessions),
        Response::Session(detail) => print_session(&detail),
        Response::Export(status) => print_export(&status),
        Response::Ai(status) => {
            println!("Online: {}", if status.online { "yes" } else { "no (built-in text)" });
            println!("Loading: {}", status.is_loading);
            if let Some(e) = status.last_error {
                println!("Last error: {}", e);
            }
        }
        Response::Error(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn clock(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn print_status(status: &TimerStatus) {
    let state = match status.state {
        TimerState::Idle => "idle",
        TimerState::Running => "running",
        TimerState::Paused => "paused",
        TimerState::AwaitingNarration { voice: false } => "waiting for task (kairosctl narrate)",
        TimerState::AwaitingNarration { voice: true } => "listening (kairosctl say)",
        TimerState::AwaitingWorkInput => "waiting for notes (kairosctl done)",
    };
    println!(
        "{} [{}] {} / {}",
        status.phase.name(),
        state,
        clock(status.time_remaining),
        clock(status.phase_total)
    );
    println!(
        "Cycle: {}/{}",
        status.current_cycle, status.cycles_before_long_break
    );
    if !status.task_description.is_empty() {
        println!("Task: {}", status.task_description);
    }
    if let Some(message) = &status.ai_message {
        let label = if status.show_ai_reminder { "Reminder" } else { "Coach" };
        println!("{}: {}", label, message);
    }
    if status.feedback_open {
        println!("(answer with: kairosctl feedback \"...\")");
    }
    if let Some(session) = &status.active_session {
        println!("Session: {}", session);
    }
}

fn print_settings(settings: &TimerSettings) {
    println!("Work:           {} min", settings.work_minutes);
    println!("Short break:    {} min", settings.short_break_minutes);
    println!("Long break:     {} min", settings.long_break_minutes);
    println!("Cycles:         {}", settings.cycles_before_long_break);
    println!("Delay:          {} s", settings.delay_seconds);
    println!("Voice:          {}", settings.use_voice_interaction);
}

fn print_sessions(sessions: &[SessionSummary]) {
    if sessions.is_empty() {
        println!("No sessions");
        return;
    }
    for s in sessions {
        let state = if s.ended_at.is_some() { " " } else { "*" };
        let report = if s.has_report { "report" } else { "" };
        println!(
            "{} {}  {}  {} periods  {}m  {}",
            state,
            s.id,
            s.started_at.format("%Y-%m-%d %H:%M"),
            s.work_periods,
            s.total_work_secs / 60,
            report
        );
    }
}

fn print_session(detail: &SessionDetail) {
    let s = &detail.summary;
    println!("Session {}", s.id);
    println!("Started: {}", s.started_at.format("%Y-%m-%d %H:%M"));
    if let Some(ended) = s.ended_at {
        println!("Ended:   {}", ended.format("%Y-%m-%d %H:%M"));
    }
    if !s.export_link.is_empty() {
        println!("Export:  {}", s.export_link);
    }
    for (i, wp) in detail.periods.iter().enumerate() {
        println!();
        println!("Work period {} ({})", i + 1, wp.started_at.format("%H:%M"));
        if !wp.task_description.is_empty() {
            println!("  Task: {}", wp.task_description);
        }
        if !wp.input.is_empty() {
            println!("  Done: {}", wp.input);
        }
        if !wp.break_feedback.is_empty() {
            println!("  Break feedback: {}", wp.break_feedback);
        }
        if !wp.ai_response.is_empty() {
            println!("  Coach: {}", wp.ai_response);
        }
    }
    if !detail.ai_report.is_empty() {
        println!();
        println!("Report:");
        println!("{}", detail.ai_report);
    }
}

fn print_export(status: &ExportStatus) {
    if status.is_exporting {
        println!("Exporting...");
    } else if let Some(e) = &status.export_error {
        println!("Export failed: {}", e);
    } else if status.export_success {
        println!("Export complete");
    } else {
        println!("No export in progress");
    }
}
