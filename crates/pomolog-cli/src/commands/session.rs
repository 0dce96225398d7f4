use chrono::Local;
use clap::Subcommand;
use pomolog_core::{Session, SessionPatch, SessionState};

use super::{parse_date, parse_datetime, print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum SessionAction {
    /// List sessions, oldest first
    List {
        /// Only sessions starting on this day (YYYY-MM-DD or "today")
        #[arg(long)]
        day: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a completed session by hand
    Add {
        description: String,
        /// Start time (YYYY-MM-DD HH:MM, HH:MM for today, or RFC 3339)
        #[arg(long)]
        start: String,
        /// End time
        #[arg(long)]
        end: String,
        #[arg(long)]
        customer: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
    /// Change fields of a session
    Edit {
        id: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// Planned length in minutes
        #[arg(long)]
        planned_min: Option<i64>,
        #[arg(long, conflicts_with = "clear_customer")]
        customer: Option<String>,
        #[arg(long)]
        clear_customer: bool,
        #[arg(long, conflicts_with = "clear_project")]
        project: Option<String>,
        #[arg(long)]
        clear_project: bool,
    },
    /// Delete sessions by id
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

pub fn run(action: SessionAction) -> CliResult {
    let mut ctx = Context::open()?;

    match action {
        SessionAction::List { day, json } => {
            let day = day.as_deref().map(parse_date).transpose()?;
            let sessions: Vec<Session> = ctx
                .tracker
                .sessions()
                .into_iter()
                .filter(|s| day.is_none_or(|d| s.start_time.with_timezone(&Local).date_naive() == d))
                .collect();
            if json {
                print_json(&sessions)?;
            } else if sessions.is_empty() {
                println!("No sessions.");
            } else {
                for s in &sessions {
                    println!("{}", format_row(s));
                }
            }
        }
        SessionAction::Add {
            description,
            start,
            end,
            customer,
            project,
        } => {
            let session = ctx.tracker.add_manual(
                &description,
                parse_datetime(&start)?,
                parse_datetime(&end)?,
                customer,
                project,
            )?;
            print_json(&session)?;
        }
        SessionAction::Edit {
            id,
            description,
            start,
            end,
            planned_min,
            customer,
            clear_customer,
            project,
            clear_project,
        } => {
            let patch = SessionPatch {
                description,
                start_time: start.as_deref().map(parse_datetime).transpose()?,
                end_time: end.as_deref().map(parse_datetime).transpose()?,
                planned_duration: planned_min.map(|m| m * 60),
                customer: if clear_customer { Some(None) } else { customer.map(Some) },
                project: if clear_project { Some(None) } else { project.map(Some) },
            };
            let session = ctx.tracker.edit(&id, patch)?;
            print_json(&session)?;
        }
        SessionAction::Delete { ids } => {
            if let [id] = ids.as_slice() {
                ctx.tracker.delete(id)?;
                println!("Deleted {id}");
            } else {
                let removed = ctx.tracker.delete_many(ids.iter().map(String::as_str));
                println!("Deleted {removed} of {} session(s)", ids.len());
            }
        }
    }

    ctx.finish()
}

fn format_row(s: &Session) -> String {
    let start = s.start_time.with_timezone(&Local);
    let end = match (s.session_state, s.end_time) {
        (SessionState::Paused, _) => "paused".to_string(),
        (_, Some(end)) => end.with_timezone(&Local).format("%H:%M").to_string(),
        (_, None) => "running".to_string(),
    };
    let tags = [s.customer.as_deref(), s.project.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("/");
    format!(
        "{:<14} {} {} - {:<7} {}{}",
        s.id,
        start.format("%Y-%m-%d"),
        start.format("%H:%M"),
        end,
        s.description,
        if tags.is_empty() { String::new() } else { format!("  [{tags}]") }
    )
}
