use chrono::Utc;
use clap::Subcommand;
use pomolog_core::{Event, Session, TimerState, TrackerService};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use super::{block_on, follow_mirror, print_json, save_engine, CliResult, Context};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start a session (completes any active one first)
    Start {
        /// What you are working on
        description: String,
        #[arg(long)]
        customer: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
    /// Pause the running session
    Pause,
    /// Reset to idle, closing the open session
    Reset,
    /// Print current timer state as JSON
    Status,
    /// Start a session and count down in the foreground until it completes
    /// or Ctrl-C resets it
    Run {
        description: String,
        #[arg(long)]
        customer: Option<String>,
        #[arg(long)]
        project: Option<String>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TimerStatus {
    state: TimerState,
    remaining_secs: i64,
    session_length_secs: i64,
    session: Option<Session>,
}

fn status(ctx: &Context) -> TimerStatus {
    let engine = ctx.tracker.engine();
    TimerStatus {
        state: engine.state(),
        remaining_secs: engine.time_remaining().num_seconds(),
        session_length_secs: engine.session_length_secs(),
        session: engine
            .session_id()
            .and_then(|id| ctx.tracker.store().get(id))
            .cloned(),
    }
}

pub fn run(action: TimerAction) -> CliResult {
    let mut ctx = Context::open()?;
    // A countdown that ran out while no process was watching completes now.
    if let Some(event) = ctx.tracker.poll_at(Utc::now()) {
        print_json(&event)?;
    }

    match action {
        TimerAction::Start {
            description,
            customer,
            project,
        } => match ctx.tracker.start_at(&description, customer, project, Utc::now()) {
            Some(event) => print_json(&event)?,
            None => {
                eprintln!("timer is already running");
                print_json(&status(&ctx))?;
            }
        },
        TimerAction::Pause => match ctx.tracker.pause_at(Utc::now()) {
            Some(event) => print_json(&event)?,
            None => print_json(&status(&ctx))?,
        },
        TimerAction::Reset => {
            let event = ctx.tracker.reset_at(Utc::now());
            print_json(&event.unwrap_or(Event::TimerReset {
                closed: None,
                at: Utc::now(),
            }))?;
        }
        TimerAction::Status => print_json(&status(&ctx))?,
        TimerAction::Run {
            description,
            customer,
            project,
        } => return run_foreground(ctx, &description, customer, project),
    }

    ctx.finish()
}

fn run_foreground(
    ctx: Context,
    description: &str,
    customer: Option<String>,
    project: Option<String>,
) -> CliResult {
    let mirror = ctx.mirror();
    let (settings, tracker, engine_path) = ctx.into_parts();

    let refresh = settings.mirror_refresh;
    let (engine, sessions) = block_on(async move {
        let mut service = TrackerService::new(tracker, mirror, refresh);
        let mut events = service.with_tracker(|t| t.events().subscribe());
        if service.start(description, customer, project).is_none() {
            service.shutdown().await;
            return Err("timer is already running; see `pomolog timer status`".into());
        }

        let result: CliResult = loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    service.reset();
                    eprintln!("interrupted; session closed");
                    break Ok(());
                }
                event = events.recv() => match event {
                    Ok(event @ Event::SessionCompleted { .. }) => break print_json(&event),
                    Ok(Event::StoreChanged { .. }) => {}
                    Ok(event) => {
                        if let Err(e) = print_json(&event) {
                            break Err(e);
                        }
                    }
                    Err(RecvError::Lagged(_)) => {}
                    Err(e) => break Err(e.into()),
                }
            }
        };
        let state = service.with_tracker(|t| (t.engine().clone(), t.sessions()));
        service.shutdown().await;
        result.map(|()| state)
    })??;

    follow_mirror(&settings, &sessions);
    save_engine(&engine_path, &engine)
}
