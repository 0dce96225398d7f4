use chrono::Local;
use clap::Subcommand;
use pomolog_core::transform::{destroy_sessions, inject_sessions, round_and_flatten};
use pomolog_core::{Session, TransformOutcome};
use serde::Serialize;

use super::{parse_days, parse_window, print_json, CliResult, Context};

#[derive(Subcommand)]
pub enum TransformAction {
    /// Snap sessions onto a fixed grid, merging sessions that share a bucket
    Round {
        /// Bucket width in minutes
        #[arg(long, default_value_t = 30)]
        bucket_min: i64,
        /// First day to round (YYYY-MM-DD or "today"); all sessions when omitted
        #[arg(long)]
        from: Option<String>,
        /// Last day to round (defaults to --from)
        #[arg(long, requires = "from")]
        to: Option<String>,
        /// Show the result without applying it
        #[arg(long)]
        dry_run: bool,
    },
    /// Fill the gaps inside a daily window with placeholder sessions
    Inject {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: Option<String>,
        /// Daily window, HH:MM-HH:MM
        #[arg(long)]
        window: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        customer: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete every session overlapping a daily window
    Destroy {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        window: String,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Preview<'a> {
    applied: bool,
    removed: &'a [String],
    inserted: &'a [String],
    sessions: &'a [Session],
}

pub fn run(action: TransformAction) -> CliResult {
    let mut ctx = Context::open()?;
    let current = ctx.tracker.sessions();

    match action {
        TransformAction::Round {
            bucket_min,
            from,
            to,
            dry_run,
        } => {
            let selected: Vec<Session> = match from {
                Some(from) => {
                    let days = parse_days(&from, to.as_deref())?;
                    current
                        .into_iter()
                        .filter(|s| days.contains(s.start_time.with_timezone(&Local).date_naive()))
                        .collect()
                }
                None => current,
            };
            let outcome = round_and_flatten(&selected, bucket_min * 60)?;
            apply(&mut ctx, &outcome, dry_run)?;
        }
        TransformAction::Inject {
            from,
            to,
            window,
            project,
            customer,
            dry_run,
        } => {
            let outcome = inject_sessions(
                &current,
                parse_days(&from, to.as_deref())?,
                parse_window(&window)?,
                project.as_deref(),
                customer.as_deref(),
                &Local,
            );
            apply(&mut ctx, &outcome, dry_run)?;
        }
        TransformAction::Destroy {
            from,
            to,
            window,
            dry_run,
        } => {
            let selection = destroy_sessions(
                &current,
                parse_days(&from, to.as_deref())?,
                parse_window(&window)?,
                &Local,
            );
            let ids: Vec<String> = selection.iter().map(|s| s.id.clone()).collect();
            let applied = if dry_run {
                false
            } else {
                ctx.tracker.destroy(&selection)?;
                true
            };
            print_json(&Preview {
                applied,
                removed: &ids,
                inserted: &[],
                sessions: &selection,
            })?;
        }
    }

    ctx.finish()
}

fn apply(ctx: &mut Context, outcome: &TransformOutcome, dry_run: bool) -> CliResult {
    if !dry_run {
        ctx.tracker.apply_transform(outcome)?;
    }
    print_json(&Preview {
        applied: !dry_run,
        removed: &outcome.removed,
        inserted: &outcome.inserted,
        sessions: &outcome.sessions,
    })
}
