use std::time::Duration;

use chrono::Utc;
use clap::Subcommand;
use pomolog_core::mirror::DocumentState;
use pomolog_core::{NotifyWatch, PollWatch, TrackerService};

use super::{block_on, follow_mirror, save_engine, CliResult, Context};

#[derive(Subcommand)]
pub enum MirrorAction {
    /// Write the Markdown mirror from the session store
    Render,
    /// Read the mirror and replace the store with its contents when they differ
    Reconcile,
    /// Keep the mirror open: re-render periodically and pick up edits until Ctrl-C
    Watch {
        /// Poll the file every N milliseconds instead of using native notifications
        #[arg(long)]
        poll_ms: Option<u64>,
    },
}

pub fn run(action: MirrorAction) -> CliResult {
    let mut ctx = Context::open()?;
    let mut mirror = ctx.mirror();

    match action {
        MirrorAction::Render => {
            ctx.tracker.render_mirror(&mut mirror)?;
            println!("{}", mirror.path().display());
        }
        MirrorAction::Reconcile => match mirror.state()? {
            DocumentState::Missing => {
                eprintln!("no mirror at {}; rendering", mirror.path().display());
                ctx.tracker.render_mirror(&mut mirror)?;
            }
            DocumentState::External(text) => {
                let doc = mirror.parse(&text)?;
                if doc.skipped > 0 {
                    eprintln!("skipped {} unreadable line(s)", doc.skipped);
                }
                let changed = ctx.tracker.reconcile_mirror(&doc, Utc::now());
                ctx.tracker.render_mirror(&mut mirror)?;
                println!(
                    "{}",
                    if changed { "store updated from mirror" } else { "mirror matches store" }
                );
            }
            DocumentState::OwnWrite | DocumentState::Unchanged => {
                // Nobody edited it; catch up with anything recorded since.
                ctx.tracker.render_mirror(&mut mirror)?;
                println!("mirror matches store");
            }
        },
        MirrorAction::Watch { poll_ms } => return watch(ctx, poll_ms),
    }

    ctx.finish()
}

fn watch(ctx: Context, poll_ms: Option<u64>) -> CliResult {
    let mirror = ctx.mirror();
    let (settings, tracker, engine_path) = ctx.into_parts();
    let path = settings.mirror_path.clone();
    let refresh = settings.mirror_refresh;

    let (engine, sessions) = block_on(async move {
        let mut service = TrackerService::new(tracker, mirror, refresh);
        // Edits made while nothing was watching win over the store.
        if service.reconcile_mirror() {
            eprintln!("store updated from mirror");
        }
        let opened = match poll_ms {
            Some(ms) => service.open_mirror(Some(PollWatch::new(Duration::from_millis(ms)))),
            None => service.open_mirror(Some(NotifyWatch)),
        };
        if let Err(e) = opened {
            service.shutdown().await;
            return Err(e.into());
        }
        eprintln!("watching {} (Ctrl-C to stop)", path.display());

        let result: CliResult = tokio::signal::ctrl_c().await.map_err(Into::into);
        let state = service.with_tracker(|t| (t.engine().clone(), t.sessions()));
        service.shutdown().await;
        result.map(|()| state)
    })??;

    follow_mirror(&settings, &sessions);
    save_engine(&engine_path, &engine)
}
