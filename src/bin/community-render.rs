//! Provides the `community-render` tool for headless batch rendering.
//!
//! Usage: `community-render --config <folder> --source <folder> <command>`
//!
//! # Examples
//! ```text
//! community-render --config project --source project/submissions list
//! community-render --config project --source project/submissions render --filter missing
//! community-render --config project --source project/submissions qc donut.glb --set skip
//! ```

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use community_render::config::{self, ProjectConfig, ProjectPaths};
use community_render::error::{PipelineError, Result};
use community_render::host::RasterHost;
use community_render::queue::QueueFilter;
use community_render::render::{format_hms, RenderOrchestrator, RenderOutcome, RenderTimer, RunSummary, TimerAction};
use community_render::session::Session;

#[derive(Debug, Parser)]
#[command(name = "community-render", version, about = "Batch-render community 3D submissions")]
struct Cli {
    /// Project folder holding the registry, QC files and renders.
    #[arg(long, global = true, default_value = ".", value_name = "DIR")]
    config: PathBuf,

    /// Folder of submitted scene files.
    #[arg(long, global = true, default_value = "submissions", value_name = "DIR")]
    source: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render every ready submission, or a single one with --only.
    Render {
        /// all, missing, qc or tag:<name>.
        #[arg(long, default_value = "all")]
        filter: QueueFilter,
        /// Drive the batch one item per timer tick.
        #[arg(long)]
        timer: bool,
        /// Render only this source file, even if it is flagged or superseded.
        #[arg(long, value_name = "FILE", conflicts_with = "timer")]
        only: Option<String>,
    },
    /// Print the queue and its statistics.
    List {
        #[arg(long, default_value = "all")]
        filter: QueueFilter,
    },
    /// Show, replace or clear a submission's QC tags.
    Qc {
        file: String,
        #[arg(long, conflicts_with = "clear")]
        set: Option<String>,
        #[arg(long)]
        clear: bool,
    },
    /// Remove both render files of a submission.
    DeleteRender { file: String },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let paths = ProjectPaths::new(cli.config, cli.source);
    let config = ProjectConfig::load(&paths.config_folder)?;
    let host = RasterHost::new(config.resolution.into());

    match cli.command {
        Commands::Render { filter, timer, only } => {
            let mut session = Session::open(paths, config, host, filter)?;
            match only {
                Some(file) => render_only(&mut session, &file),
                None => render_batch(&mut session, timer),
            }
        }
        Commands::List { filter } => {
            let session = Session::open(paths, config, host, filter)?;
            list(&session);
            Ok(())
        }
        Commands::Qc { file, set, clear } => {
            let mut session = Session::open(paths, config, host, QueueFilter::All)?;
            let index = find_row(&session, &file)?;
            match (set, clear) {
                (Some(text), _) => session.set_qc(index, &text)?,
                (None, true) => session.set_qc(index, "")?,
                (None, false) => {}
            }
            println!("{}\t{}", file, session.row(index)?.qc);
            Ok(())
        }
        Commands::DeleteRender { file } => {
            let mut session = Session::open(paths, config, host, QueueFilter::All)?;
            let index = find_row(&session, &file)?;
            session.delete_render(index)
        }
    }
}

fn find_row(session: &Session<RasterHost>, file: &str) -> Result<usize> {
    session
        .queue()
        .position(file)
        .ok_or_else(|| PipelineError::NotFound(session.paths().source_file(file)))
}

fn render_only(session: &mut Session<RasterHost>, file: &str) -> Result<()> {
    let index = find_row(session, file)?;
    session.queue_mut().set_cursor(index);
    match RenderOrchestrator::new().render_current(session)? {
        RenderOutcome::Rendered { exists, .. } => println!("Rendered {} (files present: {})", file, exists),
        RenderOutcome::Skipped { reason, .. } => println!("Skipped {}: {}", file, reason),
        RenderOutcome::QueueEmpty => println!("Nothing to render"),
    }
    Ok(())
}

fn render_batch(session: &mut Session<RasterHost>, timer: bool) -> Result<()> {
    let mut orchestrator = RenderOrchestrator::new();
    let summary: RunSummary = if timer {
        let mut timer = RenderTimer::start(&mut orchestrator, session);
        while let TimerAction::Rearm(delay) = timer.tick(&mut orchestrator, session)? {
            std::thread::sleep(delay);
        }
        timer.summary()
    } else {
        orchestrator.render_all(session)?
    };

    println!(
        "Rendered {} submission(s), skipped {} in {}",
        summary.rendered,
        summary.skipped,
        format_hms(summary.elapsed)
    );

    let sentinel = session.paths().restart_sentinel();
    match std::fs::remove_file(&sentinel) {
        Ok(()) => tracing::info!(path = %sentinel.display(), "Removed restart sentinel"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn list(session: &Session<RasterHost>) {
    for (i, row) in session.queue().rows().iter().enumerate() {
        println!(
            "{:>4}  {:<10}  {}  {:<32}  {:<24}  {:<4}  {}",
            i,
            row.status.to_string(),
            if row.render_exists { "R" } else { "-" },
            row.source_file,
            row.user_name,
            row.country,
            row.qc
        );
    }
    let stats = session.stats();
    println!(
        "{} source file(s), {} other file(s), {} rendered, {} with QC tags, {} without form match",
        stats.source_files, stats.non_source_files, stats.rendered, stats.qc_flagged, stats.no_form_match
    );
}
