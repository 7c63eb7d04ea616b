mod summary;

use std::fmt::Display;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use migralign_config::{AlignConfig, AppErrorPolicy, CliOverrides, ConfigLoader};
use migralign_db::MigrationRecorder;
use migralign_reconcile::{DirectoryRegistry, FilePointerStore, Reconciler, RunReport};
use tracing::info;
use tracing_subscriber::EnvFilter;

const LONG_ABOUT: &str = "\
Resolves migration dependency drift and aligns migration files across environments.

Run it before migrating on a server. For every configured app it rebuilds the
max_migration.txt pointer from the applied-migrations table, then rewrites the
dependencies of every unapplied migration so they chain onto what this
environment has actually applied.

Never deploy max_migration.txt files: each environment generates its own.
Dependencies may end up different from version control, which is what lets the
same migration names do the same thing everywhere.";

#[derive(Parser, Debug)]
#[command(name = "migralign", version, about = "Align migration dependencies with the applied history", long_about = LONG_ABOUT)]
struct Cli {
    /// Config file (.toml, .yml or .yaml)
    #[arg(short, long, env = "MIGRALIGN_CONFIG", default_value = "migralign.toml")]
    config: PathBuf,

    /// SQLite database holding the applied-migrations table
    #[arg(long, env = "MIGRALIGN_DATABASE")]
    database: Option<PathBuf>,

    /// What to do when one app fails: abort or skip-and-continue
    #[arg(long)]
    on_app_error: Option<AppErrorPolicy>,

    /// Print the run report as JSON instead of progress lines
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(&cli, &mut std::io::stdout().lock()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout carries only progress lines or the JSON report.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("MIGRALIGN_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Run one reconciliation, writing progress lines or the JSON report to
/// `out`. Returns whether the run succeeded.
fn run(cli: &Cli, out: &mut dyn Write) -> Result<bool> {
    let overrides = CliOverrides {
        database: cli.database.clone(),
        on_app_error: cli.on_app_error,
    };
    let config = ConfigLoader::load(&cli.config, Some(&overrides))
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let db_path = config
        .database
        .path
        .as_deref()
        .context("`database.path` is required")?;
    let store = MigrationRecorder::open(db_path, &config.database.table)?;
    let registry = DirectoryRegistry::from_config(&config);
    let mut pointers = FilePointerStore::new(config.pointer_file.as_str());

    let mut progress = Progress {
        out,
        quiet: cli.json,
    };
    let mut reconciler = Reconciler::new(&store, &registry, &mut pointers, config.apps.clone())
        .with_policy(config.on_app_error);
    let mut report = RunReport::default();
    if let Err(e) = drive(&mut reconciler, &mut report, &config, &mut progress) {
        report.abort(&e);
    }

    if cli.json {
        writeln!(progress.out, "{}", report.to_json()?)?;
    } else {
        if let Some(reason) = &report.aborted {
            progress.line(format!("Failed: An error occurred: {reason}"))?;
        } else if !report.is_success() {
            progress.line("Failed: Some migrations could not be aligned")?;
        } else if !report.pending.is_empty() {
            progress.line("Finished: Files ready to be migrated to the database!")?;
        }
        summary::print_summary(progress.out, &report, &config)?;
    }

    info!(
        "run finished: {} relinked, {} anchored, {} skipped, {} failed",
        report.relinked(),
        report.anchored(),
        report.skipped(),
        report.failed()
    );
    Ok(report.is_success())
}

/// The three reconciliation steps with a progress line before each.
fn drive(
    reconciler: &mut Reconciler<'_>,
    report: &mut RunReport,
    config: &AlignConfig,
    progress: &mut Progress<'_>,
) -> migralign_common::Result<()> {
    progress.line("Starting to check migration files ...")?;

    progress.line(format!("STEP 1 ---> Recreating {} files", config.pointer_file))?;
    reconciler.regenerate_pointers(report)?;
    for app in &report.pointers_written {
        progress.line(format!("Created max migration file for app: {app}"))?;
    }
    progress.line(format!(
        "Finished: Created {} max migration files",
        report.pointers_written.len()
    ))?;

    progress.line("STEP 2 ---> Checking unapplied migration changes")?;
    let pending = reconciler.collect_pending(report)?;
    if pending.is_empty() {
        progress.line("Finished: No new migrations found")?;
        return Ok(());
    }
    let names: Vec<String> = pending.iter().map(ToString::to_string).collect();
    progress.line(format!(
        "We got the following migrations to check: {}",
        names.join(", ")
    ))?;

    progress.line("STEP 3 ---> Check & fix migration files")?;
    reconciler.relink(&pending, report)
}

struct Progress<'w> {
    out: &'w mut dyn Write,
    quiet: bool,
}

impl Progress<'_> {
    fn line(&mut self, msg: impl Display) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        writeln!(self.out, "{msg}")
    }
}
