use std::io::{self, Write};

use migralign_config::AlignConfig;
use migralign_reconcile::{Outcome, RunReport};

const WIDTH: usize = 72;
const LEFT_W: usize = 34;

/// Write a boxed summary of the run with one line per processed migration.
pub fn print_summary(
    out: &mut dyn Write,
    report: &RunReport,
    config: &AlignConfig,
) -> io::Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    let right_w = WIDTH - LEFT_W - 6; // "│ " + "│  " + "│"

    let title = format!("migralign v{version}");
    let title_dashes = WIDTH - 2 - title.chars().count() - 5; // 2 for ╭╮, 5 for "─── " + " "
    let top = format!("╭─── {title} {}╮", "─".repeat(title_dashes));
    let bottom = format!("╰{}╯", "─".repeat(WIDTH - 2));

    let row = |l: &str, r: &str| {
        format!(
            "│ {:<LEFT_W$}│  {:<right_w$}│",
            fit(l, LEFT_W),
            fit(r, right_w)
        )
    };

    let status = if report.aborted.is_some() {
        "aborted"
    } else if report.is_success() {
        "ok"
    } else {
        "completed with errors"
    };

    let stats = [
        (format!("Apps         {}", config.apps.len()), format!("Status      {status}")),
        (format!("Table        {}", config.database.table), format!("Policy      {}", config.on_app_error)),
        (format!("Pointers     {}", report.pointers_written.len()), format!("Relinked    {}", report.relinked())),
        (format!("Pending      {}", report.pending.len()), format!("Anchored    {}", report.anchored())),
        (format!("Unprocessed  {}", report.unprocessed()), format!("Skipped     {}", report.skipped())),
        (format!("App errors   {}", report.app_errors.len()), format!("Failed      {}", report.failed())),
    ];

    writeln!(out, "{top}")?;
    for (left, right) in &stats {
        writeln!(out, "{}", row(left, right))?;
    }

    if !report.outcomes.is_empty() || !report.app_errors.is_empty() {
        writeln!(out, "{}", row("", ""))?;
    }
    for o in &report.outcomes {
        writeln!(
            out,
            "{}",
            row(&format!("{}.{}", o.app, o.migration), &describe(&o.outcome))
        )?;
    }
    for failure in &report.app_errors {
        writeln!(
            out,
            "{}",
            row(&failure.app, &format!("{} failed: {}", failure.stage, failure.reason))
        )?;
    }
    writeln!(out, "{bottom}")
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Relinked { depends_on } => format!("-> {depends_on}"),
        Outcome::Anchored => "first in chain".to_string(),
        Outcome::SkippedCorruptedPointer { pointer } => format!("skipped, corrupted pointer {pointer}"),
        Outcome::SkippedMissingPointer => "skipped, no max migration file".to_string(),
        Outcome::Failed { reason } => format!("failed: {reason}"),
    }
}

/// Clip `s` to `width` characters, marking the cut with an ellipsis.
fn fit(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let mut clipped: String = s.chars().take(width.saturating_sub(1)).collect();
    clipped.push('…');
    clipped
}
