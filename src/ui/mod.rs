//! Terminal output for the operator CLI.
//!
//! Progress goes through `indicatif` (hidden when stdout is not a terminal);
//! summaries are plain lines styled with `console`, or JSON with `--json`.

use std::time::Duration;

use anyhow::Result;
use console::{Term, style};
use dialoguer::Confirm;
use dialoguer::theme::ColorfulTheme;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::lifecycle::{LifecycleReport, OutcomeStatus};
use crate::search::ResultEnvelope;
use crate::source::RowKey;
use crate::stats::ClusterStats;
use crate::warm::{IndexWarmReport, WarmItemError, WarmProgress, WarmReport};

/// Ask before a destructive operation in a protected environment.
pub fn confirm_destructive(action: &str, environment: &str) -> Result<bool> {
    println!(
        "{} {} will modify indices in the {} environment.",
        style("!").yellow().bold(),
        style(action).bold(),
        style(environment).red().bold()
    );
    println!("  Writers should be paused; concurrent writes can race the delete/create window.");
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Continue?")
        .default(false)
        .interact()?;
    Ok(confirmed)
}

fn status_label(status: &OutcomeStatus) -> String {
    match status {
        OutcomeStatus::Done => style("done").green().to_string(),
        OutcomeStatus::AlreadyAbsent => style("absent").dim().to_string(),
        OutcomeStatus::Failed(reason) => format!("{} {}", style("failed").red().bold(), reason),
    }
}

pub fn print_lifecycle_report(report: &LifecycleReport) {
    if report.is_empty() {
        println!("Nothing to do.");
        return;
    }
    for item in &report.items {
        println!(
            "{:<6} {:<8} {:<32} {}",
            item.action,
            item.artifact,
            item.name,
            status_label(&item.status)
        );
    }
    let failures = report.failures().count();
    if failures == 0 {
        println!("{} {} step(s) completed", style("✓").green(), report.items.len());
    } else {
        println!(
            "{} {failures} of {} step(s) failed",
            style("✗").red(),
            report.items.len()
        );
    }
}

fn print_index_summary(section: &IndexWarmReport) {
    if let Some(reason) = &section.skipped {
        println!("{} {}: skipped ({reason})", style("-").dim(), section.index);
        return;
    }
    let mark = if section.is_success() {
        style("✓").green()
    } else {
        style("✗").red()
    };
    println!(
        "{mark} {}: {} attempted, {} indexed, {} missing, {} failed",
        section.index,
        section.attempted,
        section.succeeded,
        section.missing,
        section.failures.len()
    );
    for failure in &section.failures {
        println!("    {} {}: {}", style("✗").red(), failure.id, failure.reason);
    }
    if let Some(err) = &section.cursor_error {
        println!("    {} cursor: {err}", style("✗").red());
    }
}

/// Closing line after the per-index summaries printed by [`WarmProgressBar`].
pub fn print_warm_footer(report: &WarmReport) {
    if report.cancelled {
        println!("{} warm cancelled", style("!").yellow());
    } else if report.is_nothing_to_do() {
        println!("Nothing to do.");
    } else {
        println!(
            "{} row(s) attempted, {} failure(s)",
            report.attempted(),
            report.failure_count()
        );
    }
}

pub fn print_stats(stats: &ClusterStats) {
    let name = stats.cluster_name.as_deref().unwrap_or("unknown");
    let status = match stats.status.as_deref() {
        Some("green") => style("green").green().to_string(),
        Some("yellow") => style("yellow").yellow().to_string(),
        Some("red") => style("red").red().to_string(),
        Some(other) => other.to_string(),
        None => "unknown".to_string(),
    };
    println!("Cluster: {} ({status})", style(name).bold());
    for metric in &stats.metrics {
        println!("  {:<20} {}", metric.label, metric.value);
    }
}

pub fn print_search(envelope: &ResultEnvelope) {
    println!(
        "{} hit(s), page {} (size {}), {} ms",
        envelope.total,
        envelope.pagination.page,
        envelope.pagination.size,
        envelope.took.unwrap_or(0)
    );
    for hit in &envelope.hits {
        let score = hit.score.map_or_else(|| "-".to_string(), |s| format!("{s:.3}"));
        println!("{} {}/{} {}", style(score).dim(), hit.index, style(&hit.id).bold(), hit.source);
    }
}

/// Spinner per index with running counts.
pub struct WarmProgressBar {
    bar: Option<ProgressBar>,
    visible: bool,
    failures: usize,
}

impl Default for WarmProgressBar {
    fn default() -> Self {
        Self::new()
    }
}

impl WarmProgressBar {
    pub fn new() -> Self {
        Self {
            bar: None,
            visible: Term::stdout().is_term(),
            failures: 0,
        }
    }

    fn spinner(&self, index: &str) -> ProgressBar {
        let bar = ProgressBar::new_spinner();
        if !self.visible {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        if let Ok(template) = ProgressStyle::with_template("{spinner} {prefix:.bold} {pos} rows {msg}") {
            bar.set_style(template);
        }
        bar.set_prefix(index.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    }
}

impl WarmProgress for WarmProgressBar {
    fn index_started(&mut self, index: &str) {
        self.failures = 0;
        self.bar = Some(self.spinner(index));
    }

    fn row_finished(&mut self, _index: &str, id: &RowKey, error: Option<&WarmItemError>) {
        if error.is_some() {
            self.failures += 1;
        }
        if let Some(bar) = &self.bar {
            bar.inc(1);
            if self.failures > 0 {
                bar.set_message(format!("({} failed, last id {id})", self.failures));
            }
        }
    }

    fn index_finished(&mut self, report: &IndexWarmReport) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        print_index_summary(report);
    }
}
