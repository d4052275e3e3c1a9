//! Interface de terminal do qagen: spinner e saída colorida.
//!
//! Usa `indicatif` para o spinner do tick manual e `console` para as cores.
//! Com `--json` cada comando imprime o valor serializado em vez do texto.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use qagen::audit::{AuditStatistics, ProcessingLogEntry};
use qagen::cache::CacheStats;
use qagen::driver::{
    BatchStatusView, ItemOutcome, ItemReport, ProcessorStatus, PurgeReport, RetryResult,
    TickReport,
};
use qagen::queue::{Admission, BatchStatus, QueueStats};
use qagen::reaper::ReapReport;
use qagen::state_machine::{FailedItem, ItemStatus};

/// Spinner exibido enquanto um tick manual roda.
pub struct TickProgress {
    pb: ProgressBar,
}

impl TickProgress {
    pub fn start() -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message("Processing next item...");
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { pb }
    }

    pub fn finish(self) {
        self.pb.finish_and_clear();
    }
}

/// Formata o resultado de cada comando.
pub struct Printer {
    json: bool,
    green: Style,
    red: Style,
    yellow: Style,
    bold: Style,
    dim: Style,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            bold: Style::new().bold(),
            dim: Style::new().dim(),
        }
    }

    /// Em modo JSON imprime `value` e retorna `true`.
    fn as_json<T: Serialize + ?Sized>(&self, value: &T) -> bool {
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(value).unwrap_or_default()
            );
        }
        self.json
    }

    fn ok(&self, message: impl std::fmt::Display) {
        println!("  {} {message}", self.green.apply_to("✓"));
    }

    fn fail(&self, message: impl std::fmt::Display) {
        println!("  {} {message}", self.red.apply_to("✗"));
    }

    fn note(&self, message: impl std::fmt::Display) {
        println!("  {} {message}", self.yellow.apply_to("•"));
    }

    pub fn admission(&self, admission: &Admission) {
        if self.as_json(admission) {
            return;
        }
        match &admission.batch_id {
            Some(id) => self.ok(format!(
                "Batch {} admitted with {} item(s)",
                self.bold.apply_to(id),
                admission.admitted
            )),
            None => self.note("Nothing to admit"),
        }
        println!(
            "    {}",
            self.dim.apply_to(format!(
                "already completed: {}, already queued: {}, missing: {}",
                admission.already_completed, admission.already_queued, admission.missing
            ))
        );
    }

    pub fn tick(&self, report: &TickReport) {
        if self.as_json(report) {
            return;
        }
        match report {
            TickReport::Skipped { lock_expires_at } => self.note(format!(
                "Another tick is running (lock expires at {lock_expires_at})"
            )),
            TickReport::Idle => self.note("No pending work"),
            TickReport::Processed {
                batch_id,
                item_id,
                outcome,
                rescheduled,
            } => {
                match outcome {
                    ItemOutcome::Completed { artifacts, cached } => self.ok(format!(
                        "Item {item_id} ({batch_id}): {artifacts} artifact(s) published{}",
                        if *cached { ", from cache" } else { "" }
                    )),
                    ItemOutcome::AlreadyCompleted => {
                        self.note(format!("Item {item_id} ({batch_id}) was already completed"))
                    }
                    ItemOutcome::Failed { error } => {
                        self.fail(format!("Item {item_id} ({batch_id}) failed: {error}"))
                    }
                }
                if *rescheduled {
                    println!("    {}", self.dim.apply_to("next tick scheduled"));
                }
            }
        }
    }

    fn batch_status(&self, status: BatchStatus) -> String {
        let style = match status {
            BatchStatus::Pending => &self.yellow,
            BatchStatus::Completed => &self.green,
            BatchStatus::Cancelled => &self.dim,
        };
        style.apply_to(status).to_string()
    }

    pub fn status(&self, view: &BatchStatusView) {
        if self.as_json(view) {
            return;
        }
        match view {
            BatchStatusView::One(snapshot) => {
                let b = &snapshot.batch;
                println!("{} {}", self.bold.apply_to(&b.id), self.batch_status(b.status));
                println!(
                    "  progress  {:>5.1}%  ({}/{} processed, {} failed)",
                    snapshot.progress_percent, b.processed_count, b.total_count, b.failed_count
                );
                println!("  cursor    {}/{}", b.current_index, b.total_count);
                if !b.retry_queue.is_empty() {
                    let ids: Vec<String> = b.retry_queue.iter().map(u64::to_string).collect();
                    println!("  retrying  {}", ids.join(", "));
                }
                if !b.failed_items.is_empty() {
                    let ids: Vec<String> = b.failed_items.iter().map(u64::to_string).collect();
                    println!("  failed    {}", self.red.apply_to(ids.join(", ")));
                }
                println!(
                    "  model     {} -> {}",
                    b.settings.model_id, b.settings.target_type
                );
            }
            BatchStatusView::All(batches) if batches.is_empty() => self.note("No batches"),
            BatchStatusView::All(batches) => {
                for b in batches {
                    println!(
                        "{}  {:<9}  {:>5.1}%  {}/{} processed, {} failed",
                        b.id,
                        self.batch_status(b.status),
                        b.progress_percent,
                        b.processed_count,
                        b.total_count,
                        b.failed_count
                    );
                }
            }
        }
    }

    pub fn stats(&self, stats: &QueueStats, processor: &ProcessorStatus) {
        #[derive(Serialize)]
        struct Combined<'a> {
            queue: &'a QueueStats,
            processor: &'a ProcessorStatus,
        }
        if self.as_json(&Combined {
            queue: stats,
            processor,
        }) {
            return;
        }
        println!("{}", self.bold.apply_to("Queue"));
        println!(
            "  batches   {} total, {} pending, {} completed, {} cancelled",
            stats.total_batches,
            stats.pending_batches,
            stats.completed_batches,
            stats.cancelled_batches
        );
        println!(
            "  items     {} total, {} processed, {} failed, {} queued",
            stats.total_items, stats.processed_items, stats.failed_items, stats.queued_items
        );
        println!("{}", self.bold.apply_to("Processor"));
        let lock = match processor.lock_expires_at {
            Some(at) => self.yellow.apply_to(format!("held until {at}")).to_string(),
            None => self.green.apply_to("free").to_string(),
        };
        println!("  lock      {lock}");
        let fmt = |at: Option<chrono::DateTime<chrono::Utc>>| {
            at.map_or_else(|| "-".to_string(), |at| at.to_string())
        };
        println!("  next run  {}", fmt(processor.next_run_at));
        println!("  last tick {}", fmt(processor.last_tick_at));
    }

    pub fn item(&self, report: &ItemReport) {
        if self.as_json(report) {
            return;
        }
        let style = match report.status {
            ItemStatus::Completed => &self.green,
            ItemStatus::Failed => &self.red,
            _ => &self.yellow,
        };
        println!(
            "Item {} {}",
            self.bold.apply_to(report.item_id),
            style.apply_to(report.status)
        );
        if let Some(batch) = &report.batch_id {
            println!("  batch     {batch}{}", if report.in_queue { " (queued)" } else { "" });
        }
        println!("  failures  {}", report.fail_count);
        if let Some(error) = &report.last_error {
            println!("  error     {}", self.red.apply_to(error));
        }
        if !report.artifact_ids.is_empty() {
            let ids: Vec<String> = report.artifact_ids.iter().map(u64::to_string).collect();
            println!("  artifacts {}", ids.join(", "));
        }
    }

    pub fn retry(&self, result: &RetryResult) {
        if self.as_json(result) {
            return;
        }
        if result.success {
            self.ok(&result.message);
        } else {
            self.fail(&result.message);
        }
    }

    pub fn failed(&self, items: &[FailedItem]) {
        if self.as_json(items) {
            return;
        }
        if items.is_empty() {
            self.ok("No failed items");
            return;
        }
        for item in items {
            let when = item
                .failed_at
                .map_or_else(|| "-".to_string(), |at| at.to_rfc3339());
            println!(
                "{:>8}  {}  x{}  {}",
                item.item_id,
                self.dim.apply_to(when),
                item.fail_count,
                self.red.apply_to(item.last_error.as_deref().unwrap_or(""))
            );
        }
    }

    pub fn cancelled(&self, batch_id: &str, cancelled: bool) {
        if self.as_json(&serde_json::json!({ "batch_id": batch_id, "cancelled": cancelled })) {
            return;
        }
        if cancelled {
            self.ok(format!("Batch {batch_id} cancelled"));
        } else {
            self.note(format!("Batch {batch_id} is not pending"));
        }
    }

    pub fn force_started(&self, started: bool) {
        if self.as_json(&serde_json::json!({ "started": started })) {
            return;
        }
        self.ok("Processing scheduled to start shortly");
    }

    pub fn reaped(&self, report: &ReapReport) {
        if self.as_json(report) {
            return;
        }
        self.ok(format!(
            "{} orphaned draft(s) deleted, {} protected",
            report.deleted, report.protected
        ));
        if report.failed > 0 {
            self.fail(format!("{} deletion(s) failed", report.failed));
        }
    }

    pub fn purged(&self, report: &PurgeReport) {
        if self.as_json(report) {
            return;
        }
        self.ok(format!("{} finished batch(es) purged", report.purged_batches.len()));
        self.reaped(&report.reaped);
    }

    pub fn history(&self, entries: &[ProcessingLogEntry], stats: &AuditStatistics) {
        #[derive(Serialize)]
        struct History<'a> {
            statistics: &'a AuditStatistics,
            entries: &'a [ProcessingLogEntry],
        }
        if self.as_json(&History {
            statistics: stats,
            entries,
        }) {
            return;
        }
        println!(
            "{} {} attempts, {} succeeded, {} failed, {} artifacts ({} in the last 30 days)",
            self.bold.apply_to("History:"),
            stats.total,
            stats.succeeded,
            stats.failed,
            stats.artifacts_created,
            stats.last_30_days
        );
        if let Some(model) = &stats.most_used_model {
            println!("  most used model: {model}");
        }
        for entry in entries {
            let status = match entry.status {
                qagen::audit::AttemptStatus::Completed => self.green.apply_to(entry.status),
                qagen::audit::AttemptStatus::Failed => self.red.apply_to(entry.status),
                qagen::audit::AttemptStatus::Processing => self.yellow.apply_to(entry.status),
            };
            println!(
                "{}  {:>8}  {:<10}  {} artifact(s)  {}",
                self.dim.apply_to(entry.started_at.format("%Y-%m-%d %H:%M")),
                entry.source_item_id,
                status,
                entry.artifact_count,
                entry.error.as_deref().unwrap_or("")
            );
        }
    }

    pub fn cache_stats(&self, stats: &CacheStats) {
        if self.as_json(stats) {
            return;
        }
        println!(
            "{} {} entries, TTL {} hours",
            self.bold.apply_to("Cache:"),
            stats.entries,
            stats.ttl_hours
        );
    }

    pub fn cache_cleared(&self, removed: usize) {
        if self.as_json(&serde_json::json!({ "removed": removed })) {
            return;
        }
        self.ok(format!("{removed} cache entr{} removed", if removed == 1 { "y" } else { "ies" }));
    }
}
