mod cli;
mod ui;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;

use cli::{CacheAction, Cli, Command};
use qagen::audit::AuditJournal;
use qagen::cache::ContentCache;
use qagen::config::{BatchSettings, QagenConfig};
use qagen::driver::{Collaborators, Driver};
use qagen::library::Library;
use qagen::llm::{HttpChatClient, TransformationClient};
use qagen::logging;
use qagen::pipeline::Pipeline;
use qagen::runner::Runner;
use qagen::store::{FileStore, StateStore};
use qagen::trigger::MarksTrigger;
use ui::{Printer, TickProgress};

/// Everything a command needs, wired from the configuration.
struct App {
    driver: Driver<HttpChatClient>,
    audit: Arc<AuditJournal>,
}

impl App {
    fn open(config: &QagenConfig) -> Result<Self> {
        let store: Arc<dyn StateStore> = Arc::new(
            FileStore::open(&config.state_dir)
                .with_context(|| format!("opening state dir {}", config.state_dir.display()))?,
        );
        let library = Arc::new(
            Library::open(&config.library_path)
                .with_context(|| format!("opening library {}", config.library_path.display()))?,
        );
        let ttl = i64::try_from(config.maintenance.cache_ttl_days)
            .ok()
            .and_then(Duration::try_days)
            .unwrap_or(Duration::MAX);
        let cache = ContentCache::open(&config.state_dir.join("cache.json"), ttl)?;
        let audit = Arc::new(AuditJournal::open(&config.state_dir.join("audit.json"))?);

        let http = HttpChatClient::new(StdDuration::from_secs(config.retry.request_timeout_secs))?;
        let transformer = TransformationClient::new(http, cache, config.retry.clone());
        let pipeline = Pipeline::new(library.clone(), library.clone(), audit.clone(), transformer);
        let trigger = Arc::new(MarksTrigger::new(store.clone()));

        let driver = Driver::new(
            Collaborators {
                store,
                trigger,
                content: library.clone(),
                artifacts: library,
                pipeline,
            },
            config,
        );
        Ok(Self { driver, audit })
    }
}

/// Settings for `admit`: the configured ones with command-line overrides.
fn admit_settings(
    config: &QagenConfig,
    target_type: Option<String>,
    model: Option<String>,
) -> Option<BatchSettings> {
    if target_type.is_none() && model.is_none() {
        return None;
    }
    let mut settings = config.settings.clone();
    if let Some(target_type) = target_type {
        settings.target_type = target_type;
    }
    if let Some(model) = model {
        settings.model_id = model;
    }
    Some(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => QagenConfig::load_from(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => QagenConfig::load()?,
    };
    logging::init(&config.logging, cli.verbose);

    let app = App::open(&config)?;
    let printer = Printer::new(cli.json);
    let driver = &app.driver;

    match cli.command {
        Command::Admit {
            ids,
            target_type,
            model,
        } => {
            let settings = admit_settings(&config, target_type, model);
            printer.admission(&driver.admit_batch(&ids, settings)?);
        }
        Command::Tick => {
            let progress = (!cli.json).then(TickProgress::start);
            let report = driver.tick().await;
            if let Some(progress) = progress {
                progress.finish();
            }
            printer.tick(&report?);
        }
        Command::Run => {
            Runner::new(driver, &config.scheduler, &config.maintenance)
                .with_audit(app.audit.clone())
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "failed to listen for ctrl-c");
                    }
                })
                .await?;
        }
        Command::Status { batch } => {
            printer.status(&driver.get_batch_status(batch.as_deref())?);
        }
        Command::Stats => {
            printer.stats(&driver.queue_stats()?, &driver.processor_status()?);
        }
        Command::Item { id } => printer.item(&driver.item_status(id)?),
        Command::Retry { id } => printer.retry(&driver.retry_failed_item(id)?),
        Command::Failed { limit } => printer.failed(&driver.failed_items(limit)?),
        Command::ForceStart => printer.force_started(driver.force_start()?),
        Command::Cancel { batch } => {
            let cancelled = driver.cancel_batch(&batch)?;
            printer.cancelled(&batch, cancelled);
        }
        Command::Reap => printer.reaped(&driver.reap_orphans()?),
        Command::Purge => printer.purged(&driver.purge_completed_batches()?),
        Command::History { limit } => {
            let limit = limit.unwrap_or(config.maintenance.history_limit);
            printer.history(&app.audit.recent(limit), &app.audit.statistics(Utc::now()));
        }
        Command::Cache { action } => {
            let cache = driver.pipeline().transformer().cache();
            match action {
                CacheAction::Stats => printer.cache_stats(&cache.stats()),
                CacheAction::Clear => printer.cache_cleared(cache.clear()?),
            }
        }
    }
    Ok(())
}
