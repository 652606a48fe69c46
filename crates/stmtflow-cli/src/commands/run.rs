//! Run command - poll the inbox and process new mail on a schedule.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Args;
use console::style;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use stmtflow_core::models::config::StmtflowConfig;
use stmtflow_core::{backend_from_config, EmailProcessor, EmailReport, Ledger, Outcome, TextExtractor};

use super::load_config;
use crate::adapters::{ChatFieldExtractor, EmlInbox, HttpParsingService, LocalDocumentStore};

/// Arguments for the run command.
#[derive(Args)]
pub struct RunArgs {
    /// Process the inbox once and exit
    #[arg(long)]
    once: bool,
}

pub async fn run(args: RunArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let store = LocalDocumentStore::open(&config.storage.store_root).with_context(|| {
        format!("Document store unusable: {}", config.storage.store_root.display())
    })?;
    info!("Filing into {}", store.root().display());

    let ledger = Ledger::open(&config.storage.ledger_path)?;
    let timeout = Duration::from_secs(config.services.request_timeout_secs);

    let extractor_key = secret(&config.services.extractor_api_key, "services.extractor_api_key")?;
    let extractor = ChatFieldExtractor::new(
        &config.services.extractor_api_url,
        &extractor_key,
        &config.services.extractor_model,
        timeout,
    )?;

    // The parse key is only required when statements are forwarded.
    let parse_key = if config.parsing.enabled {
        secret(&config.services.parse_api_key, "services.parse_api_key")?
    } else {
        String::new()
    };
    let parser = HttpParsingService::new(&config.services.parse_api_url, &parse_key, timeout)?;

    let inbox = EmlInbox::new(&config.mail, &config.storage.download_dir);
    let text = TextExtractor::new(config.detection.clone()).with_ocr(backend_from_config(&config.ocr));
    let interval_secs = config.schedule.interval_secs.max(1);

    let processor = EmailProcessor::new(
        config,
        ledger,
        Arc::new(store),
        Arc::new(parser),
        Arc::new(extractor),
    )
    .with_text_extractor(text);

    if args.once {
        return run_cycle(&processor, &inbox).await;
    }

    println!(
        "{} Watching inbox every {}s (Ctrl-C to stop)",
        style("ℹ").blue(),
        interval_secs
    );
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_cycle(&processor, &inbox).await {
                    error!("Cycle failed: {:#}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("{} Stopped", style("✓").green());
                return Ok(());
            }
        }
    }
}

fn secret(value: &str, key: &str) -> anyhow::Result<String> {
    match StmtflowConfig::resolved_secret(value) {
        Some(secret) => Ok(secret),
        None => bail!("{} is not set (value: {:?})", key, value),
    }
}

async fn run_cycle(processor: &EmailProcessor, inbox: &EmlInbox) -> anyhow::Result<()> {
    let reports = processor.run_cycle(inbox).await?;
    if reports.is_empty() {
        info!("No new mail");
        return Ok(());
    }
    print_cycle(&reports);
    Ok(())
}

fn print_cycle(reports: &[EmailReport]) {
    let outcomes: Vec<Outcome> = reports.iter().flat_map(EmailReport::outcomes).collect();
    let filed = outcomes
        .iter()
        .filter(|o| matches!(o, Outcome::Parsed | Outcome::Success | Outcome::NotBankStatement))
        .count();
    let duplicates = outcomes.iter().filter(|o| **o == Outcome::Duplicate).count();
    let failed = outcomes
        .iter()
        .filter(|o| {
            o.is_parse_failure()
                || matches!(
                    o,
                    Outcome::UploadFailed | Outcome::CompanyExtractionFailed | Outcome::Error
                )
        })
        .count();

    let mark = if failed == 0 { style("✓").green() } else { style("!").red() };
    println!(
        "{} {} email(s): {} filed, {} duplicate, {} failed",
        mark,
        reports.len(),
        filed,
        duplicates,
        failed
    );
}
