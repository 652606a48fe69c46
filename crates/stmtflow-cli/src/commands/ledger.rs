//! Ledger command - show recorded outcomes.

use clap::Args;
use console::style;
use serde_json::json;

use stmtflow_core::ledger::Ledger;
use stmtflow_core::models::{LedgerEntry, Outcome};

use super::load_config;

/// Arguments for the ledger command.
#[derive(Args)]
pub struct LedgerArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// Outcome counts and entries as JSON
    Json,
    /// Entries as CSV
    Csv,
    /// Outcome distribution
    Text,
}

pub async fn run(args: LedgerArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let path = &config.storage.ledger_path;

    if !path.exists() {
        println!("{} No ledger at {}", style("ℹ").blue(), path.display());
        return Ok(());
    }

    let ledger = Ledger::open(path)?;
    let entries = ledger.entries();

    match args.format {
        OutputFormat::Json => {
            let counts: serde_json::Map<String, serde_json::Value> = ledger
                .outcome_counts()
                .into_iter()
                .map(|(outcome, count)| (outcome.as_str().to_string(), json!(count)))
                .collect();
            let report = json!({ "counts": counts, "entries": entries });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Csv => print!("{}", entries_csv(&entries)?),
        OutputFormat::Text => {
            println!("Ledger: {} ({} entries)", path.display(), entries.len());
            for (outcome, count) in ledger.outcome_counts() {
                let label = style(format!("{:<24}", outcome.as_str()));
                let label = if outcome_is_failure(outcome) { label.red() } else { label.green() };
                println!("  {} {}", label, count);
            }
        }
    }
    Ok(())
}

fn outcome_is_failure(outcome: Outcome) -> bool {
    outcome.is_parse_failure()
        || matches!(
            outcome,
            Outcome::UploadFailed
                | Outcome::CompanyExtractionFailed
                | Outcome::ArchiveError
                | Outcome::Error
        )
}

fn entries_csv(entries: &[LedgerEntry]) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "message_id", "file_name", "hash", "outcome", "error"])?;
    for entry in entries {
        wtr.write_record([
            entry.timestamp.to_rfc3339().as_str(),
            entry.message_id.as_str(),
            entry.file_name.as_str(),
            entry.hash.as_deref().unwrap_or(""),
            entry.outcome.as_str(),
            entry.error.as_deref().unwrap_or(""),
        ])?;
    }
    Ok(String::from_utf8(wtr.into_inner()?)?)
}
