//! Classify command - run the statement classifier on local files.

use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, warn};

use stmtflow_core::detect::{MatchedBy, StatementClassifier};
use stmtflow_core::pdf::{PdfExtractor, PdfProcessor};
use stmtflow_core::text::{DocumentFormat, TextExtractor};
use stmtflow_core::{backend_from_config, ArchiveExpander};

use super::load_config;

/// Arguments for the classify command.
#[derive(Args)]
pub struct ClassifyArgs {
    /// Input files or glob pattern
    #[arg(required = true)]
    input: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Skip OCR for scanned PDFs
    #[arg(long)]
    no_ocr: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Plain text summary
    Text,
}

/// Classification of one local file or archive member.
#[derive(Debug, Serialize)]
struct FileClassification {
    file: String,
    is_bank_statement: bool,
    extracted_name: String,
    matched_by: MatchedBy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pdf_type: Option<String>,
}

pub async fn run(args: ClassifyArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| p.is_file())
        .collect();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    let ocr = if args.no_ocr { None } else { backend_from_config(&config.ocr) };
    let text = TextExtractor::new(config.detection.clone()).with_ocr(ocr);
    if !args.no_ocr && !text.has_ocr() {
        eprintln!(
            "{} OCR unavailable, scanned PDFs are judged by file name only",
            style("!").yellow()
        );
    }
    let classifier = StatementClassifier::new(text);
    let archives = ArchiveExpander::new();
    let scratch = tempfile::tempdir()?;

    let pb = if files.len() > 1 {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")?
                .progress_chars("=>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut results = Vec::new();
    for (index, path) in files.iter().enumerate() {
        if archives.is_archive(path) {
            let dest = scratch.path().join(index.to_string());
            let members = archives.filter_supported(archives.expand(path, &dest));
            debug!("{} expanded to {} supported file(s)", path.display(), members.len());
            for member in members {
                let label = format!(
                    "{}:{}",
                    path.display(),
                    member.strip_prefix(&dest).unwrap_or(&member).display()
                );
                if let Some(result) = classify_file(&classifier, &member, label) {
                    results.push(result);
                }
            }
        } else if let Some(result) = classify_file(&classifier, path, path.display().to_string()) {
            results.push(result);
        }

        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Text => print_text(&results),
    }
    Ok(())
}

fn classify_file(classifier: &StatementClassifier, path: &Path, label: String) -> Option<FileClassification> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| label.clone());

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Cannot read {}: {}", path.display(), e);
            return None;
        }
    };

    let pdf_type = if DocumentFormat::from_filename(&name) == DocumentFormat::Pdf {
        PdfExtractor::from_bytes(&bytes)
            .ok()
            .map(|pdf| format!("{:?}", pdf.analyze()).to_lowercase())
    } else {
        None
    };

    let result = classifier.detect(&bytes, &name);
    Some(FileClassification {
        file: label,
        is_bank_statement: result.is_bank_statement,
        extracted_name: result.extracted_name,
        matched_by: result.matched_by,
        pdf_type,
    })
}

fn print_text(results: &[FileClassification]) {
    for result in results {
        let verdict = if result.is_bank_statement {
            style("statement").green()
        } else {
            style("other").yellow()
        };
        let reason = match result.matched_by {
            MatchedBy::Content { hits } => format!("{} keyword hits", hits),
            MatchedBy::Filename => "file name".to_string(),
            MatchedBy::Nothing => "no match".to_string(),
        };
        println!(
            "{} {} ({}) name: {}",
            verdict, result.file, reason, result.extracted_name
        );
    }

    let statements = results.iter().filter(|r| r.is_bank_statement).count();
    println!();
    println!(
        "{} {} of {} file(s) classified as bank statements",
        style("✓").green(),
        statements,
        results.len()
    );
}
