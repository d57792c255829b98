use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use webselect::{
    EngineConfig, JsonDirBackend, OutputFormat, RecordKey, SelectorCandidate, SelectorRecord,
    SelectorStore, Strategy, StructuralClass,
};

/// Resolve `--store-dir`, defaulting to `~/.webselect/selectors`
pub fn store_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => JsonDirBackend::default_dir().context("Could not determine home directory"),
    }
}

/// Load `--config`, defaulting to `~/.webselect/config.json`
pub fn load_config(explicit: Option<PathBuf>) -> Result<EngineConfig> {
    let path = match explicit {
        Some(path) => path,
        None => match EngineConfig::default_path() {
            Some(path) => path,
            None => return Ok(EngineConfig::default()),
        },
    };
    Ok(EngineConfig::load(&path)?)
}

pub async fn open_store(dir: &Path) -> Result<Arc<SelectorStore>> {
    let backend = JsonDirBackend::open(dir).await?;
    Ok(Arc::new(SelectorStore::open(Arc::new(backend)).await?))
}

/// A candidate as shown to operators, with its live score
#[derive(Debug, Serialize)]
pub struct CandidateView {
    pub expression: String,
    pub strategy: Strategy,
    pub structural_class: StructuralClass,
    pub success_count: u32,
    pub attempt_count: u32,
    pub score: f64,
}

impl From<&SelectorCandidate> for CandidateView {
    fn from(candidate: &SelectorCandidate) -> Self {
        Self {
            expression: candidate.expression.clone(),
            strategy: candidate.strategy,
            structural_class: candidate.structural_class,
            success_count: candidate.success_count,
            attempt_count: candidate.attempt_count,
            score: candidate.stability_score(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecordView {
    pub domain: String,
    pub role: String,
    pub discovered_at: DateTime<Utc>,
    pub last_validated_at: DateTime<Utc>,
    pub validation_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub candidates: Vec<CandidateView>,
}

impl From<&SelectorRecord> for RecordView {
    fn from(record: &SelectorRecord) -> Self {
        Self {
            domain: record.domain.clone(),
            role: record.role.to_string(),
            discovered_at: record.discovered_at,
            last_validated_at: record.last_validated_at,
            validation_count: record.validation_count,
            failure_count: record.failure_count,
            consecutive_failures: record.consecutive_failures,
            candidates: record.candidates.iter().map(CandidateView::from).collect(),
        }
    }
}

/// Human-readable rendering of one record
pub fn format_record(record: &SelectorRecord) -> String {
    let mut out = format!(
        "{} ({} validations, {} failures, last validated {})\n",
        record.key(),
        record.validation_count,
        record.failure_count,
        record.last_validated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    for (i, candidate) in record.candidates.iter().enumerate() {
        out.push_str(&format!(
            "  {}. [{:.3}] {} ({}, {}/{})\n",
            i + 1,
            candidate.stability_score(),
            candidate.expression,
            candidate.strategy,
            candidate.success_count,
            candidate.attempt_count
        ));
    }
    out
}

pub fn print_records(records: &[SelectorRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let views: Vec<RecordView> = records.iter().map(RecordView::from).collect();
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        OutputFormat::Simple => {
            if records.is_empty() {
                println!("No selector records");
            }
            for record in records {
                print!("{}", format_record(record));
            }
        }
    }
    Ok(())
}

pub fn print_keys(keys: &[RecordKey], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(keys)?),
        OutputFormat::Simple => {
            for key in keys {
                println!("{}", key);
            }
        }
    }
    Ok(())
}
