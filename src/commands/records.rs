use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::commands::utils;
use webselect::{
    OutputFormat, RecordKey, Role, SelectorCandidate, SelectorError, SelectorRecord,
    SelectorStore, Strategy, StructuralClass, Sweeper, normalize_domain,
};

pub async fn handle_show(
    store_dir: Option<PathBuf>,
    domain: String,
    role: Role,
    format: OutputFormat,
) -> Result<()> {
    let store = utils::open_store(&utils::store_dir(store_dir)?).await?;

    let record = store.get(&domain, &role).ok_or_else(|| SelectorError::NotFound {
        domain: normalize_domain(&domain),
        role: role.clone(),
        index: None,
    })?;

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&utils::RecordView::from(&record))?
            );
        }
        OutputFormat::Simple => print!("{}", utils::format_record(&record)),
    }
    Ok(())
}

pub async fn handle_list(store_dir: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let store = utils::open_store(&utils::store_dir(store_dir)?).await?;
    utils::print_records(&store.list(), format)
}

/// Manually put a verified selector, replacing whatever is cached
pub async fn handle_seed(
    store_dir: Option<PathBuf>,
    domain: String,
    role: Role,
    expression: String,
    strategy: Strategy,
    class: StructuralClass,
    format: OutputFormat,
) -> Result<()> {
    let store = utils::open_store(&utils::store_dir(store_dir)?).await?;

    let candidate = SelectorCandidate::new(strategy, expression, class).verified();
    let record = SelectorRecord::new(&domain, &role, vec![candidate]);
    info!("Seeding {} with '{}'", record.key(), record.candidates[0].expression);
    store.put(record.clone()).await?;
    store.flush().await?;

    utils::print_records(std::slice::from_ref(&record), format)
}

pub async fn handle_invalidate(
    store_dir: Option<PathBuf>,
    domain: String,
    role: Role,
    format: OutputFormat,
) -> Result<()> {
    let store = utils::open_store(&utils::store_dir(store_dir)?).await?;
    let existed = store.get(&domain, &role).is_some();
    store.invalidate(&domain, &role).await?;
    store.flush().await?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "domain": normalize_domain(&domain),
                "role": role,
                "removed": existed,
            })
        ),
        OutputFormat::Simple if existed => {
            println!("✓ Invalidated {}/{}", normalize_domain(&domain), role)
        }
        OutputFormat::Simple => {
            println!("Nothing cached for {}/{}", normalize_domain(&domain), role)
        }
    }
    Ok(())
}

pub async fn handle_expired(
    store_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    ttl_days: Option<u32>,
    format: OutputFormat,
) -> Result<()> {
    let mut config = utils::load_config(config)?;
    if let Some(days) = ttl_days {
        config.ttl_days = days;
    }
    let store = utils::open_store(&utils::store_dir(store_dir)?).await?;

    let keys: Vec<_> = store.list_expired(config.ttl()).collect();
    utils::print_keys(&keys, format)
}

pub async fn handle_failing(
    store_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    threshold: Option<u32>,
    format: OutputFormat,
) -> Result<()> {
    let config = utils::load_config(config)?;
    let threshold = threshold.unwrap_or(config.failure_threshold);
    let store = utils::open_store(&utils::store_dir(store_dir)?).await?;

    utils::print_keys(&store.list_failing(threshold), format)
}

/// Report expired records, once or every `interval_secs` until Ctrl-C
///
/// With `invalidate`, each reported record is also dropped so the next
/// `resolve` rediscovers it.
pub async fn handle_sweep(
    store_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    interval_secs: Option<u64>,
    invalidate: bool,
) -> Result<()> {
    let config = utils::load_config(config)?;
    let store = utils::open_store(&utils::store_dir(store_dir)?).await?;
    let sweeper = Sweeper::new(
        store.clone(),
        config.ttl(),
        Duration::from_secs(interval_secs.unwrap_or(60).max(1)),
    );

    let cancel = CancellationToken::new();
    if interval_secs.is_some() {
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping sweep");
            }
            interrupt.cancel();
        });
    }

    drain_sweep(&store, sweeper, interval_secs.is_some(), invalidate, cancel).await?;
    store.flush().await?;
    Ok(())
}

/// Print (and optionally invalidate) every key the sweeper reports
///
/// A one-shot sweep ends once its keys are drained; a periodic one runs until
/// `cancel` fires. Returns how many keys were reported.
pub(crate) async fn drain_sweep(
    store: &SelectorStore,
    sweeper: Sweeper,
    periodic: bool,
    invalidate: bool,
    cancel: CancellationToken,
) -> Result<usize> {
    let (tx, mut rx) = mpsc::channel::<RecordKey>(32);
    let handle = if periodic {
        sweeper.spawn(tx, cancel.clone())
    } else {
        tokio::spawn(async move {
            sweeper.sweep_once(&tx).await;
        })
    };

    let mut reported = 0;
    while let Some(key) = rx.recv().await {
        println!("{}", key);
        reported += 1;
        if invalidate {
            store.invalidate(&key.domain, &key.role).await?;
        }
    }

    cancel.cancel();
    let _ = handle.await;
    Ok(reported)
}
