use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::utils;
use webselect::{
    BrowserType, OpenAiVisionClient, OutputFormat, Role, SelectorResolver, SessionOptions,
    WebDriverPage,
};

pub struct ResolveArgs {
    pub url: String,
    pub role: Role,
    pub browser: BrowserType,
    pub webdriver_url: Option<String>,
    pub no_headless: bool,
    pub vision_url: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub format: OutputFormat,
}

/// Open the page, resolve the role and print the winning selector
///
/// Ctrl-C and `--timeout-secs` both cancel the resolution.
pub async fn handle_resolve(
    store_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    args: ResolveArgs,
) -> Result<()> {
    let config = utils::load_config(config)?;
    let store = utils::open_store(&utils::store_dir(store_dir)?).await?;
    let resolver = SelectorResolver::new(store.clone(), &config);

    let mut vision = OpenAiVisionClient::new(args.vision_url, args.model);
    match std::env::var(&args.api_key_env) {
        Ok(key) => vision = vision.with_api_key(key),
        Err(_) => debug!("{} not set; calling the vision endpoint without a key", args.api_key_env),
    }

    let options = SessionOptions {
        browser: args.browser,
        webdriver_url: args.webdriver_url,
        headless: !args.no_headless,
        ..SessionOptions::default()
    };
    let page = WebDriverPage::connect(&options).await?;
    page.goto(&args.url)
        .await
        .with_context(|| format!("Failed to open {}", args.url))?;

    let cancel = CancellationToken::new();
    let watchdog = {
        let cancel = cancel.clone();
        let timeout = Duration::from_secs(args.timeout_secs);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Interrupted, canceling"),
                _ = tokio::time::sleep(timeout) => warn!("Timed out after {:?}, canceling", timeout),
                _ = cancel.cancelled() => {}
            }
            cancel.cancel();
        })
    };

    let result = resolver
        .resolve(&page, &args.url, &args.role, &vision, &cancel)
        .await;

    cancel.cancel();
    let _ = watchdog.await;
    if let Err(e) = page.close().await {
        debug!("Could not close WebDriver session: {}", e);
    }
    store.flush().await?;

    let resolution = result?;
    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&resolution)?),
        OutputFormat::Simple => {
            println!(
                "{} ({}, score {:.3}, from {:?})",
                resolution.candidate.expression,
                resolution.candidate.strategy,
                resolution.candidate.stability_score(),
                resolution.source
            );
            for attempt in &resolution.attempts {
                println!("  tried {}: {}", attempt.expression, attempt.outcome.label());
            }
        }
    }
    Ok(())
}
