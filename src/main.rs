#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::resolve::ResolveArgs;
use webselect::{
    BrowserType, OutputFormat, PageError, Role, SelectorError, Strategy, StructuralClass,
};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_COMMAND_ERROR: i32 = 1;
const EXIT_WEBDRIVER_FAILED: i32 = 4;

#[derive(Parser)]
#[command(name = "webselect")]
#[command(about = "Self-healing selector cache for browser automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding selector records (default: ~/.webselect/selectors)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Engine config file (default: ~/.webselect/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a role on a live page, rediscovering it if the cache has gone stale
    Resolve {
        /// URL to open
        url: String,

        /// Role to resolve (chat_input, submit_button, response_area, ... or any custom tag)
        role: Role,

        /// Browser to drive
        #[arg(short, long, default_value = "firefox")]
        browser: BrowserType,

        /// WebDriver endpoint (default depends on the browser)
        #[arg(long)]
        webdriver_url: Option<String>,

        /// Show the browser window
        #[arg(long)]
        no_headless: bool,

        /// OpenAI-compatible chat completions endpoint
        #[arg(long, default_value = webselect::vision::DEFAULT_API_URL)]
        vision_url: String,

        /// Vision model name
        #[arg(long, default_value = webselect::vision::DEFAULT_MODEL)]
        model: String,

        /// Environment variable holding the API key
        #[arg(long, default_value = "OPENAI_API_KEY")]
        api_key_env: String,

        /// Give up after this many seconds
        #[arg(long, default_value = "120")]
        timeout_secs: u64,

        /// Output format
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// Show the cached record for a domain and role
    Show {
        /// Domain or URL
        domain: String,

        /// Role tag
        role: Role,

        /// Output format
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// List every cached record
    List {
        /// Output format
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// Store a known-good selector, replacing the cached record
    Seed {
        /// Domain or URL
        domain: String,

        /// Role tag
        role: Role,

        /// Selector expression
        expression: String,

        /// How the expression is evaluated
        #[arg(long, default_value = "css")]
        strategy: Strategy,

        /// Structural class used for scoring
        #[arg(long, default_value = "stable-class-based")]
        class: StructuralClass,

        /// Output format
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// Drop the cached record for a domain and role
    Invalidate {
        /// Domain or URL
        domain: String,

        /// Role tag
        role: Role,

        /// Output format
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// List records not validated within the TTL
    Expired {
        /// Override the configured TTL
        #[arg(long)]
        ttl_days: Option<u32>,

        /// Output format
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// List records whose consecutive failures reached the threshold
    Failing {
        /// Override the configured failure threshold
        #[arg(long)]
        threshold: Option<u32>,

        /// Output format
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// Print expired keys, once or periodically
    Sweep {
        /// Keep sweeping at this interval until interrupted
        #[arg(long)]
        interval_secs: Option<u64>,

        /// Drop each expired record as it is reported
        #[arg(long)]
        invalidate: bool,
    },
}

/// Exit code for an error bubbling out of a command
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<SelectorError>() {
        return e.exit_code();
    }
    if err.downcast_ref::<PageError>().is_some() {
        return EXIT_WEBDRIVER_FAILED;
    }
    EXIT_COMMAND_ERROR
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(err) => {
            let exit_code = exit_code_for(&err);

            // JSON on stdout for programmatic consumption
            let error_json = json!({
                "error": true,
                "message": format!("{:#}", err),
                "exit_code": exit_code
            });
            println!(
                "{}",
                serde_json::to_string(&error_json).unwrap_or_else(|_| "{}".to_string())
            );

            eprintln!("Error: {:#}", err);
            std::process::exit(exit_code);
        }
    }
}

async fn run() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webselect=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    let cli = Cli::parse();
    let store_dir = cli.store_dir;
    let config = cli.config;

    match cli.command {
        Commands::Resolve {
            url,
            role,
            browser,
            webdriver_url,
            no_headless,
            vision_url,
            model,
            api_key_env,
            timeout_secs,
            format,
        } => {
            let args = ResolveArgs {
                url,
                role,
                browser,
                webdriver_url,
                no_headless,
                vision_url,
                model,
                api_key_env,
                timeout_secs,
                format,
            };
            commands::resolve::handle_resolve(store_dir, config, args).await?
        }

        Commands::Show {
            domain,
            role,
            format,
        } => commands::records::handle_show(store_dir, domain, role, format).await?,

        Commands::List { format } => commands::records::handle_list(store_dir, format).await?,

        Commands::Seed {
            domain,
            role,
            expression,
            strategy,
            class,
            format,
        } => {
            commands::records::handle_seed(
                store_dir, domain, role, expression, strategy, class, format,
            )
            .await?
        }

        Commands::Invalidate {
            domain,
            role,
            format,
        } => commands::records::handle_invalidate(store_dir, domain, role, format).await?,

        Commands::Expired { ttl_days, format } => {
            commands::records::handle_expired(store_dir, config, ttl_days, format).await?
        }

        Commands::Failing { threshold, format } => {
            commands::records::handle_failing(store_dir, config, threshold, format).await?
        }

        Commands::Sweep {
            interval_secs,
            invalidate,
        } => commands::records::handle_sweep(store_dir, config, interval_secs, invalidate).await?,
    }

    Ok(())
}
