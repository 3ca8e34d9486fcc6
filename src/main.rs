use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seedsched::config::Config;
use seedsched::idgen;
use seedsched::rpc::UrlMeta;

#[derive(Parser)]
#[command(
    name = "seedsched",
    version,
    about = "CDN seeding and scheduler client tooling for P2P distribution",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); defaults plus SEEDSCHED_* variables otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the configuration
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, validate and print the effective configuration as JSON
    Config,

    /// List the configured CDN servers
    Cdns,

    /// Compute the task id of a URL
    TaskId {
        /// Source URL
        url: String,

        /// Expected content digest
        #[arg(long, default_value = "")]
        digest: String,

        /// Tag separating otherwise identical URLs
        #[arg(long, default_value = "")]
        tag: String,

        /// Byte range
        #[arg(long, default_value = "")]
        range: String,

        /// `&`-separated query keys to ignore
        #[arg(long, default_value = "")]
        filter: String,

        /// Business id
        #[arg(long, default_value = "")]
        biz_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = seedsched::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed");
    }

    match cli.command {
        Commands::Config => {
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Cdns => {
            tracing::info!(count = config.cdn.servers.len(), "Listing CDN servers");
            if config.cdn.servers.is_empty() {
                println!("No CDN servers configured; peers fall back to the source");
            }
            for server in &config.cdn.servers {
                println!(
                    "{:<24} {:<16} rpc={:<6} download={:<6} host_uuid={}",
                    server.host_name,
                    server.ip,
                    server.port,
                    server.download_port,
                    idgen::cdn_host_uuid(&server.host_name)
                );
            }
        }

        Commands::TaskId {
            url,
            digest,
            tag,
            range,
            filter,
            biz_id,
        } => {
            let meta = UrlMeta {
                digest,
                tag,
                range,
                filter,
                ..Default::default()
            };
            tracing::debug!(url = %url, meta = ?meta, "Computing task id");
            println!("{}", idgen::task_id_with_biz(&url, &meta, &biz_id));
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?
            .with_env_overrides()?,
        None => Config::from_env()?,
    };
    Ok(config)
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("seedsched=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("seedsched={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
