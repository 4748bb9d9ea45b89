use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use rule_store::config::{LoggingConfig, StoreConfig};
use rule_store::service::{ConfigService, PageRequest, TracingNotifier, DEFAULT_PAGE_SIZE};
use rule_store::storage::FileStorage;

/// Manage versioned rate limit rules.
#[derive(Debug, Parser)]
#[command(name = "rule-store", version, about)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the storage directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List rules, sorted by priority
    List {
        #[arg(long)]
        page: Option<i64>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Show one rule
    Get { id: String },
    /// Create a rule from a JSON document ("-" reads stdin)
    Add { file: PathBuf },
    /// Replace a rule's content
    Update { id: String, file: PathBuf },
    /// Delete a rule; its history is kept
    Delete { id: String },
    /// Assign priorities from the given id order
    Reorder {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Restore a rule to an archived version
    Revert { id: String, version_id: String },
    /// List a rule's archived versions, newest first
    Versions {
        id: String,
        #[arg(long)]
        page: Option<i64>,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Convert the legacy single-blob layout
    Migrate,
    /// Dump the full rule set
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a rule document without storing it
    Validate {
        file: PathBuf,
        /// Id allowed to collide with an existing rule
        #[arg(long)]
        exempt: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = StoreConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir.clone() {
        config.storage.data_dir = data_dir;
    }

    init_tracing(&config.logging);
    debug!(version = env!("CARGO_PKG_VERSION"), "Starting rule store");

    let storage = Arc::new(
        FileStorage::open(&config.storage.data_dir)
            .await
            .with_context(|| format!("Failed to open {}", config.storage.data_dir.display()))?,
    );
    info!(
        data_dir = %config.storage.data_dir.display(),
        environment = %config.service.environment,
        "Storage opened"
    );

    let service = ConfigService::start(storage, Arc::new(TracingNotifier), &config.service).await?;

    run(&service, cli.command).await
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(service: &ConfigService<FileStorage>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::List { page, limit } => {
            if page.is_none() && limit.is_none() {
                print_json(&service.get_config().await?)
            } else {
                let request = page_request(page, limit);
                print_json(&service.get_config_page(request).await?)
            }
        }
        Command::Get { id } => match service.get_rule(&id).await? {
            Some(rule) => print_json(&rule),
            None => anyhow::bail!("Rule '{}' not found", id),
        },
        Command::Add { file } => {
            let candidate = read_document(&file).await?;
            print_json(&service.add_rule(candidate).await?)
        }
        Command::Update { id, file } => {
            let candidate = read_document(&file).await?;
            print_json(&service.update_rule(&id, candidate).await?)
        }
        Command::Delete { id } => {
            if !service.delete_rule(&id).await? {
                anyhow::bail!("Rule '{}' not found", id);
            }
            info!(rule_id = %id, "Deleted");
            Ok(())
        }
        Command::Reorder { ids } => print_json(&service.reorder_rules(&ids).await?),
        Command::Revert { id, version_id } => {
            print_json(&service.revert_rule(&id, &version_id).await?)
        }
        Command::Versions { id, page, limit } => {
            if page.is_none() && limit.is_none() {
                print_json(&service.list_versions(&id).await?)
            } else {
                let request = page_request(page, limit);
                print_json(&service.list_versions_page(&id, request).await?)
            }
        }
        Command::Migrate => {
            let outcome = service.migrate_from_old_format().await?;
            info!(?outcome, "Migration finished");
            Ok(())
        }
        Command::Export { output } => {
            let export = service.export_config().await?;
            match output {
                Some(path) => {
                    let body = serde_json::to_vec_pretty(&export)?;
                    tokio::fs::write(&path, body)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!(path = %path.display(), rules = export.rules.len(), "Exported");
                    Ok(())
                }
                None => print_json(&export),
            }
        }
        Command::Validate { file, exempt } => {
            let candidate = read_document(&file).await?;
            let report = service.validate(&candidate, exempt.as_deref()).await?;
            print_json(&report)?;
            if !report.valid {
                anyhow::bail!("Rule is invalid");
            }
            Ok(())
        }
    }
}

fn page_request(page: Option<i64>, limit: Option<i64>) -> PageRequest {
    PageRequest::new(page.unwrap_or(1), limit.unwrap_or(DEFAULT_PAGE_SIZE))
}

async fn read_document(path: &Path) -> anyhow::Result<Value> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?
    };
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
