use anyhow::Context;
use clap::{Parser, Subcommand};
use permstore_lib::logging::init_logging;
use permstore_lib::{AppConfig, Op, Permission, PermissionPatch, PermissionStorage, RequestContext};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "permstore", version, about = "Manage permission records in Elasticsearch")]
struct Cli {
    /// Config file (defaults to ~/.permstore/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the permissions index if it does not exist
    Init,
    /// Print the stored permission for a user
    Get { username: String },
    /// Create or replace a permission from a JSON file
    Put { file: PathBuf },
    /// Change selected fields of an existing permission
    Patch {
        username: String,
        #[arg(long, value_delimiter = ',')]
        acl: Option<Vec<String>>,
        #[arg(long)]
        op: Option<Op>,
        #[arg(long, value_delimiter = ',')]
        indices: Option<Vec<String>>,
    },
    /// Remove a user's permission
    Delete { username: String },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;

    let _guard = init_logging(&config.logging).context("Failed to initialize logging")?;

    // Set up the tokio runtime
    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Command, config: AppConfig) -> anyhow::Result<()> {
    let ctx = RequestContext::with_timeout(Duration::from_secs(config.elasticsearch.timeout_secs));

    // Initialization failure is fatal: nothing below runs without the index.
    let storage = PermissionStorage::connect(&config, &ctx)
        .await
        .context("Failed to initialize permission storage")?;

    match command {
        Command::Init => {
            tracing::info!("Permission index '{}' is ready", storage.settings().index);
        }
        Command::Get { username } => {
            let raw = storage.get(&ctx, &username).await?;
            let value: serde_json::Value = serde_json::from_slice(&raw)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Put { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let permission: Permission = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse permission from {:?}", file))?;
            storage.put(&ctx, &permission).await?;
            println!("stored permission for {}", permission.username);
        }
        Command::Patch {
            username,
            acl,
            op,
            indices,
        } => {
            let patch = PermissionPatch {
                acl: acl.map(|entries| entries.into_iter().collect()),
                op,
                indices,
            };
            storage.patch(&ctx, &username, &patch).await?;
            println!("patched permission for {}", username);
        }
        Command::Delete { username } => {
            storage.delete(&ctx, &username).await?;
            println!("deleted permission for {}", username);
        }
    }

    Ok(())
}
