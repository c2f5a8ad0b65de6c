use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use resilient_client::config::Config;
use resilient_client::logging::init_tracing;
use resilient_client::request::{HttpTransport, Method, Operation, RequestExecutor, RetryPolicy};
use resilient_client::store::PersistentStore;
use resilient_client::CancellationToken;

const PREFERENCES_KEY: &str = "preferences";

#[derive(Parser, Debug)]
#[command(name = "rclient", version, about = "Retrying HTTP client with persisted preferences")]
struct Cli {
    /// Path to the config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one request with retry and backoff
    Fetch {
        /// Absolute URL or path relative to request.base_url
        target: String,
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Request body
        #[arg(short, long)]
        data: Option<String>,
        /// Override retry.max_attempts
        #[arg(long)]
        attempts: Option<u32>,
        /// Deduplication token forwarded as Idempotency-Key
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Inspect or edit persisted preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
}

#[derive(Subcommand, Debug)]
enum PrefsAction {
    Show,
    Set { key: String, value: String },
    Unset { key: String },
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load config")?;

    match cli.command {
        Command::Fetch {
            target,
            method,
            data,
            attempts,
            idempotency_key,
        } => fetch(&config, target, &method, data, attempts, idempotency_key).await,
        Command::Prefs { action } => prefs(&config, action),
    }
}

async fn fetch(
    config: &Config,
    target: String,
    method: &str,
    data: Option<String>,
    attempts: Option<u32>,
    idempotency_key: Option<String>,
) -> Result<()> {
    let method = Method::parse(method).with_context(|| format!("Unknown method '{}'", method))?;

    let mut policy = config.retry_policy()?;
    if let Some(attempts) = attempts {
        policy = RetryPolicy::new(
            attempts,
            policy.base_delay(),
            policy.backoff_multiplier(),
            policy.max_delay(),
        )?
        .with_retryable_statuses(policy.retryable_statuses().to_vec());
    }

    let transport = HttpTransport::from_config(&config.request)?;
    let executor = RequestExecutor::new(Arc::new(transport))
        .with_policy(policy)
        .with_attempt_timeout(config.attempt_timeout());

    let mut operation = Operation::new(method, target);
    if let Some(body) = data {
        operation = operation.with_body(body.into_bytes());
    }
    if let Some(key) = idempotency_key {
        operation = operation.with_idempotency_key(key);
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let response = executor.execute(&operation, None, Some(&cancel)).await?;
    println!("{}", response.status);
    println!("{}", response.text());
    Ok(())
}

fn prefs(config: &Config, action: PrefsAction) -> Result<()> {
    let backing = Arc::new(config.backing_store());
    let prefs: PersistentStore<BTreeMap<String, String>> =
        PersistentStore::new(PREFERENCES_KEY, BTreeMap::new(), backing);

    match action {
        PrefsAction::Show => {
            for (key, value) in prefs.get_state().iter() {
                println!("{} = {}", key, value);
            }
        }
        PrefsAction::Set { key, value } => {
            prefs.update(|current| {
                let mut next = current.clone();
                next.insert(key, value);
                next
            })?;
        }
        PrefsAction::Unset { key } => {
            prefs.update(|current| {
                let mut next = current.clone();
                next.remove(&key);
                next
            })?;
        }
        PrefsAction::Clear => prefs.clear()?,
    }
    Ok(())
}
