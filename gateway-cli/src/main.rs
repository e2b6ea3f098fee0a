//! `chat-gateway` binary: runs the HTTP gateway, and administers the
//! providers/accounts/config that back it.
//!
//! Subcommands: `serve` (default), `provider`, `account`, `config`.

use clap::{Parser, Subcommand};
use gateway_cli::log_format::TextWithSpanIds;
use gateway_store::Store;
use gateway_types::{Account, AccountStatus, ApiKey, BalanceStrategy, Credential};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "chat-gateway")]
#[command(about = "OpenAI-compatible gateway multiplexing chat completions across unofficial vendor web-chat endpoints")]
struct Args {
    #[command(subcommand)]
    cmd: Option<Command>,

    /// Path to the encrypted credential store (default: XDG data dir)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP gateway (default when no subcommand is given)
    Serve(ServeArgs),
    /// Manage vendor providers
    Provider {
        #[command(subcommand)]
        cmd: ProviderCommand,
    },
    /// Manage vendor accounts (credentials)
    Account {
        #[command(subcommand)]
        cmd: AccountCommand,
    },
    /// View or edit the gateway's runtime configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Listen address, e.g. 0.0.0.0:8787 (default: the stored config's port)
    #[arg(long, value_name = "ADDR")]
    addr: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ProviderCommand {
    /// List known providers
    List,
    /// Enable a provider
    Enable { id: String },
    /// Disable a provider
    Disable { id: String },
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// List accounts, optionally filtered by provider
    List {
        #[arg(long)]
        provider: Option<String>,
    },
    /// Add an account: one or more `field=value` credential pairs, e.g.
    /// `--credential userToken=sk-...`
    Add {
        provider: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long = "credential", value_name = "FIELD=VALUE")]
        credentials: Vec<String>,
        #[arg(long)]
        daily_limit: Option<u64>,
        #[arg(long)]
        delete_session_after_chat: bool,
    },
    /// Remove an account
    Remove { id: String },
    /// Set an account's status: active | inactive | expired | error
    SetStatus { id: String, status: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the current configuration as JSON
    Show,
    /// Set the listen port
    SetPort { port: u16 },
    /// Set the account balance strategy: round-robin | fill-first | failover
    SetBalanceStrategy { strategy: String },
    /// Require an API key on every request except /health
    SetApiKeyRequired { enabled: bool },
    /// Add an API key accepted by the gate
    AddApiKey { key: String },
    /// Set the per-request vendor retry count
    SetRetryCount { count: u32 },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .event_format(TextWithSpanIds::new())
        .init();
}

fn open_store(db: Option<PathBuf>) -> Result<Arc<Store>, Box<dyn std::error::Error>> {
    let path = match db {
        Some(p) => p,
        None => gateway_cli::default_db_path()?,
    };
    Ok(Arc::new(Store::open(path)?))
}

fn parse_status(s: &str) -> Result<AccountStatus, String> {
    match s.to_ascii_lowercase().as_str() {
        "active" => Ok(AccountStatus::Active),
        "inactive" => Ok(AccountStatus::Inactive),
        "expired" => Ok(AccountStatus::Expired),
        "error" => Ok(AccountStatus::Error),
        other => Err(format!("unknown status '{other}' (expected active|inactive|expired|error)")),
    }
}

fn parse_balance_strategy(s: &str) -> Result<BalanceStrategy, String> {
    match s.to_ascii_lowercase().as_str() {
        "round-robin" | "roundrobin" => Ok(BalanceStrategy::RoundRobin),
        "fill-first" | "fillfirst" => Ok(BalanceStrategy::FillFirst),
        "failover" => Ok(BalanceStrategy::Failover),
        other => Err(format!("unknown balance strategy '{other}' (expected round-robin|fill-first|failover)")),
    }
}

fn parse_credential_pair(spec: &str) -> Result<(String, String), String> {
    spec.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid --credential '{spec}', expected FIELD=VALUE"))
}

async fn run_provider_command(store: &Store, cmd: ProviderCommand) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        ProviderCommand::List => {
            let providers = store.list_providers().await?;
            println!("{}", serde_json::to_string_pretty(&providers)?);
        }
        ProviderCommand::Enable { id } => set_provider_enabled(store, &id, true).await?,
        ProviderCommand::Disable { id } => set_provider_enabled(store, &id, false).await?,
    }
    Ok(())
}

async fn set_provider_enabled(store: &Store, id: &str, enabled: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut provider = store
        .get_provider(id)
        .await?
        .ok_or_else(|| format!("no such provider '{id}'"))?;
    provider.enabled = enabled;
    store.upsert_provider(&provider).await?;
    println!("{id}: enabled={enabled}");
    Ok(())
}

async fn run_account_command(store: &Store, cmd: AccountCommand) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        AccountCommand::List { provider } => {
            let accounts = match provider {
                Some(p) => store.list_accounts_for_provider(&p).await?,
                None => store.list_accounts().await?,
            };
            let redacted: Vec<_> = accounts
                .into_iter()
                .map(|a| {
                    serde_json::json!({
                        "id": a.id,
                        "providerId": a.provider_id,
                        "displayName": a.display_name,
                        "status": a.status,
                        "requestCount": a.request_count,
                        "todayUsed": a.today_used,
                        "dailyLimit": a.daily_limit,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&redacted)?);
        }
        AccountCommand::Add {
            provider,
            id,
            display_name,
            credentials,
            daily_limit,
            delete_session_after_chat,
        } => {
            let id = id.unwrap_or_else(|| format!("{provider}-{}", uuid::Uuid::new_v4()));
            let mut creds = Credential::new();
            for spec in &credentials {
                let (field, value) = parse_credential_pair(spec)?;
                creds.set(field, value);
            }
            let account = Account {
                id: id.clone(),
                provider_id: provider,
                display_name: display_name.unwrap_or_else(|| id.clone()),
                credentials: creds,
                status: AccountStatus::Active,
                last_used_ms: None,
                request_count: 0,
                daily_limit,
                today_used: 0,
                delete_session_after_chat,
                created_at_ms: gateway_types::now_ms(),
            };
            store.upsert_account(&account).await?;
            println!("added account {id}");
        }
        AccountCommand::Remove { id } => {
            store.delete_account(&id).await?;
            println!("removed account {id}");
        }
        AccountCommand::SetStatus { id, status } => {
            let status = parse_status(&status)?;
            store.set_account_status(&id, status).await?;
            println!("{id}: status={status:?}");
        }
    }
    Ok(())
}

async fn run_config_command(store: &Store, cmd: ConfigCommand) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        ConfigCommand::Show => {
            let config = store.get_config().await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommand::SetPort { port } => {
            let mut config = store.get_config().await?;
            config.port = port;
            store.save_config(&config).await?;
            println!("port={port}");
        }
        ConfigCommand::SetBalanceStrategy { strategy } => {
            let strategy = parse_balance_strategy(&strategy)?;
            let mut config = store.get_config().await?;
            config.balance_strategy = strategy;
            store.save_config(&config).await?;
            println!("balanceStrategy={strategy:?}");
        }
        ConfigCommand::SetApiKeyRequired { enabled } => {
            let mut config = store.get_config().await?;
            config.enable_api_key = enabled;
            store.save_config(&config).await?;
            println!("enableApiKey={enabled}");
        }
        ConfigCommand::AddApiKey { key } => {
            let mut config = store.get_config().await?;
            config.api_keys.push(ApiKey {
                key: key.clone(),
                last_used_at_ms: None,
                usage_count: 0,
            });
            store.save_config(&config).await?;
            println!("added API key");
        }
        ConfigCommand::SetRetryCount { count } => {
            let mut config = store.get_config().await?;
            config.retry_count = count;
            store.save_config(&config).await?;
            println!("retryCount={count}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    gateway_config::load_and_apply(gateway_cli::APP_NAME, None::<&std::path::Path>).ok();
    init_logging();

    let args = Args::parse();
    let store = open_store(args.db)?;
    store
        .reconcile_builtin_providers(gateway_core::builtin_providers())
        .await?;

    match args.cmd.unwrap_or(Command::Serve(ServeArgs { addr: None })) {
        Command::Serve(sa) => {
            if let Err(e) = gateway_server::run_serve(sa.addr.as_deref(), store).await {
                eprintln!("chat-gateway: serve error: {e}");
                std::process::exit(1);
            }
        }
        Command::Provider { cmd } => run_provider_command(&store, cmd).await?,
        Command::Account { cmd } => run_account_command(&store, cmd).await?,
        Command::Config { cmd } => run_config_command(&store, cmd).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_accepts_known_values_case_insensitively() {
        assert!(matches!(parse_status("Active"), Ok(AccountStatus::Active)));
        assert!(matches!(parse_status("EXPIRED"), Ok(AccountStatus::Expired)));
        assert!(parse_status("bogus").is_err());
    }

    #[test]
    fn parse_balance_strategy_accepts_known_values() {
        assert!(matches!(parse_balance_strategy("failover"), Ok(BalanceStrategy::Failover)));
        assert!(matches!(parse_balance_strategy("fill-first"), Ok(BalanceStrategy::FillFirst)));
        assert!(parse_balance_strategy("nope").is_err());
    }

    #[test]
    fn parse_credential_pair_splits_on_first_equals() {
        let (k, v) = parse_credential_pair("jwt=a.b=c").unwrap();
        assert_eq!(k, "jwt");
        assert_eq!(v, "a.b=c");
        assert!(parse_credential_pair("no-equals-sign").is_err());
    }
}
