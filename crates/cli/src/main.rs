use clap::{Parser, Subcommand};
use vite_proxy_core::{
    config::AppConfig,
    storage::{PersistentCounterStore, SqliteWalletStore},
};

mod commands;
use commands::{
    handle_config_command, handle_ratelimit_command, handle_wallet_command,
    utils::{CliError, CliResult},
    ConfigCommands, RatelimitCommands, WalletCommands,
};

#[derive(Parser)]
#[command(name = "vite-proxy-cli")]
#[command(about = "vite-proxy CLI - management tool for the Vite RPC proxy")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database URL, overriding the one in the configuration
    #[arg(long, global = true)]
    database: Option<String>,

    /// Configuration file used to find the databases
    #[arg(long, global = true, env = "VITE_PROXY_CONFIG", default_value = "config/config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration Management
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Rate limit store inspection
    #[command(subcommand)]
    Ratelimit(RatelimitCommands),

    /// Wallet store inspection
    #[command(subcommand)]
    Wallet(WalletCommands),
}

fn load_config(path: &str) -> CliResult<AppConfig> {
    AppConfig::from_file(path).map_err(|e| CliError::Config(e.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config(config_command) => {
            handle_config_command(config_command).await?;
        }

        Commands::Ratelimit(command) => {
            let database_url = match cli.database {
                Some(url) => url,
                None => load_config(&cli.config)?.storage.rate_limit_database_url,
            };
            // The proxy owns this database while running; inspect it while the proxy is stopped.
            let store = PersistentCounterStore::open(&database_url).await?;
            handle_ratelimit_command(command, store).await?;
        }

        Commands::Wallet(command) => {
            let database_url = match cli.database {
                Some(url) => url,
                None => load_config(&cli.config)?.storage.wallet_database_url,
            };
            let store = SqliteWalletStore::open(&database_url).await?;
            handle_wallet_command(command, store).await?;
        }
    }

    Ok(())
}
