use clap::Subcommand;
use std::{path::Path, sync::Arc, time::Duration};
use vite_proxy_core::{
    config::AppConfig,
    upstream::{sync_state, HttpNode, UpstreamNode, WsNode, SYNC_STATE_DONE},
};

use super::utils::{print_error, print_info, print_success, CliError, CliResult};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate the current configuration
    Validate {
        /// Path to config file (defaults to config/config.toml)
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,
    },

    /// Show current configuration
    Show {
        /// Path to config file (defaults to config/config.toml)
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,

        /// Show sensitive values (vpow key, database URLs)
        #[arg(long)]
        show_sensitive: bool,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output path for the config file
        #[arg(short, long, default_value = "config/config.toml")]
        output: String,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Ask every configured node for its sync state
    TestNodes {
        /// Path to config file (defaults to config/config.toml)
        #[arg(short, long, default_value = "config/config.toml")]
        file: String,

        /// Timeout in seconds for each node
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },
}

pub async fn handle_config_command(command: ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Validate { file } => validate_config(&file),
        ConfigCommands::Show { file, show_sensitive } => show_config(&file, show_sensitive),
        ConfigCommands::Generate { output, force } => generate_config(&output, force),
        ConfigCommands::TestNodes { file, timeout } => test_nodes(&file, timeout).await,
    }
}

fn load(file: &str) -> CliResult<AppConfig> {
    AppConfig::from_file(file).map_err(|e| CliError::Config(e.to_string()))
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

fn validate_config(file: &str) -> CliResult<()> {
    if !Path::new(file).exists() {
        print_error(&format!("Configuration file not found: {file}"));
        return Err(CliError::Config(format!("File not found: {file}")));
    }

    print_info(&format!("Loading configuration from {file}..."));
    let config = load(file)?;

    print_info("Validating configuration...");
    config.validate().map_err(CliError::Config)?;

    print_success("Configuration is valid!");

    println!("Configuration Summary:");
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Nodes: {}", config.upstreams.nodes.len());
    println!("  vpow: {}", enabled(config.modules.vpow));
    println!("  wallet: {}", enabled(config.modules.wallet));
    println!("  caching: {}", enabled(config.modules.caching));
    println!("  rate_limits: {}", enabled(config.modules.rate_limits));
    println!("  heartbeat: {}", enabled(config.modules.heartbeat));
    println!("  Metrics: {}", enabled(config.metrics.enabled));

    Ok(())
}

fn show_config(file: &str, show_sensitive: bool) -> CliResult<()> {
    let config = load(file)?;
    let hidden = "[hidden - use --show-sensitive to reveal]";
    let sensitive = |value: &str| if show_sensitive { value.to_string() } else { hidden.to_string() };

    println!("Configuration from {file}:");

    println!("\n[Server]");
    println!("  Host: {}", config.server.host);
    println!("  Port: {}", config.server.port);
    println!("  Max Concurrent Requests: {}", config.server.max_concurrent_requests);
    for (name, value) in &config.server.headers {
        println!("  Header: {name}: {value}");
    }

    println!("\n[Upstreams] ({} nodes)", config.upstreams.nodes.len());
    for node in &config.upstreams.nodes {
        println!("  {node}");
    }
    println!("  Request Timeout: {}s", config.upstreams.request_timeout_seconds);
    println!("  Sync Check: {}", config.upstreams.sync_check);

    println!("\n[Modules]");
    println!("  vpow: {}", config.modules.vpow);
    println!("  wallet: {}", config.modules.wallet);
    println!("  caching: {}", config.modules.caching);
    println!("  rate_limits: {}", config.modules.rate_limits);
    println!("  heartbeat: {}", config.modules.heartbeat);

    println!("\n[Rate Limits]");
    let global = config.rate_limits.global;
    let vpow = config.rate_limits.vpow;
    println!("  global: {} per {}", global.max, humantime_window(global.window));
    println!("  vpow: {} per {}", vpow.max, humantime_window(vpow.window));

    println!("\n[vpow]");
    println!("  Endpoint: {}", config.vpow.endpoint);
    println!("  API Key: {}", sensitive(&config.vpow.api_key));

    println!("\n[Storage]");
    println!("  Rate Limit Database: {}", sensitive(&config.storage.rate_limit_database_url));
    println!("  Wallet Database: {}", sensitive(&config.storage.wallet_database_url));

    println!("\n[Timers]");
    println!("  Snapshot Block TTL: {}ms", config.cache.snapshot_block_ttl_ms);
    println!("  Filter Deadline: {}s", config.subscriptions.filter_deadline_seconds);
    println!("  Heartbeat Timeout: {}s", config.heartbeat.timeout_seconds);

    println!("\n[Trusted Proxies]");
    println!("  Fetch Cloudflare: {}", config.trusted_proxies.fetch_cloudflare);
    for cidr in &config.trusted_proxies.extra_cidrs {
        println!("  {cidr}");
    }

    println!("\n[Logging]");
    println!("  Level: {}", config.logging.level);
    println!("  Format: {}", config.logging.format);

    Ok(())
}

fn humantime_window(window: Duration) -> String {
    if window.as_secs() > 0 && window.subsec_nanos() == 0 {
        format!("{}s", window.as_secs())
    } else {
        format!("{}ms", window.as_millis())
    }
}

pub(crate) const SAMPLE_CONFIG: &str = r#"# vite-proxy configuration

[server]
host = "127.0.0.1"
port = 8080
max_concurrent_requests = 1000

[server.headers]
Access-Control-Allow-Origin = "*"

[upstreams]
# The first ws(s):// node carries the subscriptions.
nodes = ["wss://node.vite.net/gvite/ws", "https://node.vite.net/gvite"]
request_timeout_seconds = 30
sync_check = true

[modules]
vpow = false
wallet = false
caching = true
rate_limits = true
heartbeat = true

[rate_limits.global]
max = 500
window = "1m"

[rate_limits.vpow]
max = 50
window = "1h"

[vpow]
# 64 hex characters, required when modules.vpow is enabled.
api_key = ""
endpoint = "https://pow.vitamin.tips"

[storage]
rate_limit_database_url = "sqlite://rate_limits.db"
wallet_database_url = "sqlite://wallets.db"

[cache]
snapshot_block_ttl_ms = 60000

[subscriptions]
filter_deadline_seconds = 300

[heartbeat]
timeout_seconds = 45

[trusted_proxies]
fetch_cloudflare = true
extra_cidrs = []

[metrics]
enabled = true

[logging]
level = "info"
format = "pretty"
"#;

fn generate_config(output: &str, force: bool) -> CliResult<()> {
    if Path::new(output).exists() && !force {
        return Err(CliError::Config(format!(
            "File {output} already exists. Use --force to overwrite."
        )));
    }

    if let Some(parent) = Path::new(output).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, SAMPLE_CONFIG)?;

    print_success(&format!("Sample configuration generated: {output}"));
    print_info("Remember to:");
    print_info("  1. Point upstreams.nodes at your own Vite nodes");
    print_info("  2. Set vpow.api_key before enabling the vpow module");
    print_info("  3. Adjust the rate limits for your traffic");

    Ok(())
}

async fn test_nodes(file: &str, timeout: u64) -> CliResult<()> {
    let config = load(file)?;
    let timeout = Duration::from_secs(timeout);

    print_info(&format!("Testing {} nodes...", config.upstreams.nodes.len()));

    let mut synced = 0;
    let mut failed = 0;

    for url in &config.upstreams.nodes {
        print!("Testing {url}: ");

        let node: Arc<dyn UpstreamNode> = if url.starts_with("ws://") || url.starts_with("wss://") {
            match WsNode::connect(url.as_str(), timeout).await {
                Ok(node) => Arc::new(node),
                Err(e) => {
                    println!("[ERROR] Failed to connect: {e}");
                    failed += 1;
                    continue;
                }
            }
        } else {
            Arc::new(HttpNode::new(url.as_str(), timeout)?)
        };

        let start = std::time::Instant::now();
        match node.request("net_syncInfo", Vec::new()).await {
            Ok(info) => {
                let state = sync_state(&info);
                if state == Some(SYNC_STATE_DONE) {
                    println!("[OK] synced ({}ms)", start.elapsed().as_millis());
                    synced += 1;
                } else {
                    println!("[WARN] not synced, sync info {info}");
                    failed += 1;
                }
            }
            Err(e) => {
                println!("[ERROR] Failed: {e}");
                failed += 1;
            }
        }
    }

    println!("\nTest Results:");
    println!("  [SUCCESS] Synced: {synced}");
    println!("  [ERROR] Failed: {failed}");

    if failed > 0 {
        print_error("Some nodes would be dropped by the startup sync check");
    } else {
        print_success("All nodes are synced!");
    }

    Ok(())
}
