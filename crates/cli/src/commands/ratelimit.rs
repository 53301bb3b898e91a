use clap::Subcommand;
use vite_proxy_core::storage::PersistentCounterStore;

use super::utils::{format_millis, print_info, CliResult};

#[derive(Subcommand)]
pub enum RatelimitCommands {
    /// List persisted counters and pending expiries
    Inspect {
        /// Only print the totals
        #[arg(long)]
        summary: bool,
    },
}

pub async fn handle_ratelimit_command(
    command: RatelimitCommands,
    store: PersistentCounterStore,
) -> CliResult<()> {
    match command {
        RatelimitCommands::Inspect { summary } => {
            let (headline, lines) = inspect(&store, summary).await?;
            print_info(&headline);
            for line in lines {
                println!("{line}");
            }
            Ok(())
        }
    }
}

/// Counters are keyed by `md5(namespace ‖ client)`, so only the hashed key can be shown.
async fn inspect(
    store: &PersistentCounterStore,
    summary: bool,
) -> CliResult<(String, Vec<String>)> {
    let counts = store.counts().await?;
    let pending = store.pending_entries().await;

    let headline =
        format!("{} keys with live admissions, {} pending expiries", counts.len(), pending.len());
    if summary {
        return Ok((headline, Vec::new()));
    }

    let mut lines = vec![String::new(), "[Counters]".to_string()];
    lines.extend(counts.iter().map(|(key, count)| format!("  {}  {count}", key.to_hex())));
    lines.push(String::new());
    lines.push("[Pending expiries]".to_string());
    lines.extend(pending.iter().map(|entry| {
        format!(
            "  {}  key {}  expires {}",
            entry.id_hex(),
            hex::encode(entry.key),
            format_millis(entry.expire_at)
        )
    }));

    Ok((headline, lines))
}
