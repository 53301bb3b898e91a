//! Live chain events from the subscription node onto the process event bus.
//!
//! ```text
//! subscription node ── newSnapshotBlock ──► SnapshotBlock ───────────────┐
//!                   └─ newAccountBlock ───► AccountBlock ────────────────┤──► EventBus
//!                                              │ ledger_getAccountBlockByHash
//!                                              └──► ResolvedAccountBlock ─┘
//! ```
//!
//! Every stream reconnects with exponential backoff when the node drops it. Other WebSocket
//! nodes get a snapshot subscription whose events are discarded, which keeps their
//! connections warm for forwarded calls.

use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{node::UpstreamNode, pool::NodePool};
use crate::{
    chain::EventBus,
    middleware::validation::parse_height,
    types::{AccountBlock, ChainEvent},
};

pub const SNAPSHOT_BLOCK_TOPIC: &str = "newSnapshotBlock";
pub const ACCOUNT_BLOCK_TOPIC: &str = "newAccountBlock";

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

pub struct ChainFeed {
    pool: Arc<NodePool>,
    bus: EventBus,
}

impl ChainFeed {
    #[must_use]
    pub fn new(pool: Arc<NodePool>, bus: EventBus) -> Self {
        Self { pool, bus }
    }

    /// Starts the feed and keep-alive tasks. They stop when `shutdown` fires.
    #[must_use]
    pub fn start(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let node = Arc::clone(self.pool.subscription_node());
        info!(node = %node.url(), "starting chain feed");
        let mut handles = Vec::new();

        let bus = self.bus.clone();
        handles.push(tokio::spawn(follow(
            Arc::clone(&node),
            SNAPSHOT_BLOCK_TOPIC,
            shutdown.subscribe(),
            move |item| publish_snapshot_block(&bus, &item),
        )));

        let bus = self.bus.clone();
        let pool = Arc::clone(&self.pool);
        handles.push(tokio::spawn(follow(
            node,
            ACCOUNT_BLOCK_TOPIC,
            shutdown.subscribe(),
            move |item| {
                if let Some((hash, removed)) = publish_account_block(&bus, &item) {
                    tokio::spawn(resolve_account_block(Arc::clone(&pool), bus.clone(), hash, removed));
                }
            },
        )));

        for node in self.pool.keepalive_nodes() {
            debug!(node = %node.url(), "starting keep-alive subscription");
            handles.push(tokio::spawn(follow(
                Arc::clone(node),
                SNAPSHOT_BLOCK_TOPIC,
                shutdown.subscribe(),
                |_| {},
            )));
        }

        handles
    }
}

/// Keeps one subscription open on `node`, feeding every item to `on_item`.
async fn follow<F>(
    node: Arc<dyn UpstreamNode>,
    topic: &'static str,
    mut shutdown: broadcast::Receiver<()>,
    mut on_item: F,
) where
    F: FnMut(Value) + Send + 'static,
{
    let mut reconnect_delay = INITIAL_RECONNECT_DELAY;

    loop {
        let attempt = tokio::select! {
            _ = shutdown.recv() => break,
            attempt = node.subscribe(topic, Vec::new()) => attempt,
        };

        match attempt {
            Ok(mut subscription) => {
                info!(node = %node.url(), topic, subscription = %subscription.id(), "subscribed");
                reconnect_delay = INITIAL_RECONNECT_DELAY;
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => {
                            subscription.close();
                            return;
                        }
                        item = subscription.next() => match item {
                            Some(item) => on_item(item),
                            None => {
                                warn!(node = %node.url(), topic, "subscription ended, resubscribing");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                error!(
                    node = %node.url(),
                    topic,
                    error = %e,
                    reconnect_delay_secs = reconnect_delay.as_secs(),
                    "subscription failed, will retry"
                );
            }
        }

        tokio::select! {
            _ = shutdown.recv() => break,
            () = tokio::time::sleep(reconnect_delay) => {}
        }
        reconnect_delay = std::cmp::min(reconnect_delay * 2, MAX_RECONNECT_DELAY);
    }

    debug!(node = %node.url(), topic, "feed task stopped");
}

fn removed_flag(item: &Value) -> bool {
    item.get("removed").and_then(Value::as_bool).unwrap_or(false)
}

fn publish_snapshot_block(bus: &EventBus, item: &Value) {
    let height = item.get("height").and_then(parse_height);
    let hash = item.get("hash").and_then(Value::as_str);
    let (Some(height), Some(hash)) = (height, hash) else {
        warn!(item = %item, "malformed snapshot block notification");
        return;
    };
    bus.publish(ChainEvent::SnapshotBlock {
        height,
        hash: hash.to_string(),
        removed: removed_flag(item),
    });
}

fn publish_account_block(bus: &EventBus, item: &Value) -> Option<(String, bool)> {
    let Some(hash) = item.get("hash").and_then(Value::as_str) else {
        warn!(item = %item, "malformed account block notification");
        return None;
    };
    let removed = removed_flag(item);
    bus.publish(ChainEvent::AccountBlock { hash: hash.to_string(), removed });
    Some((hash.to_string(), removed))
}

async fn resolve_account_block(pool: Arc<NodePool>, bus: EventBus, hash: String, removed: bool) {
    let block = match pool.forward("ledger_getAccountBlockByHash", vec![json!(hash)]).await {
        Ok(Value::Null) => return,
        Ok(block) => block,
        Err(e) => {
            warn!(hash = %hash, error = %e, "failed to resolve account block");
            return;
        }
    };
    match serde_json::from_value::<AccountBlock>(block) {
        Ok(block) => {
            bus.publish(ChainEvent::ResolvedAccountBlock { block: Arc::new(block), removed });
        }
        Err(e) => warn!(hash = %hash, error = %e, "account block has an unexpected shape"),
    }
}
