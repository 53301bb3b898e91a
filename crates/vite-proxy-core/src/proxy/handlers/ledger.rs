use serde_json::{json, Value};
use std::sync::Arc;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info};

use crate::{
    cache::ResponseCache,
    chain::{ChainState, EventBus},
    middleware::validation::{expect_params, hash_param, height_param},
    proxy::{engine::SharedContext, errors::ProxyError},
    types::{ChainEvent, JsonRpcRequest},
    upstream::NodePool,
};

const BY_HEIGHT_METHOD: &str = "ledger_getSnapshotBlockByHeight";
const BY_HASH_METHOD: &str = "ledger_getSnapshotBlockByHash";

/// Handler for the `ledger` namespace.
///
/// Snapshot block lookups go through the [`ResponseCache`] and the chain tip is answered from
/// [`ChainState`]. Until the first snapshot event arrives the tip methods are forwarded, as is
/// every ledger method not listed here.
pub struct LedgerHandler {
    ctx: Arc<SharedContext>,
    cache: Arc<ResponseCache>,
    chain: Arc<ChainState>,
}

impl LedgerHandler {
    #[must_use]
    pub fn new(ctx: Arc<SharedContext>, cache: Arc<ResponseCache>, chain: Arc<ChainState>) -> Self {
        Self { ctx, cache, chain }
    }

    /// # Errors
    ///
    /// Validation errors for the cached lookups; upstream errors otherwise.
    pub async fn handle(&self, request: &JsonRpcRequest) -> Result<Value, ProxyError> {
        match request.method.as_str() {
            "ledger_getLatestSnapshotHash" | "ledger_getLatestSnapshotChainHash" => match self.chain.hash() {
                Some(hash) => Ok(Value::String(hash)),
                None => self.ctx.forward_to_upstream(request).await,
            },
            "ledger_getSnapshotChainHeight" => match self.chain.height() {
                Some(height) => Ok(Value::String(height.to_string())),
                None => self.ctx.forward_to_upstream(request).await,
            },
            "ledger_getLatestSnapshotBlock" => match self.chain.height() {
                Some(height) => self.snapshot_block_by_height(height).await,
                None => self.ctx.forward_to_upstream(request).await,
            },
            BY_HEIGHT_METHOD => {
                expect_params(&request.params, 1)?;
                self.snapshot_block_by_height(height_param(&request.params, 0)?).await
            }
            BY_HASH_METHOD => {
                expect_params(&request.params, 1)?;
                self.snapshot_block_by_hash(hash_param(&request.params, 0)?).await
            }
            _ => self.ctx.forward_to_upstream(request).await,
        }
    }

    async fn snapshot_block_by_height(&self, height: u64) -> Result<Value, ProxyError> {
        let pool = Arc::clone(&self.ctx.pool);
        self.cache.snapshot_block_by_height(height, move || fetch_by_height(pool, height)).await
    }

    async fn snapshot_block_by_hash(&self, hash: &str) -> Result<Value, ProxyError> {
        let pool = Arc::clone(&self.ctx.pool);
        let owned = hash.to_string();
        self.cache
            .snapshot_block_by_hash(hash, move || async move {
                pool.forward(BY_HASH_METHOD, vec![json!(owned)]).await.map_err(ProxyError::from)
            })
            .await
    }

    /// Follows snapshot events: records the new tip, then fetches the block by height while
    /// holding its by-hash key, so clients asking for it by hash join that fetch.
    #[must_use]
    pub fn start(&self, bus: &EventBus, shutdown: &broadcast::Sender<()>) -> JoinHandle<()> {
        let mut events = bus.subscribe();
        let mut shutdown = shutdown.subscribe();
        let cache = Arc::clone(&self.cache);
        let chain = Arc::clone(&self.chain);
        let pool = Arc::clone(&self.ctx.pool);

        tokio::spawn(async move {
            info!("ledger cache warm-up started");
            loop {
                let event = tokio::select! {
                    _ = shutdown.recv() => break,
                    event = events.recv() => event,
                };
                let Some(event) = event else { break };
                let ChainEvent::SnapshotBlock { height, hash, .. } = event else { continue };

                chain.update(height, hash.clone());
                tokio::spawn(warm(Arc::clone(&cache), Arc::clone(&pool), height, hash));
            }
            debug!("ledger cache warm-up stopped");
        })
    }
}

async fn fetch_by_height(pool: Arc<NodePool>, height: u64) -> Result<Value, ProxyError> {
    Ok(pool.forward(BY_HEIGHT_METHOD, vec![json!(height.to_string())]).await?)
}

async fn warm(cache: Arc<ResponseCache>, pool: Arc<NodePool>, height: u64, hash: String) {
    let filler = Arc::clone(&cache);
    let result = cache
        .under_hash_key(&hash, move || async move {
            filler.snapshot_block_by_height(height, move || fetch_by_height(pool, height)).await
        })
        .await;
    if let Err(e) = result {
        debug!(height, hash = %hash, error = %e, "snapshot block warm-up failed");
    }
}
