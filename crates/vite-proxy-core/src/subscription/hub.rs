use dashmap::DashMap;
use rand::RngCore;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{
    notifier::{FilterSubscription, Notifier, PushChannel},
    topics::{self, Topic, TopicCategory, VmLogFilter, VmLogFilterError},
};
use crate::{
    chain::{EventBus, EventReceiver},
    dedup::ActionQueue,
    metrics::MetricsCollector,
    middleware::validation::{address_param, expect_params, ValidationError},
    proxy::errors::{ProxyError, INVALID_REQUEST_CODE, METHOD_NOT_FOUND_CODE, NAMESPACE_ERROR_CODE},
    types::ChainEvent,
    upstream::NodePool,
    utils::{Firing, ViteAddress},
};

/// Upstream topic behind every vmlog subscription.
pub const UPSTREAM_VMLOG_TOPIC: &str = "newVmLog";

pub const DEFAULT_FILTER_DEADLINE: Duration = Duration::from_secs(5 * 60);

const VMLOG_FANOUT_CAPACITY: usize = 1024;

type VmLogFeed = broadcast::Sender<Arc<Value>>;

/// Topic registry behind the `subscribe` namespace.
///
/// Every subscription is a set of listener tasks fed by the event bus (or by a shared upstream
/// vmlog subscription) that hand matching payloads to a [`Notifier`]. Listeners stop when the
/// notifier's close signal is raised: the WebSocket closing for push subscriptions, and
/// uninstall or deadline expiry for filters.
///
/// Upstream vmlog subscriptions are opened once per contract address and shared by every
/// client subscription on that address. They stay open until the upstream stream ends.
pub struct SubscriptionHub {
    bus: EventBus,
    pool: Arc<NodePool>,
    filters: Arc<DashMap<String, Arc<FilterSubscription>>>,
    vmlog_queue: ActionQueue<VmLogFeed>,
    vmlog_feeds: Arc<DashMap<ViteAddress, VmLogFeed>>,
    filter_deadline: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SubscriptionHub {
    #[must_use]
    pub fn new(bus: EventBus, pool: Arc<NodePool>) -> Self {
        Self {
            bus,
            pool,
            filters: Arc::new(DashMap::new()),
            vmlog_queue: ActionQueue::new(),
            vmlog_feeds: Arc::new(DashMap::new()),
            filter_deadline: DEFAULT_FILTER_DEADLINE,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_filter_deadline(mut self, deadline: Duration) -> Self {
        self.filter_deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// `subscribe_subscribe [topic, ...args]` over a WebSocket.
    ///
    /// # Errors
    /// Without a push channel the call fails with -32600, since there is nowhere to deliver.
    /// Unknown topics give -32601; argument and contract checks give -32002.
    pub async fn subscribe(
        &self,
        params: &[Value],
        push: Option<&PushChannel>,
        client: &str,
    ) -> Result<String, ProxyError> {
        let Some((topic, args)) = params.split_first() else {
            return Err(ValidationError::Param(0, "is required").into());
        };
        let topic = topic
            .as_str()
            .ok_or(ValidationError::Param(0, "must be a string"))?;

        let Some(push) = push else {
            return Err(ProxyError::rpc(INVALID_REQUEST_CODE, "Cannot start a subscription with no notifier"));
        };
        let topic = Topic::by_name(topic).ok_or_else(|| not_implemented(topic))?;

        let id = new_subscription_id();
        self.start(topic, args, &id, Notifier::Push(push.clone()), client).await?;
        Ok(id)
    }

    /// `subscribe_<filter method> [...args]`: same topics, consumed by polling.
    ///
    /// # Errors
    /// Same as [`subscribe`](Self::subscribe), minus the notifier requirement.
    pub async fn create_filter(
        &self,
        filter_method: &str,
        args: &[Value],
        client: &str,
    ) -> Result<String, ProxyError> {
        let topic = Topic::by_filter_method(filter_method).ok_or_else(|| not_implemented(filter_method))?;

        let id = new_subscription_id();
        let filter = Arc::new(FilterSubscription::new(id.clone()));
        self.start(topic, args, &id, Notifier::Filter(Arc::clone(&filter)), client).await?;

        self.filters.insert(id.clone(), Arc::clone(&filter));
        self.arm_deadline(&filter);
        self.record_active_filters();
        Ok(id)
    }

    /// Removes a filter. Returns whether it existed.
    pub fn uninstall_filter(&self, id: &str) -> bool {
        match self.filters.remove(id) {
            Some((_, filter)) => {
                filter.close();
                self.record_active_filters();
                true
            }
            None => false,
        }
    }

    /// Drains a filter's cache and extends its life by another deadline period.
    ///
    /// # Errors
    /// Returns `NotFound("Filter not found")` for unknown, uninstalled or expired ids.
    pub fn filter_changes(&self, id: &str) -> Result<Value, ProxyError> {
        let entry = self.filters.get(id).ok_or_else(|| ProxyError::NotFound("Filter not found".to_string()))?;

        let result = entry.drain();
        // Re-armed under the entry lock; an expiry that already fired re-checks it there.
        self.arm_deadline(entry.value());
        drop(entry);
        Ok(json!({ "subscription": id, "result": result }))
    }

    #[must_use]
    pub fn active_filters(&self) -> usize {
        self.filters.len()
    }

    /// Addresses with an open upstream vmlog subscription.
    #[must_use]
    pub fn vmlog_addresses(&self) -> Vec<ViteAddress> {
        self.vmlog_feeds.iter().map(|entry| *entry.key()).collect()
    }

    fn arm_deadline(&self, filter: &Arc<FilterSubscription>) {
        let filters = Arc::clone(&self.filters);
        let metrics = self.metrics.clone();
        let id = filter.id().to_string();
        filter.deadline.arm(self.filter_deadline, move |firing| async move {
            if reap_expired(&filters, &id, firing) {
                debug!(filter = %id, "filter expired");
                if let Some(metrics) = metrics {
                    metrics.record_active_filters(filters.len());
                }
            }
        });
    }

    fn record_active_filters(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_active_filters(self.filters.len());
        }
    }

    /// Validates `args` for `topic` and spawns the listeners that feed `notifier`.
    async fn start(
        &self,
        topic: &'static Topic,
        args: &[Value],
        id: &str,
        notifier: Notifier,
        client: &str,
    ) -> Result<(), ProxyError> {
        info!(client = %client, topic = topic.name, subscription = %id, "Subscribing");

        match topic.category {
            TopicCategory::Snapshot | TopicCategory::Account => {
                expect_params(args, 0)?;
                self.spawn_chain_listener(topic, id, notifier.clone(), None);
            }
            TopicCategory::AccountByAddress | TopicCategory::Unreceived => {
                expect_params(args, 1)?;
                let address = address_param(args, 0)?;
                self.spawn_chain_listener(topic, id, notifier.clone(), Some(address.to_string()));
            }
            TopicCategory::VmLog => {
                let filter = VmLogFilter::parse(args)?;
                self.check_contracts(&filter).await?;

                let mut feeds = Vec::with_capacity(filter.ranges.len());
                for (address, _) in &filter.ranges {
                    feeds.push(self.vmlog_feed(*address, id, client).await?);
                }
                let filter = Arc::new(filter);
                for feed in feeds {
                    tokio::spawn(vmlog_listener(
                        feed.subscribe(),
                        Arc::clone(&filter),
                        id.to_string(),
                        notifier.clone(),
                    ));
                }
            }
        }

        let client = client.to_string();
        let id = id.to_string();
        tokio::spawn(async move {
            notifier.close_signal().closed().await;
            info!(client = %client, topic = topic.name, subscription = %id, "Unsubscribing");
        });
        Ok(())
    }

    fn spawn_chain_listener(
        &self,
        topic: &'static Topic,
        id: &str,
        notifier: Notifier,
        address: Option<String>,
    ) {
        // Subscribed before returning so no event published after the reply is missed.
        let events = self.bus.subscribe();
        let id = id.to_string();
        tokio::spawn(async move {
            let address = address.unwrap_or_default();
            chain_listener(events, &notifier, |event| payload_for(topic, &address, event), &id).await;
        });
    }

    async fn check_contracts(&self, filter: &VmLogFilter) -> Result<(), ProxyError> {
        for (address, _) in &filter.ranges {
            if !address.is_contract() {
                return Err(ProxyError::rpc(NAMESPACE_ERROR_CODE, "invalid address; Not a contract address"));
            }
            let info = self.pool.subscription_node().contract_info(&address.to_string()).await?;
            let has_code = match info.get("code") {
                Some(Value::String(code)) => !code.is_empty(),
                Some(Value::Null) | None => false,
                Some(_) => true,
            };
            if !has_code {
                return Err(ProxyError::rpc(NAMESPACE_ERROR_CODE, "invalid address; Contract does not exist"));
            }
        }
        Ok(())
    }

    /// Shared fan-out of the upstream vmlog subscription for `address`, opened on first use.
    async fn vmlog_feed(&self, address: ViteAddress, id: &str, client: &str) -> Result<VmLogFeed, ProxyError> {
        let feeds = Arc::clone(&self.vmlog_feeds);
        let node = Arc::clone(self.pool.subscription_node());
        debug!(client = %client, subscription = %id, address = %address, "new_vmlog");

        self.vmlog_queue
            .queue_action(&format!("new_vmlog:{address}"), move || async move {
                if let Some(feed) = feeds.get(&address) {
                    return Ok(feed.clone());
                }

                let params = json!({
                    "addressHeightRange": { address.to_string(): { "fromHeight": "0", "toHeight": "0" } }
                });
                let mut upstream = node
                    .subscribe(UPSTREAM_VMLOG_TOPIC, vec![params])
                    .await
                    .map_err(ProxyError::from)?;
                info!(address = %address, subscription = %upstream.id(), "opened upstream vmlog subscription");

                let (feed, _) = broadcast::channel(VMLOG_FANOUT_CAPACITY);
                feeds.insert(address, feed.clone());

                let pump = feed.clone();
                tokio::spawn(async move {
                    while let Some(log) = upstream.next().await {
                        let _ = pump.send(Arc::new(log));
                    }
                    feeds.remove_if(&address, |_, current| current.same_channel(&pump));
                    warn!(address = %address, "upstream vmlog subscription ended");
                });

                Ok(feed)
            })
            .await
    }
}

fn not_implemented(topic: &str) -> ProxyError {
    ProxyError::rpc(METHOD_NOT_FOUND_CODE, format!("Couldn't start subscription; {topic} is not implemented"))
}

/// Evicts a filter whose deadline fired, unless it was polled after `firing` was issued.
fn reap_expired(filters: &DashMap<String, Arc<FilterSubscription>>, id: &str, firing: Firing) -> bool {
    match filters.remove_if(id, |_, filter| filter.deadline.is_current(firing)) {
        Some((_, filter)) => {
            filter.close();
            true
        }
        None => false,
    }
}

fn new_subscription_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("0x{}", hex::encode(bytes))
}

fn payload_for(topic: &Topic, address: &str, event: &ChainEvent) -> Option<Value> {
    match (topic.category, event) {
        (TopicCategory::Snapshot, ChainEvent::SnapshotBlock { height, hash, removed }) => {
            Some(topics::snapshot_payload(topic.version, *height, hash, *removed))
        }
        (TopicCategory::Account, ChainEvent::AccountBlock { hash, removed }) => {
            Some(topics::account_payload(hash, *removed))
        }
        (TopicCategory::AccountByAddress, ChainEvent::ResolvedAccountBlock { block, removed }) => {
            topics::by_address_payload(topic.version, address, block, *removed)
        }
        (TopicCategory::Unreceived, ChainEvent::ResolvedAccountBlock { block, removed }) => {
            topics::unreceived_payload(topic.version, address, block, *removed)
        }
        _ => None,
    }
}

async fn chain_listener<F>(mut events: EventReceiver, notifier: &Notifier, payload: F, id: &str)
where
    F: Fn(&ChainEvent) -> Option<Value>,
{
    let closed = notifier.close_signal().clone();
    loop {
        tokio::select! {
            () = closed.closed() => break,
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(payload) = payload(&event) {
                        notifier.notify(id, &payload);
                    }
                }
                None => break,
            }
        }
    }
}

async fn vmlog_listener(
    mut logs: broadcast::Receiver<Arc<Value>>,
    filter: Arc<VmLogFilter>,
    id: String,
    notifier: Notifier,
) {
    let closed = notifier.close_signal().clone();
    loop {
        tokio::select! {
            () = closed.closed() => break,
            log = logs.recv() => match log {
                Ok(log) => {
                    if filter.matches(&log) {
                        notifier.notify(&id, &log);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(subscription = %id, skipped, "vmlog listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

impl From<VmLogFilterError> for ProxyError {
    fn from(err: VmLogFilterError) -> Self {
        match err {
            VmLogFilterError::Invalid(e) => e.into(),
            VmLogFilterError::InvertedRange => ProxyError::rpc(NAMESPACE_ERROR_CODE, "to height < from height"),
        }
    }
}
