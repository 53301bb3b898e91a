use serde_json::Value;
use std::sync::Arc;

use crate::{
    middleware::validation::{expect_params, string_param},
    proxy::{connection::ClientConnection, errors::ProxyError},
    subscription::{SubscriptionHub, Topic},
    types::JsonRpcRequest,
};

/// The `subscribe` namespace: push subscriptions and the poll filter methods.
pub struct SubscribeHandler {
    hub: Arc<SubscriptionHub>,
}

impl SubscribeHandler {
    #[must_use]
    pub fn new(hub: Arc<SubscriptionHub>) -> Self {
        Self { hub }
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    /// # Errors
    ///
    /// Validation and hub errors, or -32601 for methods outside the namespace.
    pub async fn handle(&self, request: &JsonRpcRequest, conn: &ClientConnection) -> Result<Value, ProxyError> {
        let client = conn.client_key().unwrap_or("-");
        let params = &request.params;

        match request.action() {
            "subscribe" => Ok(Value::String(self.hub.subscribe(params, conn.push(), client).await?)),
            "uninstallFilter" => {
                expect_params(params, 1)?;
                Ok(Value::Bool(self.hub.uninstall_filter(string_param(params, 0)?)))
            }
            "getFilterChanges" | "getChangesByFilterId" => {
                expect_params(params, 1)?;
                self.hub.filter_changes(string_param(params, 0)?)
            }
            action if Topic::by_filter_method(action).is_some() => {
                Ok(Value::String(self.hub.create_filter(action, params, client).await?))
            }
            _ => Err(ProxyError::MethodNotFound(request.method.clone())),
        }
    }
}
