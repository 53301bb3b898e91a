//! The `subscribe` namespace: chain-event topics delivered by push or by poll filters.
//!
//! ```text
//! EventBus ──► chain listener ──┐
//!                               ├──► Notifier ──► Push: WebSocket frame
//! upstream newVmLog ──► fan-out ┘             └─► Filter: cache drained by getFilterChanges
//! ```

pub mod hub;
pub mod notifier;
pub mod topics;

pub use hub::SubscriptionHub;
pub use notifier::{CloseSignal, FilterSubscription, Notifier, PushChannel};
pub use topics::{Topic, TopicCategory, VmLogFilter};
