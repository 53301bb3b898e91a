//! Chain tracking: the latest snapshot tip and the event bus that keeps it current.
//!
//! # Data Flow
//!
//! ```text
//!   subscription node (ws or http filter polling)
//!        │  newSnapshotBlock / newAccountBlock
//!        ▼
//!   ┌──────────────┐   publish    ┌──────────────┐
//!   │  ChainFeed   │ ───────────► │   EventBus   │
//!   └──────────────┘              └──────┬───────┘
//!                                        │ subscribe
//!                     ┌──────────────────┴───────────────────┐
//!                     ▼                                      ▼
//!          ┌────────────────────┐                ┌───────────────────────┐
//!          │ ledger namespace   │                │   SubscriptionHub     │
//!          │ ChainState.update  │                │ topic listeners       │
//!          │ cache warm-up      │                │ (push + poll filters) │
//!          └────────────────────┘                └───────────────────────┘
//! ```
//!
//! Both `ChainState` and `EventBus` are created once at startup and shared by `Arc` (or by
//! clone for the bus, which is a cheap sender handle).

pub mod events;
pub mod state;

pub use events::{EventBus, EventReceiver};
pub use state::{ChainState, SnapshotTip};
