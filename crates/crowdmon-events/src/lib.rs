//! Event fan-out for the crowd monitor.
//!
//! This crate provides:
//! - A broadcaster with one bounded, drop-oldest buffer per observer
//! - Per-subscription job filters
//! - Replay of the current system status to new observers

pub mod broadcaster;

pub use broadcaster::{EventBroadcaster, Subscription, SubscriptionFilter, DEFAULT_EVENT_BUFFER};
