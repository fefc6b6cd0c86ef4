//! Subscription Module
//!
//! Who wants to hear about which keys.
//!
//! ## Responsibilities
//! - Exact-key and prefix subscriptions per session
//! - Matching a written key to every interested session, once each
//! - Purging a session's subscriptions when it disconnects
//!
//! Keys here are already namespaced; the registry never sees logical keys.

mod registry;

pub use registry::{RegistryStats, SessionSubscriptions, SubscriptionRegistry};
