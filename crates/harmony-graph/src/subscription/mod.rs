//! # Subscription Module
//!
//! Priority-ordered matching of edge events to subscribers.

mod edge;
mod registry;

pub use edge::{
    Direction, EdgeEvent, EdgeSubscription, SubscriptionMetadata, SubscriptionRecord,
};
pub use registry::EdgeSubscriptionRegistry;
