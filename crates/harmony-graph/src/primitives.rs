//! # Kernel Primitives
//!
//! Fixed constants shared by the kernel components.
//! Runtime-tunable values have a matching field in `EngineConfig`; the
//! constants here are their defaults.

/// Default cap on retained snapshots before FIFO eviction.
pub const DEFAULT_MAX_SNAPSHOTS: usize = 100;

/// Default node budget for a merged stage during plan optimization.
pub const DEFAULT_MAX_PARALLELISM: usize = 4;

/// Default priority assigned to a subscription that does not declare one.
pub const DEFAULT_PRIORITY: u8 = 50;

/// Highest allowed subscription priority (inclusive).
pub const MAX_PRIORITY: u8 = 100;

/// Required prefix of every edge subscription id.
pub const SUBSCRIPTION_ID_PREFIX: &str = "edge-sub-";

/// Required prefix of node ids used as subscription filters.
pub const NODE_ID_PREFIX: &str = "node-";

/// Prefix of generated snapshot ids.
pub const SNAPSHOT_ID_PREFIX: &str = "snap";

/// Prefix of generated stage ids.
pub const STAGE_ID_PREFIX: &str = "stage";

/// Marker written in place of custom validators in schema exports.
pub const CUSTOM_VALIDATOR_MARKER: &str = "[custom validator]";

/// Check that `rest` matches `[a-z0-9-]+`.
#[must_use]
pub(crate) fn is_slug(rest: &str) -> bool {
    !rest.is_empty()
        && rest
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Check that `name` matches `^[A-Za-z][A-Za-z0-9]*$`.
#[must_use]
pub(crate) fn is_event_type_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(first) if first.is_ascii_alphabetic() => bytes.all(|b| b.is_ascii_alphanumeric()),
        _ => false,
    }
}
