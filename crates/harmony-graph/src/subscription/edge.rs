//! # Edge Subscriptions
//!
//! A subscription declares interest in edge events by type, optionally
//! narrowed to a source and/or target node.
//!
//! Construction validates everything up front and fails with
//! `GraphError::InvalidSubscription`:
//!
//! - `id` is `edge-sub-` followed by `[a-z0-9-]+`
//! - `event_types` is non-empty, each name is `[A-Za-z][A-Za-z0-9]*`, no repeats
//! - `direction` is `forward`, `backward`, or `bidirectional`
//! - `priority` is within `0..=100`
//! - node filters are `node-` followed by `[a-z0-9-]+`
//!
//! Identity fields are fixed after construction; only tags and the update
//! time may change.

use crate::primitives::{
    DEFAULT_PRIORITY, MAX_PRIORITY, NODE_ID_PREFIX, SUBSCRIPTION_ID_PREFIX, is_event_type_name,
    is_slug,
};
use crate::GraphError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// DIRECTION
// =============================================================================

/// Propagation direction of an edge event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
    Bidirectional,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
            Direction::Bidirectional => "bidirectional",
        }
    }

    /// Parse a lowercase direction name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "forward" => Some(Direction::Forward),
            "backward" => Some(Direction::Backward),
            "bidirectional" => Some(Direction::Bidirectional),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// An edge-level event raised by the reactive layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EdgeEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node_id: Option<String>,
    /// Direction of propagation, when the emitter knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl EdgeEvent {
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_source(mut self, node_id: impl Into<String>) -> Self {
        self.source_node_id = Some(node_id.into());
        self
    }

    #[must_use]
    pub fn with_target(mut self, node_id: impl Into<String>) -> Self {
        self.target_node_id = Some(node_id.into());
        self
    }

    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

// =============================================================================
// RECORD
// =============================================================================

/// Creation/update times and free-form tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SubscriptionMetadata {
    fn now() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            tags: Vec::new(),
        }
    }
}

/// Unvalidated subscription fields, as read from JSON or assembled in code.
///
/// `EdgeSubscription::from_record` checks them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: String,
    pub event_types: Vec<String>,
    #[serde(default = "default_direction")]
    pub direction: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub source_node_id: Option<String>,
    #[serde(default)]
    pub target_node_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<SubscriptionMetadata>,
}

fn default_direction() -> String {
    Direction::Forward.as_str().to_string()
}

impl SubscriptionRecord {
    pub fn new<I, S>(id: impl Into<String>, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            event_types: event_types.into_iter().map(Into::into).collect(),
            direction: default_direction(),
            priority: None,
            source_node_id: None,
            target_node_id: None,
            metadata: None,
        }
    }

    #[must_use]
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction.as_str().to_string();
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn source(mut self, node_id: impl Into<String>) -> Self {
        self.source_node_id = Some(node_id.into());
        self
    }

    #[must_use]
    pub fn target(mut self, node_id: impl Into<String>) -> Self {
        self.target_node_id = Some(node_id.into());
        self
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeSubscription {
    id: String,
    event_types: BTreeSet<String>,
    direction: Direction,
    priority: u8,
    source_node_id: Option<String>,
    target_node_id: Option<String>,
    metadata: SubscriptionMetadata,
}

fn invalid(message: String) -> GraphError {
    GraphError::InvalidSubscription(message)
}

fn check_node_filter(field: &str, value: Option<&String>) -> Result<(), GraphError> {
    match value {
        Some(id)
            if !id
                .strip_prefix(NODE_ID_PREFIX)
                .is_some_and(is_slug) =>
        {
            Err(invalid(format!(
                "{} '{}' must match {}[a-z0-9-]+",
                field, id, NODE_ID_PREFIX
            )))
        }
        _ => Ok(()),
    }
}

impl EdgeSubscription {
    /// Subscription with default direction and priority.
    pub fn new<I, S>(id: impl Into<String>, event_types: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_record(SubscriptionRecord::new(id, event_types))
    }

    /// Validate a record and build the subscription.
    pub fn from_record(record: SubscriptionRecord) -> Result<Self, GraphError> {
        if !record
            .id
            .strip_prefix(SUBSCRIPTION_ID_PREFIX)
            .is_some_and(is_slug)
        {
            return Err(invalid(format!(
                "id '{}' must match {}[a-z0-9-]+",
                record.id, SUBSCRIPTION_ID_PREFIX
            )));
        }

        if record.event_types.is_empty() {
            return Err(invalid(format!("'{}' declares no event types", record.id)));
        }
        let mut event_types = BTreeSet::new();
        for name in record.event_types {
            if !is_event_type_name(&name) {
                return Err(invalid(format!(
                    "event type '{}' must match [A-Za-z][A-Za-z0-9]*",
                    name
                )));
            }
            if event_types.contains(&name) {
                return Err(invalid(format!("duplicate event type '{}'", name)));
            }
            event_types.insert(name);
        }

        let direction = Direction::parse(&record.direction).ok_or_else(|| {
            invalid(format!(
                "direction '{}' must be forward, backward, or bidirectional",
                record.direction
            ))
        })?;

        let priority = match record.priority {
            None => DEFAULT_PRIORITY,
            Some(p) => u8::try_from(p)
                .ok()
                .filter(|p| *p <= MAX_PRIORITY)
                .ok_or_else(|| {
                    invalid(format!("priority {} must be within 0..={}", p, MAX_PRIORITY))
                })?,
        };

        check_node_filter("source_node_id", record.source_node_id.as_ref())?;
        check_node_filter("target_node_id", record.target_node_id.as_ref())?;

        Ok(Self {
            id: record.id,
            event_types,
            direction,
            priority,
            source_node_id: record.source_node_id,
            target_node_id: record.target_node_id,
            metadata: record.metadata.unwrap_or_else(SubscriptionMetadata::now),
        })
    }

    #[must_use]
    pub fn to_record(&self) -> SubscriptionRecord {
        SubscriptionRecord {
            id: self.id.clone(),
            event_types: self.event_types.iter().cloned().collect(),
            direction: self.direction.as_str().to_string(),
            priority: Some(i64::from(self.priority)),
            source_node_id: self.source_node_id.clone(),
            target_node_id: self.target_node_id.clone(),
            metadata: Some(self.metadata.clone()),
        }
    }

    pub fn to_json(&self) -> Result<String, GraphError> {
        serde_json::to_string(&self.to_record())
            .map_err(|e| GraphError::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let record: SubscriptionRecord = serde_json::from_str(json)
            .map_err(|e| GraphError::DeserializationError(e.to_string()))?;
        Self::from_record(record)
    }

    /// Event type membership, then the optional node filters.
    #[must_use]
    pub fn matches(&self, event: &EdgeEvent) -> bool {
        if !self.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some(source) = &self.source_node_id
            && event.source_node_id.as_ref() != Some(source)
        {
            return false;
        }
        if let Some(target) = &self.target_node_id
            && event.target_node_id.as_ref() != Some(target)
        {
            return false;
        }
        true
    }

    /// Bidirectional subscriptions accept any direction; others need an exact match.
    #[must_use]
    pub fn is_direction_compatible(&self, direction: Direction) -> bool {
        self.direction == Direction::Bidirectional || self.direction == direction
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    /// Add a tag if absent. Returns whether it was added.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        if self.metadata.tags.contains(&tag) {
            return false;
        }
        self.metadata.tags.push(tag);
        self.touch();
        true
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let before = self.metadata.tags.len();
        self.metadata.tags.retain(|t| t != tag);
        let removed = self.metadata.tags.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    /// Set `updated_at` to now.
    pub fn touch(&mut self) {
        self.metadata.updated_at = Utc::now();
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.event_types.iter().map(String::as_str)
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    #[must_use]
    pub fn source_node_id(&self) -> Option<&str> {
        self.source_node_id.as_deref()
    }

    #[must_use]
    pub fn target_node_id(&self) -> Option<&str> {
        self.target_node_id.as_deref()
    }

    #[must_use]
    pub fn metadata(&self) -> &SubscriptionMetadata {
        &self.metadata
    }
}

// =============================================================================
// TESTS
// =============================================================================
