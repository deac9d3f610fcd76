//! Deal history records
//!
//! Every mutation of a deal leaves one immutable [`HistoryEvent`]. Events of
//! one deal form a SHA256 chain: `genesis → e₁ → e₂ → … → eₙ`, where each
//! `curr_hash` covers the previous hash plus every stored field.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::DealId;

/// `prev_hash` of the first event of a deal
pub const GENESIS_HASH: &str = "genesis";

/// History event kind (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventKind {
    Created,
    Moved,
    Updated,
    Deleted,
    TagAdded,
    TagRemoved,
    FieldChanged,
}

impl HistoryEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Moved => "moved",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::TagAdded => "tag_added",
            Self::TagRemoved => "tag_removed",
            Self::FieldChanged => "field_changed",
        }
    }
}

impl std::fmt::Display for HistoryEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who performed a mutation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Option<i64>,
    pub name: Option<String>,
}

impl Actor {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: Some(name.into()),
        }
    }

    /// Engine-originated records
    pub fn system() -> Self {
        Self {
            id: None,
            name: Some("system".to_string()),
        }
    }
}

/// One entry of a deal's history (immutable once appended)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// UUID v4
    pub id: String,
    pub deal_id: DealId,
    pub kind: HistoryEventKind,
    /// Human readable, e.g. "Moved from 'Lead' to 'Won'"
    pub description: String,
    #[serde(default)]
    pub details: serde_json::Value,
    /// Unix millis, strictly increasing per deal
    pub timestamp: i64,
    pub actor: Actor,
    #[serde(default)]
    pub prev_hash: String,
    #[serde(default)]
    pub curr_hash: String,
}

impl HistoryEvent {
    /// Unsealed event (hashes filled in by [`HistoryEvent::seal`])
    pub fn new(
        deal_id: DealId,
        kind: HistoryEventKind,
        description: impl Into<String>,
        details: serde_json::Value,
        timestamp: i64,
        actor: Actor,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            deal_id,
            kind,
            description: description.into(),
            details,
            timestamp,
            actor,
            prev_hash: String::new(),
            curr_hash: String::new(),
        }
    }

    /// Link this event after `prev_hash` and compute its own hash
    pub fn seal(mut self, prev_hash: impl Into<String>) -> Self {
        self.prev_hash = prev_hash.into();
        self.curr_hash = self.compute_hash();
        self
    }

    /// SHA256 over the previous hash and every stored field
    ///
    /// Variable-length fields are `\x00` separated; optionals carry a tag byte
    /// so `None` and `Some("")` hash differently.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();

        hasher.update(self.prev_hash.as_bytes());
        hasher.update(b"\x00");

        hasher.update(self.id.as_bytes());
        hasher.update(b"\x00");
        hasher.update(self.deal_id.to_le_bytes());
        hasher.update(self.timestamp.to_le_bytes());

        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(b"\x00");
        hasher.update(self.description.as_bytes());
        hasher.update(b"\x00");

        let actor_id = self.actor.id.map(|id| id.to_string());
        hash_optional(&mut hasher, actor_id.as_deref());
        hash_optional(&mut hasher, self.actor.name.as_deref());

        let details_json = serde_json::to_string(&self.details).unwrap_or_default();
        hasher.update(details_json.as_bytes());
        hasher.update(b"\x00");

        format!("{:x}", hasher.finalize())
    }
}

/// Optional field hash: `\x00` = None, `\x01` + bytes = Some
fn hash_optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update(b"\x01");
            hasher.update(v.as_bytes());
        }
        None => {
            hasher.update(b"\x00");
        }
    }
    hasher.update(b"\x00");
}

/// Result of checking one deal's chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub total_events: usize,
    pub chain_intact: bool,
    pub breaks: Vec<ChainBreak>,
}

/// A single break in the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub event_id: String,
    pub expected_prev_hash: String,
    pub actual_prev_hash: String,
    /// Stored `curr_hash` no longer matches the event's content
    pub tampered: bool,
}

/// Verify a deal's events, given in timestamp order
pub fn verify_chain(events: &[HistoryEvent]) -> ChainVerification {
    let mut breaks = Vec::new();
    let mut expected_prev = GENESIS_HASH.to_string();

    for event in events {
        let tampered = event.compute_hash() != event.curr_hash;
        if event.prev_hash != expected_prev || tampered {
            breaks.push(ChainBreak {
                event_id: event.id.clone(),
                expected_prev_hash: expected_prev.clone(),
                actual_prev_hash: event.prev_hash.clone(),
                tampered,
            });
        }
        expected_prev = event.curr_hash.clone();
    }

    ChainVerification {
        total_events: events.len(),
        chain_intact: breaks.is_empty(),
        breaks,
    }
}
