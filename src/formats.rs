use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Cumulative counters. Never decrease within a run and carry over on resume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestStats {
    pub pages_processed: u64,
    pub members_saved: u64,
    pub errors: u64,
}

/// Durable harvest progress, persisted as `state.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestState {
    /// Pages fully processed: all members handled and all relations enqueued.
    pub visited_pages: BTreeSet<String>,
    /// Content keys of members already written to storage.
    pub seen_members: BTreeSet<String>,
    /// Frontier snapshot at the last checkpoint, in FIFO order.
    #[serde(default)]
    pub pending_pages: Vec<String>,
    pub stats: HarvestStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl HarvestState {
    pub fn is_visited(&self, uri: &str) -> bool {
        self.visited_pages.contains(uri)
    }

    pub fn is_seen(&self, key: &str) -> bool {
        self.seen_members.contains(key)
    }
}

/// One converted member, ready for the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub logical_id: String,
    pub payload: serde_json::Value,
}

/// A fetched page after conversion. Only its uri outlives processing.
#[derive(Debug, Clone)]
pub struct Page {
    pub uri: String,
    pub members: Vec<Result<Member, crate::ldes::ConversionError>>,
    pub relations: Vec<String>,
}
