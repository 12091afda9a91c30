//! Output-slot bookkeeping for tracked jobs.
//!
//! A job declares up front which node ids it expects images from (its
//! output slots). [`SlotTracker`] records the outcome of each slot as
//! information arrives and guarantees the two invariants both trackers
//! rely on: the finished [`TrackingResult`] always covers exactly the
//! declared slot set, and the first resolution of a slot wins -- a
//! repeated event for an already-settled slot is ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Location of one produced image inside the engine's storage.
///
/// Valid for retrieval via `GET /view` only while the engine retains
/// the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// ComfyUI storage class: `output`, `temp`, or `input`.
    #[serde(default = "default_kind", rename = "type")]
    pub kind: String,
}

fn default_kind() -> String {
    "output".to_string()
}

/// The `images` list a node reports in `executed` frames and in
/// history records.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

impl NodeOutput {
    /// First reported image, if the node produced any.
    pub fn first_image(&self) -> Option<&ImageRef> {
        self.images.first()
    }
}

/// Terminal state of one output slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    /// The engine reported an image for this slot.
    Resolved(ImageRef),
    /// The node executed but produced no image.
    NoImage,
    /// The tracking deadline passed before the slot settled.
    TimedOut,
    /// A lookup for this slot failed, or the event stream died before
    /// the slot settled.
    Failed(String),
}

impl SlotOutcome {
    pub fn image(&self) -> Option<&ImageRef> {
        match self {
            SlotOutcome::Resolved(image) => Some(image),
            _ => None,
        }
    }

    /// Human-readable reason for a slot that did not resolve.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            SlotOutcome::Resolved(_) => None,
            SlotOutcome::NoImage => Some("node executed but produced no image".into()),
            SlotOutcome::TimedOut => Some("timed out waiting for node output".into()),
            SlotOutcome::Failed(reason) => Some(reason.clone()),
        }
    }
}

/// Final outcome of tracking one job: every declared slot, settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingResult {
    slots: BTreeMap<String, SlotOutcome>,
}

impl TrackingResult {
    pub fn get(&self, slot: &str) -> Option<&SlotOutcome> {
        self.slots.get(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SlotOutcome)> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// True when every slot carries a resolved image reference.
    pub fn all_resolved(&self) -> bool {
        self.slots
            .values()
            .all(|o| matches!(o, SlotOutcome::Resolved(_)))
    }
}

impl IntoIterator for TrackingResult {
    type Item = (String, SlotOutcome);
    type IntoIter = std::collections::btree_map::IntoIter<String, SlotOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.slots.into_iter()
    }
}

/// In-progress view of a tracked job's slots.
#[derive(Debug)]
pub struct SlotTracker {
    // None = still pending.
    slots: BTreeMap<String, Option<SlotOutcome>>,
}

impl SlotTracker {
    pub fn new<S: AsRef<str>>(expected: &[S]) -> Self {
        Self {
            slots: expected
                .iter()
                .map(|s| (s.as_ref().to_string(), None))
                .collect(),
        }
    }

    /// True when `slot` is a declared slot that has not settled yet.
    pub fn is_pending(&self, slot: &str) -> bool {
        matches!(self.slots.get(slot), Some(None))
    }

    /// Declared slots that have not settled yet, in slot order.
    pub fn pending(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, outcome)| outcome.is_none())
            .map(|(slot, _)| slot.clone())
            .collect()
    }

    /// Settle a slot. Returns `false` (and records nothing) when the
    /// slot is undeclared or already settled -- first resolution wins.
    pub fn record(&mut self, slot: &str, outcome: SlotOutcome) -> bool {
        match self.slots.get_mut(slot) {
            Some(entry @ None) => {
                *entry = Some(outcome);
                true
            }
            _ => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.slots.values().all(Option::is_some)
    }

    /// Settle every remaining slot with `unresolved` and produce the
    /// final result. The key set is exactly the declared slot set.
    pub fn finish(self, unresolved: SlotOutcome) -> TrackingResult {
        TrackingResult {
            slots: self
                .slots
                .into_iter()
                .map(|(slot, outcome)| (slot, outcome.unwrap_or_else(|| unresolved.clone())))
                .collect(),
        }
    }
}
