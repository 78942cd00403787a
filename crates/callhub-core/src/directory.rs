//! Live-peer directory.
//!
//! Maps each registered connection to its display name. The mapping itself
//! is private; callers only see snapshots and lookups, so the storage can
//! change without touching the router.

use crate::PeerId;
use crate::protocol::{PeerEntry, PeerStatus};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Record {
    display_name: String,
    /// Position of the first registration; snapshots are ordered by it.
    seq: u64,
}

#[derive(Debug, Default)]
pub struct Directory {
    records: HashMap<PeerId, Record>,
    next_seq: u64,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach or overwrite the display name of `id`. Returns `true` if the
    /// connection was not listed before.
    pub fn register(&mut self, id: &PeerId, display_name: String) -> bool {
        if let Some(record) = self.records.get_mut(id) {
            record.display_name = display_name;
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.insert(id.clone(), Record { display_name, seq });
        true
    }

    /// Drop `id` from the directory, returning its display name if it was
    /// listed.
    pub fn remove(&mut self, id: &PeerId) -> Option<String> {
        self.records.remove(id).map(|r| r.display_name)
    }

    /// Display name of a listed connection. `None` means unreachable.
    pub fn lookup(&self, id: &PeerId) -> Option<&str> {
        self.records.get(id).map(|r| r.display_name.as_str())
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every listed connection, in registration order.
    pub fn snapshot(&self) -> Vec<PeerEntry> {
        let mut rows: Vec<(&PeerId, &Record)> = self.records.iter().collect();
        rows.sort_by_key(|(_, r)| r.seq);
        rows.into_iter()
            .map(|(id, r)| PeerEntry {
                id: id.clone(),
                display_name: r.display_name.clone(),
                status: PeerStatus::Online,
            })
            .collect()
    }

    /// The snapshot as `id` should see it: everyone but itself.
    pub fn snapshot_excluding(&self, id: &PeerId) -> Vec<PeerEntry> {
        let mut rows = self.snapshot();
        rows.retain(|e| &e.id != id);
        rows
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
