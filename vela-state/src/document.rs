//! State document - the on-disk container for one environment's entries

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vela_core::state::StateEntry;

/// Serialized state for one environment.
///
/// The lineage identifier is fixed at creation and prevents a state file
/// from silently taking over another environment's history; the serial
/// increases on every write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    /// Document format version.
    pub version: u32,
    /// Monotonically increasing write counter.
    pub serial: u64,
    /// Unique identifier for this state lineage.
    pub lineage: String,
    /// Environment these entries belong to.
    pub environment: String,
    /// Entries keyed by logical name; `BTreeMap` keeps the file diffable.
    pub entries: BTreeMap<String, StateEntry>,
}

impl StateDocument {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            environment: environment.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, logical_name: &str) -> Option<&StateEntry> {
        self.entries.get(logical_name)
    }

    /// Insert or replace an entry and bump the serial.
    pub fn upsert(&mut self, entry: StateEntry) {
        self.entries.insert(entry.logical_name.clone(), entry);
        self.serial += 1;
    }

    /// Remove an entry; bumps the serial only if something was removed.
    pub fn remove(&mut self, logical_name: &str) -> Option<StateEntry> {
        let removed = self.entries.remove(logical_name);
        if removed.is_some() {
            self.serial += 1;
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_core::descriptor::ResourceKind;
    use vela_core::state::ResourceStatus;

    fn entry(name: &str) -> StateEntry {
        StateEntry {
            logical_name: name.to_string(),
            kind: ResourceKind::Bucket,
            physical_id: Some(format!("{name}-id")),
            config_hash: "hash".to_string(),
            status: ResourceStatus::Created,
        }
    }

    #[test]
    fn new_document_starts_empty() {
        let doc = StateDocument::new("lab");
        assert_eq!(doc.version, StateDocument::CURRENT_VERSION);
        assert_eq!(doc.serial, 0);
        assert!(!doc.lineage.is_empty());
        assert!(doc.is_empty());
    }

    #[test]
    fn upsert_bumps_serial_and_replaces() {
        let mut doc = StateDocument::new("lab");
        doc.upsert(entry("a"));
        assert_eq!(doc.serial, 1);

        let mut replacement = entry("a");
        replacement.config_hash = "other".to_string();
        doc.upsert(replacement);
        assert_eq!(doc.serial, 2);
        assert_eq!(doc.entries.len(), 1);
        assert_eq!(doc.get("a").unwrap().config_hash, "other");
    }

    #[test]
    fn remove_missing_entry_leaves_serial_alone() {
        let mut doc = StateDocument::new("lab");
        doc.upsert(entry("a"));
        assert!(doc.remove("missing").is_none());
        assert_eq!(doc.serial, 1);
        assert!(doc.remove("a").is_some());
        assert_eq!(doc.serial, 2);
    }

    #[test]
    fn document_round_trips_through_json() {
        let mut doc = StateDocument::new("lab");
        doc.upsert(entry("a"));
        doc.upsert(entry("b"));

        let json = serde_json::to_string_pretty(&doc).unwrap();
        let parsed: StateDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.lineage, doc.lineage);
        assert_eq!(parsed.serial, doc.serial);
        assert_eq!(parsed.entries.len(), 2);
    }
}
