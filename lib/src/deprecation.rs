//! Deprecated-record resolution.
//!
//! Authority records point at an administrative metadata node through
//! `madsrdf:adminMetadata`; that node carries the `recordStatus`. The set of
//! deprecated nodes is gathered while the input is read, so it is complete
//! before any subject is projected, whichever of the two statements came first.

use std::collections::HashSet;

use crate::consts::{RECORD_STATUS, STATUS_DEPRECATED};
use crate::record::SubjectRecord;
use crate::triple::Triple;

#[derive(Debug, Default, Clone)]
pub struct DeprecatedNodeSet {
    nodes: HashSet<String>,
}

impl DeprecatedNodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one statement in input order. A later status for the same node
    /// replaces an earlier one.
    pub fn observe(&mut self, triple: &Triple) {
        if triple.predicate != RECORD_STATUS {
            return;
        }
        match triple.object.as_deref() {
            Some(STATUS_DEPRECATED) => {
                self.nodes.insert(triple.subject.clone());
            }
            Some(_) => {
                self.nodes.remove(&triple.subject);
            }
            None => {}
        }
    }

    /// Feed an accumulated record, e.g. one read back from a store.
    pub fn observe_record(&mut self, record: &SubjectRecord) {
        if record.is_marked_deprecated() {
            self.nodes.insert(record.subject().to_string());
        }
    }

    pub fn insert(&mut self, node: impl Into<String>) {
        self.nodes.insert(node.into());
    }

    pub fn extend(&mut self, other: DeprecatedNodeSet) {
        self.nodes.extend(other.nodes);
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether the record's admin-metadata target is deprecated.
    pub fn is_deprecated(&self, record: &SubjectRecord) -> bool {
        record
            .deprecation_edge()
            .map_or(false, |(_, target)| self.contains(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::ADMIN_METADATA;
    use crate::record::Predicate;

    fn status(node: &str, value: &str) -> Triple {
        Triple::new(node, RECORD_STATUS, Some(value.to_string()))
    }

    #[test]
    fn observes_only_deprecated_status() {
        let mut set = DeprecatedNodeSet::new();
        set.observe(&status("_:m1", "deprecated"));
        set.observe(&status("_:m2", "new"));
        set.observe(&Triple::new("_:m3", ADMIN_METADATA, Some("deprecated".into())));
        assert!(set.contains("_:m1"));
        assert!(!set.contains("_:m2"));
        assert!(!set.contains("_:m3"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn later_status_wins() {
        let mut set = DeprecatedNodeSet::new();
        set.observe(&status("_:m1", "deprecated"));
        set.observe(&status("_:m1", "revised"));
        assert!(set.is_empty());
    }

    #[test]
    fn resolves_through_admin_metadata() {
        let mut set = DeprecatedNodeSet::new();
        set.insert("_:m1");

        let mut linked = SubjectRecord::new("http://id.loc.gov/authorities/subjects/sh1");
        linked.insert(Predicate::AdminMetadata, "_:m1".into());
        assert!(set.is_deprecated(&linked));

        let mut other = SubjectRecord::new("http://id.loc.gov/authorities/subjects/sh2");
        other.insert(Predicate::AdminMetadata, "_:m2".into());
        assert!(!set.is_deprecated(&other));
        assert!(!set.is_deprecated(&SubjectRecord::new("_:m1")));
    }

    #[test]
    fn observe_record_reads_status() {
        let mut node = SubjectRecord::new("_:m9");
        node.insert(Predicate::RecordStatus, "deprecated".into());
        let mut set = DeprecatedNodeSet::new();
        set.observe_record(&node);
        assert!(set.contains("_:m9"));
    }
}
