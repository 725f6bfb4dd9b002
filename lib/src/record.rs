//! Per-subject attribute accumulation.
//!
//! A [`SubjectRecord`] collects the recognized predicates of one subject.
//! Singular predicates keep the last value seen; multi-valued predicates keep
//! a deduplicated set. [`SubjectAccumulator`] turns a subject-ordered stream
//! of triples into one record per maximal run of equal subjects.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::consts::{
    ADMIN_METADATA, ALT_LABEL, AUTHORITATIVE_LABEL, LABEL, PREF_LABEL, RECORD_STATUS,
    STATUS_DEPRECATED, TYPE,
};
use crate::triple::Triple;

/// Version of the serialized record layout in accumulation stores.
pub const RECORD_VERSION: u32 = 1;

/// Cardinality class of a recognized predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one logical value per subject; the last occurrence wins.
    Singular,
    /// A deduplicated, order-irrelevant set of values.
    Multi,
}

/// The fixed set of predicates the projection reads. Everything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Predicate {
    AdminMetadata,
    RecordStatus,
    AuthoritativeLabel,
    Label,
    Type,
    AltLabel,
    PrefLabel,
}

impl Predicate {
    pub const ALL: [Predicate; 7] = [
        Predicate::AdminMetadata,
        Predicate::RecordStatus,
        Predicate::AuthoritativeLabel,
        Predicate::Label,
        Predicate::Type,
        Predicate::AltLabel,
        Predicate::PrefLabel,
    ];

    pub fn from_iri(iri: &str) -> Option<Self> {
        Predicate::ALL.into_iter().find(|p| p.iri() == iri)
    }

    pub fn iri(self) -> &'static str {
        match self {
            Predicate::AdminMetadata => ADMIN_METADATA,
            Predicate::RecordStatus => RECORD_STATUS,
            Predicate::AuthoritativeLabel => AUTHORITATIVE_LABEL,
            Predicate::Label => LABEL,
            Predicate::Type => TYPE,
            Predicate::AltLabel => ALT_LABEL,
            Predicate::PrefLabel => PREF_LABEL,
        }
    }

    pub fn cardinality(self) -> Cardinality {
        match self {
            Predicate::AdminMetadata
            | Predicate::RecordStatus
            | Predicate::AuthoritativeLabel
            | Predicate::Label => Cardinality::Singular,
            Predicate::Type | Predicate::AltLabel | Predicate::PrefLabel => Cardinality::Multi,
        }
    }
}

/// Outcome of offering a triple to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Added {
    Recorded,
    /// Predicate outside the recognized set.
    Unrecognized,
    /// Object had no usable value (non-English literal).
    NoValue,
}

/// Accumulated attributes of one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRecord {
    subject: String,
    #[serde(default)]
    singular: BTreeMap<Predicate, String>,
    #[serde(default)]
    multi: BTreeMap<Predicate, BTreeSet<String>>,
}

impl SubjectRecord {
    pub fn new(subject: impl Into<String>) -> Self {
        SubjectRecord {
            subject: subject.into(),
            singular: BTreeMap::new(),
            multi: BTreeMap::new(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn is_empty(&self) -> bool {
        self.singular.is_empty() && self.multi.is_empty()
    }

    /// Apply the cardinality rules for one triple of this subject.
    pub fn add(&mut self, triple: &Triple) -> Added {
        let Some(predicate) = Predicate::from_iri(&triple.predicate) else {
            return Added::Unrecognized;
        };
        let Some(object) = triple.object.as_ref() else {
            return Added::NoValue;
        };
        self.insert(predicate, object.clone());
        Added::Recorded
    }

    pub fn insert(&mut self, predicate: Predicate, value: String) {
        match predicate.cardinality() {
            Cardinality::Singular => {
                self.singular.insert(predicate, value);
            }
            Cardinality::Multi => {
                self.multi.entry(predicate).or_default().insert(value);
            }
        }
    }

    /// Fold `other` (a later slice of the same subject) into this record.
    pub fn merge(&mut self, other: SubjectRecord) {
        self.singular.extend(other.singular);
        for (predicate, values) in other.multi {
            self.multi.entry(predicate).or_default().extend(values);
        }
    }

    pub fn single(&self, predicate: Predicate) -> Option<&str> {
        self.singular.get(&predicate).map(String::as_str)
    }

    pub fn values(&self, predicate: Predicate) -> Option<&BTreeSet<String>> {
        self.multi.get(&predicate).filter(|v| !v.is_empty())
    }

    pub fn admin_metadata(&self) -> Option<&str> {
        self.single(Predicate::AdminMetadata)
    }

    pub fn is_marked_deprecated(&self) -> bool {
        self.single(Predicate::RecordStatus) == Some(STATUS_DEPRECATED)
    }

    /// The `subject → metadata node` edge checked for deprecation.
    pub fn deprecation_edge(&self) -> Option<(&str, &str)> {
        self.admin_metadata().map(|m| (self.subject.as_str(), m))
    }
}

/// Intermediate-store encoding of a record: explicit version plus payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub version: u32,
    pub record: SubjectRecord,
}

impl StoredRecord {
    pub fn encode(record: &SubjectRecord) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Borrowed<'a> {
            version: u32,
            record: &'a SubjectRecord,
        }
        Ok(serde_json::to_vec(&Borrowed {
            version: RECORD_VERSION,
            record,
        })?)
    }

    pub fn decode(bytes: &[u8]) -> Result<SubjectRecord> {
        let stored: StoredRecord = serde_json::from_slice(bytes)?;
        if stored.version != RECORD_VERSION {
            return Err(anyhow::anyhow!(
                "Unsupported stored record version {} (expected {})",
                stored.version,
                RECORD_VERSION
            ));
        }
        Ok(stored.record)
    }
}

/// Groups a subject-ordered triple stream into records.
///
/// Exactly one record is open at a time: it is emitted as soon as a triple
/// with a different subject arrives, or when the input ends. Subjects whose
/// triples were all ignored still produce an (empty) record.
pub struct SubjectAccumulator<I> {
    triples: I,
    open: Option<SubjectRecord>,
    done: bool,
}

impl<I> SubjectAccumulator<I>
where
    I: Iterator<Item = Result<Triple>>,
{
    pub fn new(triples: I) -> Self {
        SubjectAccumulator {
            triples,
            open: None,
            done: false,
        }
    }
}

impl<I> Iterator for SubjectAccumulator<I>
where
    I: Iterator<Item = Result<Triple>>,
{
    type Item = Result<SubjectRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let triple = match self.triples.next() {
                Some(Ok(triple)) => triple,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return self.open.take().map(Ok);
                }
            };
            match self.open.as_mut() {
                Some(record) if record.subject == triple.subject => {
                    record.add(&triple);
                }
                _ => {
                    let mut fresh = SubjectRecord::new(triple.subject.clone());
                    fresh.add(&triple);
                    if let Some(finished) = self.open.replace(fresh) {
                        return Some(Ok(finished));
                    }
                }
            }
        }
    }
}
