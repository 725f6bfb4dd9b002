//! Projection of accumulated subject records into search documents.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::consts::LANGUAGE;
use crate::deprecation::DeprecatedNodeSet;
use crate::record::{Predicate, SubjectRecord};
use crate::vocabulary::VocabularyDescriptor;

lazy_static! {
    static ref URI_SCHEME: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*:").unwrap();
}

/// One output line. Field order is the serialized order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub uri: String,
    pub term: String,
    pub term_idx: String,
    pub term_type: String,
    pub record_id: String,
    pub language: String,
    pub authority_code: String,
    pub authority_name: String,
    pub unique_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_term: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_term_idx: Option<Vec<String>>,
}

/// Why a subject produced no document. Variants are listed in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    BlankNode,
    NonCanonicalUri,
    Deprecated,
    MissingTerm,
    MissingTermType,
    VetoedTermType(String),
}

impl Rejection {
    /// Stable name used as the statistics key.
    pub fn name(&self) -> &'static str {
        match self {
            Rejection::BlankNode => "blank_node",
            Rejection::NonCanonicalUri => "non_canonical_uri",
            Rejection::Deprecated => "deprecated",
            Rejection::MissingTerm => "missing_term",
            Rejection::MissingTermType => "missing_term_type",
            Rejection::VetoedTermType(_) => "vetoed_term_type",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rejection::VetoedTermType(term_type) => write!(f, "vetoed term type {}", term_type),
            other => write!(f, "{}", other.name().replace('_', " ")),
        }
    }
}

/// Last path segment of the subject URI, ignoring a trailing slash.
pub fn record_id(subject: &str) -> &str {
    let trimmed = subject.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

pub fn is_blank_node(subject: &str) -> bool {
    !URI_SCHEME.is_match(subject)
}

/// Term precedence: authoritative label, then the first preferred label,
/// then the plain label.
pub fn resolve_term(record: &SubjectRecord) -> Option<&str> {
    record
        .single(Predicate::AuthoritativeLabel)
        .or_else(|| {
            record
                .values(Predicate::PrefLabel)
                .and_then(|labels| labels.iter().next())
                .map(String::as_str)
        })
        .or_else(|| record.single(Predicate::Label))
}

/// Applies one vocabulary's rules against a complete deprecated-node set.
pub struct Projector<'a> {
    vocabulary: &'a VocabularyDescriptor,
    deprecated: &'a DeprecatedNodeSet,
}

impl<'a> Projector<'a> {
    pub fn new(vocabulary: &'a VocabularyDescriptor, deprecated: &'a DeprecatedNodeSet) -> Self {
        Projector {
            vocabulary,
            deprecated,
        }
    }

    pub fn project(&self, record: &SubjectRecord) -> Result<Document, Rejection> {
        let subject = record.subject();
        if is_blank_node(subject) {
            return Err(Rejection::BlankNode);
        }
        if !self.vocabulary.accepts_uri(subject) {
            return Err(Rejection::NonCanonicalUri);
        }
        if self.deprecated.is_deprecated(record) {
            return Err(Rejection::Deprecated);
        }
        let term = resolve_term(record).ok_or(Rejection::MissingTerm)?;
        let term_type = self
            .vocabulary
            .term_type()
            .resolve(record.values(Predicate::Type))
            .ok_or(Rejection::MissingTermType)?;
        if self.vocabulary.vetoes(term_type) {
            return Err(Rejection::VetoedTermType(term_type.to_string()));
        }

        let record_id = record_id(subject);
        let alternate_term: Option<Vec<String>> = record
            .values(Predicate::AltLabel)
            .map(|labels| labels.iter().cloned().collect());
        Ok(Document {
            uri: subject.to_string(),
            term: term.to_string(),
            term_idx: term.to_string(),
            term_type: term_type.to_string(),
            record_id: record_id.to_string(),
            language: LANGUAGE.to_string(),
            authority_code: self.vocabulary.code.clone(),
            authority_name: self.vocabulary.authority_name.clone(),
            unique_id: format!("{}_{}", self.vocabulary.code, record_id),
            alternate_term_idx: alternate_term.clone(),
            alternate_term,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::Vocabularies;

    const GF1: &str = "http://id.loc.gov/authorities/genreForms/gf1";
    const SH1: &str = "http://id.loc.gov/authorities/subjects/sh1";
    const TOPIC: &str = "http://www.loc.gov/mads/rdf/v1#Topic";
    const COMPLEX: &str = "http://www.loc.gov/mads/rdf/v1#ComplexSubject";

    fn project(code: &str, record: &SubjectRecord, deprecated: &DeprecatedNodeSet) -> Result<Document, Rejection> {
        let vocabularies = Vocabularies::builtin();
        let vocabulary = vocabularies.get(code).unwrap();
        Projector::new(vocabulary, deprecated).project(record)
    }

    #[test]
    fn test_genreform_document() {
        let mut record = SubjectRecord::new(GF1);
        record.insert(Predicate::AuthoritativeLabel, "Comic books".into());
        record.insert(Predicate::Type, "http://www.loc.gov/mads/rdf/v1#GenreForm".into());
        let doc = project("lcgft", &record, &DeprecatedNodeSet::new()).unwrap();
        assert_eq!(doc.uri, GF1);
        assert_eq!(doc.term, "Comic books");
        assert_eq!(doc.term_idx, "Comic books");
        assert_eq!(doc.term_type, "genreform");
        assert_eq!(doc.record_id, "gf1");
        assert_eq!(doc.language, "en");
        assert_eq!(doc.unique_id, "lcgft_gf1");
        assert_eq!(doc.alternate_term, None);

        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.starts_with(r#"{"uri":"#));
        assert!(!json.contains("alternate_term"));
    }

    #[test]
    fn test_rejection_order() {
        let empty = DeprecatedNodeSet::new();
        // blank node wins over everything else
        assert_eq!(
            project("lcsh", &SubjectRecord::new("_:b1"), &empty),
            Err(Rejection::BlankNode)
        );
        assert_eq!(
            project("lcsh", &SubjectRecord::new("http://example.org/sh1"), &empty),
            Err(Rejection::NonCanonicalUri)
        );

        let mut deprecated = DeprecatedNodeSet::new();
        deprecated.insert("_:m1");
        let mut record = SubjectRecord::new(SH1);
        record.insert(Predicate::AdminMetadata, "_:m1".into());
        assert_eq!(project("lcsh", &record, &deprecated), Err(Rejection::Deprecated));
        assert_eq!(project("lcsh", &record, &empty), Err(Rejection::MissingTerm));

        record.insert(Predicate::Label, "Trees".into());
        assert_eq!(project("lcsh", &record, &empty), Err(Rejection::MissingTermType));

        record.insert(Predicate::Type, COMPLEX.into());
        assert_eq!(
            project("lcsh", &record, &empty),
            Err(Rejection::VetoedTermType("complex_subject".into()))
        );
        // the same record is fine in a vocabulary without the veto
        assert_eq!(project("naf", &record, &empty).unwrap().term_type, "complex_subject");
    }

    #[test]
    fn test_term_precedence() {
        let mut record = SubjectRecord::new(SH1);
        record.insert(Predicate::Type, TOPIC.into());
        record.insert(Predicate::Label, "plain".into());
        assert_eq!(project("lcsh", &record, &DeprecatedNodeSet::new()).unwrap().term, "plain");
        record.insert(Predicate::PrefLabel, "preferred".into());
        assert_eq!(
            project("lcsh", &record, &DeprecatedNodeSet::new()).unwrap().term,
            "preferred"
        );
        record.insert(Predicate::AuthoritativeLabel, "authoritative".into());
        assert_eq!(
            project("lcsh", &record, &DeprecatedNodeSet::new()).unwrap().term,
            "authoritative"
        );
    }

    #[test]
    fn test_alternate_terms_sorted() {
        let mut record = SubjectRecord::new(SH1);
        record.insert(Predicate::AuthoritativeLabel, "Trees".into());
        record.insert(Predicate::Type, TOPIC.into());
        record.insert(Predicate::AltLabel, "Woody plants".into());
        record.insert(Predicate::AltLabel, "Arboriculture".into());
        let doc = project("lcsh", &record, &DeprecatedNodeSet::new()).unwrap();
        let expected = vec!["Arboriculture".to_string(), "Woody plants".to_string()];
        assert_eq!(doc.alternate_term.as_ref(), Some(&expected));
        assert_eq!(doc.alternate_term_idx, Some(expected));
    }

    #[test]
    fn test_record_id() {
        assert_eq!(record_id(GF1), "gf1");
        assert_eq!(record_id("http://vocab.getty.edu/aat/300011914/"), "300011914");
        assert_eq!(record_id("urn:x"), "urn:x");
        assert!(is_blank_node("_:bnode12"));
        assert!(!is_blank_node("https://id.loc.gov/x"));
    }
}
