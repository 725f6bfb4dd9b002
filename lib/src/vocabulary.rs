//! Per-vocabulary projection rules.
//!
//! A [`VocabularyDescriptor`] names the authority and decides how the term
//! type is obtained, whether subjects must use canonical authority URIs, and
//! which term types are vetoed. The built-in table covers the authority dumps
//! we ingest; a JSON file of descriptors can replace it.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::consts::TERM_TYPE_MAPPING;
use crate::errors::{FileError, UnknownVocabularyError};

lazy_static! {
    static ref LOC_AUTHORITY_URI: Regex = Regex::new(r"^https?://.*\.loc\.gov").unwrap();
}

/// How a document's `term_type` is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermType<'a> {
    /// Every document of the vocabulary has this term type.
    Fixed(&'a str),
    /// Look the subject's `rdf:type` values up in an ordered IRI table.
    Detected(&'static [(&'static str, &'static str)]),
}

impl<'a> TermType<'a> {
    /// First table entry (in declaration order) present in `types` wins.
    pub fn resolve(&self, types: Option<&BTreeSet<String>>) -> Option<&'a str> {
        match self {
            TermType::Fixed(term_type) => Some(*term_type),
            TermType::Detected(table) => {
                let types = types?;
                table
                    .iter()
                    .find(|(iri, _)| types.contains(*iri))
                    .map(|(_, term_type)| *term_type)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyDescriptor {
    pub code: String,
    pub authority_name: String,
    /// Fixed term type; when absent the type is detected from `rdf:type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term_type: Option<String>,
    /// Subjects must match this pattern to be projected.
    #[serde(default, with = "serde_regex", skip_serializing_if = "Option::is_none")]
    pub canonical_uri: Option<Regex>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_term_types: Vec<String>,
}

impl VocabularyDescriptor {
    pub fn new(code: &str, authority_name: &str) -> Self {
        VocabularyDescriptor {
            code: code.to_string(),
            authority_name: authority_name.to_string(),
            term_type: None,
            canonical_uri: None,
            excluded_term_types: vec![],
        }
    }

    pub fn with_term_type(mut self, term_type: &str) -> Self {
        self.term_type = Some(term_type.to_string());
        self
    }

    pub fn with_canonical_uri(mut self, pattern: Regex) -> Self {
        self.canonical_uri = Some(pattern);
        self
    }

    pub fn excluding(mut self, term_type: &str) -> Self {
        self.excluded_term_types.push(term_type.to_string());
        self
    }

    pub fn term_type(&self) -> TermType<'_> {
        match &self.term_type {
            Some(fixed) => TermType::Fixed(fixed),
            None => TermType::Detected(&TERM_TYPE_MAPPING),
        }
    }

    /// `true` when the vocabulary does not constrain subject URIs or the
    /// subject matches the canonical pattern.
    pub fn accepts_uri(&self, subject: &str) -> bool {
        self.canonical_uri
            .as_ref()
            .map_or(true, |pattern| pattern.is_match(subject))
    }

    pub fn vetoes(&self, term_type: &str) -> bool {
        self.excluded_term_types.iter().any(|t| t == term_type)
    }
}

/// The immutable descriptor table consulted by the projector.
#[derive(Debug, Clone)]
pub struct Vocabularies {
    descriptors: Vec<VocabularyDescriptor>,
}

impl Default for Vocabularies {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Vocabularies {
    pub fn builtin() -> Self {
        let descriptors = vec![
            VocabularyDescriptor::new(
                "lcgft",
                "Library of Congress Genre/Form Terms for Library and Archival Materials",
            )
            .with_term_type("genreform"),
            VocabularyDescriptor::new("lctgm", "Thesaurus for Graphic Materials")
                .with_term_type("concept"),
            VocabularyDescriptor::new("lcsh", "Library of Congress subject headings")
                .with_canonical_uri(LOC_AUTHORITY_URI.clone())
                .excluding("complex_subject"),
            VocabularyDescriptor::new("naf", "LC/NACO authority file"),
            VocabularyDescriptor::new("aat", "Art and Architecture Thesaurus")
                .with_term_type("concept"),
        ];
        Vocabularies { descriptors }
    }

    pub fn new(descriptors: Vec<VocabularyDescriptor>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for descriptor in &descriptors {
            if !seen.insert(descriptor.code.as_str()) {
                return Err(anyhow::anyhow!(
                    "Duplicate vocabulary code '{}'",
                    descriptor.code
                ));
            }
        }
        Ok(Vocabularies { descriptors })
    }

    /// Load a JSON array of descriptors, replacing the built-in table.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| FileError {
            path: path.to_path_buf(),
            op: "open",
        })?;
        let descriptors: Vec<VocabularyDescriptor> =
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Invalid vocabulary table {}", path.display()))?;
        Self::new(descriptors)
    }

    pub fn get(&self, code: &str) -> Result<&VocabularyDescriptor, UnknownVocabularyError> {
        self.descriptors
            .iter()
            .find(|d| d.code == code)
            .ok_or_else(|| UnknownVocabularyError {
                code: code.to_string(),
                known: self.codes().map(String::from).collect(),
            })
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.code.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &VocabularyDescriptor> {
        self.descriptors.iter()
    }
}
