// Error types surfaced by the conversion pipeline

use std::fmt;
use std::path::PathBuf;

/// A statement line that does not match `<subject> <predicate> <object> .`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Malformed statement: {}", self.line.trim_end())
    }
}

impl std::error::Error for ParseError {}

/// A token that matches none of the literal or IRI encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvableValueError {
    pub token: String,
}

impl fmt::Display for UnresolvableValueError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Unable to resolve RDF value: {}", self.token)
    }
}

impl std::error::Error for UnresolvableValueError {}

#[derive(Debug)]
pub struct UnknownVocabularyError {
    pub code: String,
    pub known: Vec<String>,
}

impl fmt::Display for UnknownVocabularyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Unknown vocabulary '{}'; must be one of: {}",
            self.code,
            self.known.join(", ")
        )
    }
}

impl std::error::Error for UnknownVocabularyError {}

/// I/O failure on a named file; attached as context to the underlying error.
#[derive(Debug)]
pub struct FileError {
    pub path: PathBuf,
    pub op: &'static str,
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Failed to {} {}", self.op, self.path.display())
    }
}

impl std::error::Error for FileError {}

#[derive(Debug)]
pub struct StoreLockedError {
    pub path: PathBuf,
}

impl fmt::Display for StoreLockedError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Accumulation store {} is locked by another process",
            self.path.display()
        )
    }
}

impl std::error::Error for StoreLockedError {}
