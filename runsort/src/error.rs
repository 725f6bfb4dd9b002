use std::fmt;

/// Errors raised while spilling, reading, or merging sorted runs.
#[derive(Debug)]
pub enum SortError {
    /// Underlying I/O error (open, write, disk full, ...).
    Io(std::io::Error),
    /// Structural problem with inputs or an unsupported feature.
    Invalid(&'static str),
    /// A chunk file failed an integrity or bounds check.
    Corrupt(String),
}

impl fmt::Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortError::Io(e) => write!(f, "{}", e),
            SortError::Invalid(m) => write!(f, "{}", m),
            SortError::Corrupt(m) => write!(f, "{}", m),
        }
    }
}

impl std::error::Error for SortError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SortError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SortError {
    fn from(e: std::io::Error) -> Self {
        SortError::Io(e)
    }
}
