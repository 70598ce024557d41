use std::fmt;
use std::io;

pub(crate) type ViolaResult<T> = Result<T, Error>;

/// Errors that can occur during viola usage
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar file
    Io(io::Error),

    /// JSON parsing failed when loading a grammar.
    Json(serde_json::Error),

    /// A grammar was not found in the registry.
    /// Only happens when asking to tokenize with a grammar we can't find
    GrammarNotFound(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
            Error::GrammarNotFound(name) => write!(f, "grammar '{}' not found", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::GrammarNotFound(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

/// A pattern that failed regex validation while its grammar was loaded.
///
/// These are surfaced to the loader as diagnostics; the offending pattern
/// simply never matches and the rest of the grammar stays usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternError {
    /// The raw pattern text as it appeared in the grammar
    pub pattern: String,
    /// The compile error reported by the regex engine
    pub message: String,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid pattern '{}': {}", self.pattern, self.message)
    }
}
