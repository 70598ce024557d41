use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::error::ViolaResult;

/// A capture group that assigns a scope name to matched text
///
/// # Examples
/// ```json
/// {
///   "1": { "name": "storage.type.function.js" },
///   "2": { "name": "entity.name.function.js" }
/// }
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawCapture {
    /// The scope name to assign to the captured text
    #[serde(default)]
    pub name: Option<String>,
}

pub type RawCaptures = BTreeMap<String, RawCapture>;

/// One pattern node of a grammar document.
///
/// The grammar format is permissive: a node is a match pattern, a begin/end
/// region, an include directive or a bare pattern list depending on which
/// fields are present, so a single struct with optional fields models all of
/// them (which combination wins is decided at compile time).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all(deserialize = "camelCase"), default)]
pub struct RawRule {
    /// Scope name for the whole match or region, e.g. "string.quoted.double"
    pub name: Option<String>,
    /// Scope name applied only between a region's delimiters
    pub content_name: Option<String>,
    /// Single-line regex of a match pattern
    #[serde(rename(deserialize = "match"))]
    pub match_: Option<String>,
    /// Begin regex of a region pattern
    pub begin: Option<String>,
    /// End regex of a region pattern; may reference begin captures (`\1`)
    pub end: Option<String>,
    /// Include directive: "#name", "$self", "$base", "scope.lang" or
    /// "scope.lang#name"
    pub include: Option<String>,
    /// Captures for a match pattern (group index -> scope)
    pub captures: RawCaptures,
    /// Captures for the begin match of a region
    pub begin_captures: RawCaptures,
    /// Captures for the end match of a region
    pub end_captures: RawCaptures,
    /// Tie-break flag: when true, content patterns win over the end pattern
    /// at equal offsets
    #[serde(deserialize_with = "bool_or_int")]
    pub apply_end_pattern_last: bool,
    /// Nested content patterns
    pub patterns: Vec<RawRule>,
    /// Named reusable pattern definitions
    pub repository: HashMap<String, RawRule>,
}

/// Grammar documents encode this flag as `true` or as `1` depending on
/// which tool produced them.
fn bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrInt {
        Bool(bool),
        Int(i64),
    }

    Ok(match BoolOrInt::deserialize(deserializer)? {
        BoolOrInt::Bool(b) => b,
        BoolOrInt::Int(i) => i != 0,
    })
}

/// Top-level structure of one language bundle document
///
/// # Examples
/// ```json
/// {
///   "name": "JavaScript",
///   "scopeName": "source.js",
///   "fileTypes": ["js", "mjs"],
///   "firstLineMatch": "^#!.*\\bnode\\b",
///   "patterns": [{ "include": "#statements" }],
///   "repository": {
///     "statements": { "patterns": [{ "include": "#keywords" }] }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"), default)]
pub struct RawGrammar {
    /// Human-readable name of the language, e.g. "JavaScript"
    pub name: String,
    /// Optional alternative display name
    pub display_name: Option<String>,
    /// Unique identifier for this grammar's scope, e.g. "source.js"
    pub scope_name: String,
    /// File extensions/globs this grammar applies to
    pub file_types: Vec<String>,
    /// Optional regex matched against a file's first line for language
    /// selection
    pub first_line_match: Option<String>,
    /// Root patterns, applied first when tokenizing
    pub patterns: Vec<RawRule>,
    /// Named pattern definitions referenced by "#name" includes
    pub repository: HashMap<String, RawRule>,
}

impl RawGrammar {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ViolaResult<Self> {
        let file = File::open(&path)?;
        let raw_grammar = serde_json::from_reader(&file)?;
        Ok(raw_grammar)
    }

    pub fn load_from_str(json: &str) -> ViolaResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
