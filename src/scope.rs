//! Interned scope names.
//!
//! A scope name like "string.quoted.double" is interned once into a global
//! repository and handled everywhere else as a copyable u32. A scope *path*
//! is a `Vec<Scope>`, outermost (language root) first, innermost last.

use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// A single dotted scope name, e.g. "constant.character.escape".
///
/// Equality and hashing are on the interner handle, so two scopes are equal
/// iff their full dotted names are identical.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope(u32);

impl Scope {
    /// Intern `name` (trimmed) and return its handle.
    pub fn new(name: &str) -> Scope {
        lock_global_interner().intern(name.trim())
    }

    /// The dotted name this handle was interned from.
    /// Allocates; use for display and diagnostics only.
    pub fn name(self) -> String {
        lock_global_interner().resolve(self).to_owned()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope(\"{}\")", self.name())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Scope::new(&name))
    }
}

/// Maps scope-name strings to handles. Append-only: handles stay valid for
/// the lifetime of the process, so they can be stored in compiled grammars
/// and continuation entries without lifetimes.
struct ScopeInterner {
    names: Vec<String>,
    index: HashMap<String, u32>,
}

impl ScopeInterner {
    fn new() -> Self {
        Self {
            names: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn intern(&mut self, name: &str) -> Scope {
        if let Some(&id) = self.index.get(name) {
            return Scope(id);
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_owned());
        self.index.insert(name.to_owned(), id);
        Scope(id)
    }

    fn resolve(&self, scope: Scope) -> &str {
        &self.names[scope.0 as usize]
    }
}

static INTERNER: LazyLock<Mutex<ScopeInterner>> =
    LazyLock::new(|| Mutex::new(ScopeInterner::new()));

fn lock_global_interner() -> MutexGuard<'static, ScopeInterner> {
    INTERNER.lock().expect("failed to lock scope interner")
}

/// Render a scope path for diagnostics, outermost first.
pub fn path_to_string(path: &[Scope]) -> String {
    path.iter()
        .map(|s| s.name())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_names() {
        let scope = Scope::new("source.rust.meta.function");
        assert_eq!(scope.name(), "source.rust.meta.function");
    }

    #[test]
    fn interning_deduplicates() {
        let a = Scope::new("string.quoted.double");
        let b = Scope::new("string.quoted.double");
        let c = Scope::new("string.quoted.single");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(Scope::new(" comment.line "), Scope::new("comment.line"));
    }

    #[test]
    fn formats_paths() {
        let path = vec![Scope::new("source.c"), Scope::new("string.quoted.double")];
        assert_eq!(path_to_string(&path), "source.c string.quoted.double");
    }
}
