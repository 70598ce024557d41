use std::fmt;
use std::sync::{Arc, OnceLock};

/// A regex wrapper that compiles lazily at runtime.
///
/// A pattern that fails to compile behaves as never-matching: `compiled()`
/// returns `None` and callers skip it. Load-time validation is a separate
/// step (`validate`) so the loader can report the failure without making
/// the grammar unusable.
pub struct Regex {
    pattern: String,
    case_insensitive: bool,
    compiled: OnceLock<Option<Arc<onig::Regex>>>,
}

impl Clone for Regex {
    fn clone(&self) -> Self {
        // Same pattern, fresh lazy compilation
        Self {
            pattern: self.pattern.clone(),
            case_insensitive: self.case_insensitive,
            compiled: OnceLock::new(),
        }
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl Regex {
    pub fn new(pattern: String) -> Self {
        Self {
            pattern,
            case_insensitive: false,
            compiled: OnceLock::new(),
        }
    }

    /// The case-sensitivity hint: oniguruma gets IGNORECASE at compile time.
    pub fn with_case_insensitive(pattern: String) -> Self {
        Self {
            pattern,
            case_insensitive: true,
            compiled: OnceLock::new(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn options(&self) -> onig::RegexOptions {
        if self.case_insensitive {
            onig::RegexOptions::REGEX_OPTION_IGNORECASE
        } else {
            onig::RegexOptions::REGEX_OPTION_NONE
        }
    }

    pub fn compiled(&self) -> Option<&Arc<onig::Regex>> {
        self.compiled
            .get_or_init(|| {
                onig::Regex::with_options(&self.pattern, self.options(), onig::Syntax::default())
                    .ok()
                    .map(Arc::new)
            })
            .as_ref()
    }

    /// Validate that this regex pattern compiles successfully
    pub fn validate(&self) -> Result<(), onig::Error> {
        onig::Regex::with_options(&self.pattern, self.options(), onig::Syntax::default())
            .map(|_| ())
    }

    /// Leftmost match at or after `from`, as the whole-match byte range.
    pub fn find(&self, text: &str, from: usize) -> Option<(usize, usize)> {
        let re = self.compiled()?;
        let mut region = onig::Region::new();
        re.search_with_options(
            text,
            from,
            text.len(),
            onig::SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        )?;
        region.pos(0)
    }

    pub fn has_backreferences(&self) -> bool {
        pattern_has_backreferences(&self.pattern)
    }
}

pub fn pattern_has_backreferences(pattern: &str) -> bool {
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\\' {
            if bytes[i + 1].is_ascii_digit() && bytes[i + 1] != b'0' {
                return true;
            }
            // Skip the escaped character so "\\1" isn't taken for a backref
            i += 2;
        } else {
            i += 1;
        }
    }
    false
}

/// Substitute `\1`..`\9` in an end-pattern template with the text the begin
/// match captured, escaped so it matches literally rather than as sub-regex.
/// Unfilled groups substitute to nothing.
pub fn resolve_backreferences(
    template: &str,
    line: &str,
    capture_pos: &[Option<(usize, usize)>],
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&d) if d.is_ascii_digit() && d != '0' => {
                chars.next();
                let group = d as usize - '0' as usize;
                if let Some(Some((start, end))) = capture_pos.get(group) {
                    out.push_str(&escape_literal(&line[*start..*end]));
                }
            }
            Some(&next) => {
                chars.next();
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }

    out
}

/// Escape `text` so the regex engine matches it verbatim.
pub fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii() && !c.is_ascii_alphanumeric() && c != '_' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
