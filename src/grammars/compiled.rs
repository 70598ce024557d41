use std::collections::HashMap;

use crate::error::PatternError;
use crate::grammars::raw::{RawCaptures, RawGrammar, RawRule};
use crate::grammars::regex::Regex;
use crate::scope::Scope;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GrammarId(pub u16);

impl GrammarId {
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RuleId(pub u16);

impl RuleId {
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct RegexId(u16);

impl RegexId {
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

/// The root rule of every grammar sits at index 0 of its rule arena.
pub const ROOT_RULE_ID: RuleId = RuleId(0);

/// Sentinel for "the current region's end pattern" inside a candidate set.
/// No real rule ever gets this id.
pub const END_RULE_ID: RuleId = RuleId(u16::MAX);

/// A rule addressed across grammars, so cross-language inclusions can put
/// foreign rules into a candidate set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct GlobalRuleRef {
    pub grammar: GrammarId,
    pub rule: RuleId,
}

/// A pattern-list member: either a rule compiled into this grammar's arena
/// or an include directive resolved lazily at match time. Lazy resolution is
/// what lets grammars be cyclic (self-inclusion) without eager expansion.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PatternRef {
    Rule(RuleId),
    /// `$self`: the including grammar's own root
    SelfRoot,
    /// `$base`: the root of the grammar the tokenize request started from
    BaseRoot,
    /// `#name`: a repository entry of the including grammar
    Local(String),
    /// `source.lang`: another language's root patterns
    Foreign(String),
    /// `source.lang#name`: a repository entry of another language
    ForeignRule(String, String),
}

impl From<&str> for PatternRef {
    fn from(value: &str) -> Self {
        match value {
            "$self" => PatternRef::SelfRoot,
            "$base" => PatternRef::BaseRoot,
            s if s.starts_with('#') => PatternRef::Local(s[1..].to_string()),
            s => match s.split_once('#') {
                Some((scope, rule)) => {
                    PatternRef::ForeignRule(scope.to_string(), rule.to_string())
                }
                None => PatternRef::Foreign(s.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchRule {
    pub id: RuleId,
    pub scope: Option<Scope>,
    pub regex: RegexId,
    /// Group index -> sub-scope; index 0 is the whole match
    pub captures: Vec<Option<Scope>>,
}

#[derive(Debug, Clone)]
pub struct BeginEndRule {
    pub id: RuleId,
    pub scope: Option<Scope>,
    /// Applied between the delimiters only, on top of `scope`
    pub content_scope: Option<Scope>,
    pub begin: RegexId,
    pub begin_captures: Vec<Option<Scope>>,
    pub end: RegexId,
    pub end_has_backrefs: bool,
    pub end_captures: Vec<Option<Scope>>,
    /// Tie-break: false (default) lets the end pattern win equal-offset
    /// races, true defers it behind the content patterns
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<PatternRef>,
}

#[derive(Debug, Clone)]
pub struct IncludeOnlyRule {
    pub id: RuleId,
    pub patterns: Vec<PatternRef>,
}

#[derive(Debug, Clone)]
pub enum Rule {
    Match(MatchRule),
    BeginEnd(BeginEndRule),
    IncludeOnly(IncludeOnlyRule),
    Noop,
}

impl Rule {
    pub fn patterns(&self) -> &[PatternRef] {
        match self {
            Rule::IncludeOnly(r) => &r.patterns,
            Rule::BeginEnd(r) => &r.patterns,
            Rule::Match(_) | Rule::Noop => &[],
        }
    }
}

/// A language's pattern tree compiled into flat arenas.
///
/// Rules and regexes are addressed by index so the (possibly cyclic)
/// grammar needs no pointer graph; includes stay symbolic (`PatternRef`)
/// and are looked up at match time.
#[derive(Debug, Clone)]
pub struct CompiledGrammar {
    pub id: GrammarId,
    pub name: String,
    pub display_name: Option<String>,
    pub scope_name: String,
    pub scope: Scope,
    pub file_types: Vec<String>,
    first_line: Option<Regex>,
    pub(crate) regexes: Vec<Regex>,
    pub(crate) rules: Vec<Rule>,
    pub(crate) repository: HashMap<String, RuleId>,
}

impl CompiledGrammar {
    /// Compile a raw grammar document. Never fails: patterns whose regex is
    /// malformed are reported in the returned diagnostics and simply never
    /// match.
    pub fn from_raw(raw: RawGrammar, id: GrammarId) -> (Self, Vec<PatternError>) {
        let mut diagnostics = Vec::new();
        let mut grammar = Self {
            id,
            name: raw.name,
            display_name: raw.display_name,
            scope: Scope::new(&raw.scope_name),
            scope_name: raw.scope_name,
            file_types: raw.file_types,
            first_line: None,
            regexes: Vec::new(),
            rules: Vec::new(),
            repository: HashMap::new(),
        };

        if let Some(pattern) = raw.first_line_match {
            let re = Regex::new(pattern);
            if let Err(err) = re.validate() {
                diagnostics.push(PatternError {
                    pattern: re.pattern().to_owned(),
                    message: err.to_string(),
                });
            } else {
                grammar.first_line = Some(re);
            }
        }

        let root = RawRule {
            patterns: raw.patterns,
            repository: raw.repository,
            ..Default::default()
        };
        let root_id = grammar.compile_rule(root, &mut diagnostics);
        debug_assert_eq!(root_id, ROOT_RULE_ID);

        (grammar, diagnostics)
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.as_index()]
    }

    pub fn regex(&self, id: RegexId) -> &Regex {
        &self.regexes[id.as_index()]
    }

    pub fn repository_rule(&self, name: &str) -> Option<RuleId> {
        self.repository.get(name).copied()
    }

    /// The first-line-match regex, for the external language-selection
    /// collaborator.
    pub fn first_line_regex(&self) -> Option<&Regex> {
        self.first_line.as_ref()
    }

    fn compile_rule(&mut self, raw: RawRule, diagnostics: &mut Vec<PatternError>) -> RuleId {
        let id = RuleId(self.rules.len() as u16);
        // Reserve the slot; nested compilation appends behind it
        self.rules.push(Rule::Noop);

        let scope = raw.name.as_deref().map(Scope::new);
        self.merge_repository(raw.repository, diagnostics);

        let rule = if let Some(pattern) = raw.match_ {
            Rule::Match(MatchRule {
                id,
                scope,
                regex: self.compile_regex(pattern, diagnostics).0,
                captures: compile_captures(raw.captures),
            })
        } else if let Some(begin_pattern) = raw.begin {
            if let Some(end_pattern) = raw.end {
                let (end, end_has_backrefs) = self.compile_end_regex(end_pattern, diagnostics);
                Rule::BeginEnd(BeginEndRule {
                    id,
                    scope,
                    content_scope: raw.content_name.as_deref().map(Scope::new),
                    begin: self.compile_regex(begin_pattern, diagnostics).0,
                    begin_captures: compile_captures(raw.begin_captures),
                    end,
                    end_has_backrefs,
                    end_captures: compile_captures(raw.end_captures),
                    apply_end_pattern_last: raw.apply_end_pattern_last,
                    patterns: self.compile_patterns(raw.patterns, diagnostics),
                })
            } else {
                // begin without end is just a match, probably a typo
                Rule::Match(MatchRule {
                    id,
                    scope,
                    regex: self.compile_regex(begin_pattern, diagnostics).0,
                    captures: compile_captures(raw.begin_captures),
                })
            }
        } else {
            // A node with an include and no patterns of its own is a
            // one-element pattern list; an include next to patterns is
            // ignored, matching how grammar documents are written in the wild
            let patterns = if raw.patterns.is_empty() {
                match raw.include {
                    Some(include) => vec![PatternRef::from(include.as_str())],
                    None => Vec::new(),
                }
            } else {
                self.compile_patterns(raw.patterns, diagnostics)
            };
            if patterns.is_empty() {
                Rule::Noop
            } else {
                Rule::IncludeOnly(IncludeOnlyRule { id, patterns })
            }
        };

        self.rules[id.as_index()] = rule;
        id
    }

    fn compile_patterns(
        &mut self,
        rules: Vec<RawRule>,
        diagnostics: &mut Vec<PatternError>,
    ) -> Vec<PatternRef> {
        let mut out = Vec::with_capacity(rules.len());
        for raw in rules {
            if let Some(include) = raw.include {
                // A node carrying an include ignores its other fields
                out.push(PatternRef::from(include.as_str()));
            } else {
                out.push(PatternRef::Rule(self.compile_rule(raw, diagnostics)));
            }
        }
        out
    }

    /// Repositories are flattened into one namespace per grammar; a name
    /// registered by an outer node is not overridden by inner ones.
    fn merge_repository(
        &mut self,
        repository: HashMap<String, RawRule>,
        diagnostics: &mut Vec<PatternError>,
    ) {
        for (name, raw) in repository {
            if self.repository.contains_key(&name) {
                continue;
            }
            let rule_id = self.compile_rule(raw, diagnostics);
            self.repository.insert(name, rule_id);
        }
    }

    fn compile_regex(
        &mut self,
        pattern: String,
        diagnostics: &mut Vec<PatternError>,
    ) -> (RegexId, bool) {
        let regex_id = RegexId(self.regexes.len() as u16);
        let re = Regex::new(pattern);
        let has_backrefs = re.has_backreferences();
        if let Err(err) = re.validate() {
            diagnostics.push(PatternError {
                pattern: re.pattern().to_owned(),
                message: err.to_string(),
            });
        }
        self.regexes.push(re);
        (regex_id, has_backrefs)
    }

    /// End patterns with backreferences are only compilable once the begin
    /// match fills them in, so they skip load-time validation.
    fn compile_end_regex(
        &mut self,
        pattern: String,
        diagnostics: &mut Vec<PatternError>,
    ) -> (RegexId, bool) {
        let re = Regex::new(pattern);
        if re.has_backreferences() {
            let regex_id = RegexId(self.regexes.len() as u16);
            self.regexes.push(re);
            (regex_id, true)
        } else {
            let (id, _) = self.compile_regex(re.pattern().to_owned(), diagnostics);
            (id, false)
        }
    }
}

fn compile_captures(captures: RawCaptures) -> Vec<Option<Scope>> {
    let max_group = captures
        .keys()
        .filter_map(|k| k.parse::<usize>().ok())
        .max();
    let Some(max_group) = max_group else {
        return Vec::new();
    };

    let mut out = vec![None; max_group + 1];
    for (key, capture) in captures {
        if let (Ok(group), Some(name)) = (key.parse::<usize>(), capture.name) {
            out[group] = Some(Scope::new(&name));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammars::raw::RawGrammar;

    fn compile(json: &str) -> (CompiledGrammar, Vec<PatternError>) {
        let raw = RawGrammar::load_from_str(json).unwrap();
        CompiledGrammar::from_raw(raw, GrammarId(0))
    }

    #[test]
    fn compiles_root_and_repository() {
        let (grammar, diagnostics) = compile(
            r##"{
                "name": "Test",
                "scopeName": "source.test",
                "patterns": [
                    { "match": "\\d+", "name": "constant.numeric" },
                    { "include": "#string" }
                ],
                "repository": {
                    "string": {
                        "name": "string.quoted.double",
                        "begin": "\"",
                        "end": "\"",
                        "patterns": [{ "match": "\\\\.", "name": "constant.character.escape" }]
                    }
                }
            }"##,
        );

        assert!(diagnostics.is_empty());
        let Rule::IncludeOnly(root) = grammar.rule(ROOT_RULE_ID) else {
            panic!("root should be a pattern list");
        };
        assert_eq!(root.patterns.len(), 2);
        assert_eq!(root.patterns[1], PatternRef::Local("string".to_string()));

        let string_id = grammar.repository_rule("string").unwrap();
        let Rule::BeginEnd(string) = grammar.rule(string_id) else {
            panic!("repository entry should be a region");
        };
        assert_eq!(string.scope, Some(Scope::new("string.quoted.double")));
        assert_eq!(string.patterns.len(), 1);
        assert!(!string.apply_end_pattern_last);
    }

    #[test]
    fn include_directives_parse_to_refs() {
        assert_eq!(PatternRef::from("$self"), PatternRef::SelfRoot);
        assert_eq!(PatternRef::from("$base"), PatternRef::BaseRoot);
        assert_eq!(
            PatternRef::from("#comment"),
            PatternRef::Local("comment".to_string())
        );
        assert_eq!(
            PatternRef::from("source.js"),
            PatternRef::Foreign("source.js".to_string())
        );
        assert_eq!(
            PatternRef::from("source.js#statements"),
            PatternRef::ForeignRule("source.js".to_string(), "statements".to_string())
        );
    }

    #[test]
    fn malformed_regex_degrades_with_diagnostic() {
        let (grammar, diagnostics) = compile(
            r#"{
                "name": "Broken",
                "scopeName": "source.broken",
                "patterns": [
                    { "match": "(unclosed", "name": "invalid.illegal" },
                    { "match": "ok", "name": "keyword.other" }
                ]
            }"#,
        );

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].pattern, "(unclosed");
        // The grammar itself is still usable
        assert!(matches!(grammar.rule(ROOT_RULE_ID), Rule::IncludeOnly(_)));
    }

    #[test]
    fn begin_without_end_is_a_match_rule() {
        let (grammar, _) = compile(
            r#"{
                "name": "Typo",
                "scopeName": "source.typo",
                "patterns": [{ "begin": "x", "name": "keyword.other" }]
            }"#,
        );
        let Rule::IncludeOnly(root) = grammar.rule(ROOT_RULE_ID) else {
            panic!();
        };
        let &PatternRef::Rule(id) = &root.patterns[0] else {
            panic!();
        };
        assert!(matches!(grammar.rule(id), Rule::Match(_)));
    }

    #[test]
    fn backreference_end_skips_load_time_validation() {
        let (grammar, diagnostics) = compile(
            r#"{
                "name": "Heredoc",
                "scopeName": "source.heredoc",
                "patterns": [{ "begin": "<<(\\w+)", "end": "^\\1$", "name": "string.unquoted.heredoc" }]
            }"#,
        );
        assert!(diagnostics.is_empty());
        let Rule::IncludeOnly(root) = grammar.rule(ROOT_RULE_ID) else {
            panic!();
        };
        let &PatternRef::Rule(id) = &root.patterns[0] else {
            panic!();
        };
        let Rule::BeginEnd(region) = grammar.rule(id) else {
            panic!();
        };
        assert!(region.end_has_backrefs);
    }
}
