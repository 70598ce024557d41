use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::{Error, PatternError, ViolaResult};
use crate::grammars::{
    CompiledGrammar, GlobalRuleRef, GrammarId, PatternRef, RawGrammar, ROOT_RULE_ID, Rule,
};

/// The default grammar name, where nothing is scoped beyond the root
pub const PLAIN_GRAMMAR_NAME: &str = "plain";

/// Holds every loaded language grammar and resolves includes between them.
///
/// Grammars are loaded once and never replaced; include directives stay
/// symbolic until `collect_patterns` looks them up, so recursive and
/// mutually-including grammars cost nothing at load time.
#[derive(Debug, Default)]
pub struct Registry {
    pub(crate) grammars: Vec<CompiledGrammar>,
    // grammar scope name -> grammar ID, used to resolve cross-language includes
    grammar_id_by_scope_name: HashMap<String, GrammarId>,
    // grammar name (and aliases) -> grammar ID, the names end users refer to
    grammar_id_by_name: HashMap<String, GrammarId>,
}

impl Registry {
    /// Adds an already-parsed grammar document. Returns the load-time
    /// diagnostics: patterns that failed regex validation and will never
    /// match (the grammar stays usable).
    pub fn add_grammar_from_raw(&mut self, raw: RawGrammar) -> Vec<PatternError> {
        let grammar_id = GrammarId(self.grammars.len() as u16);
        let (grammar, diagnostics) = CompiledGrammar::from_raw(raw, grammar_id);
        for diagnostic in &diagnostics {
            log::warn!("grammar '{}': {}", grammar.name, diagnostic);
        }
        self.grammar_id_by_scope_name
            .insert(grammar.scope_name.clone(), grammar_id);
        self.grammar_id_by_name
            .insert(grammar.name.clone(), grammar_id);
        self.grammars.push(grammar);
        diagnostics
    }

    /// Reads the file and adds it as a grammar.
    pub fn add_grammar_from_path(&mut self, path: impl AsRef<Path>) -> ViolaResult<Vec<PatternError>> {
        let raw = RawGrammar::load_from_file(path)?;
        Ok(self.add_grammar_from_raw(raw))
    }

    /// Adds an empty grammar whose spans only ever carry the root scope.
    /// Useful as a fallback when no language matches.
    pub fn add_plain_grammar(&mut self, aliases: &[&str]) {
        let raw = RawGrammar {
            name: PLAIN_GRAMMAR_NAME.to_owned(),
            scope_name: "text.plain".to_owned(),
            ..Default::default()
        };
        self.add_grammar_from_raw(raw);
        for alias in aliases {
            self.add_alias(PLAIN_GRAMMAR_NAME, alias);
        }
    }

    /// Adds an alias for the given grammar
    pub fn add_alias(&mut self, grammar_name: &str, alias: &str) {
        if let Some(grammar_id) = self.grammar_id_by_name.get(grammar_name) {
            self.grammar_id_by_name
                .insert(alias.to_string(), *grammar_id);
        }
    }

    /// Checks whether the given language is available, by name or alias
    pub fn contains_grammar(&self, name: &str) -> bool {
        self.grammar_id_by_name.contains_key(name)
    }

    pub fn grammar_id(&self, name: &str) -> ViolaResult<GrammarId> {
        self.grammar_id_by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::GrammarNotFound(name.to_string()))
    }

    pub fn grammar(&self, id: GrammarId) -> &CompiledGrammar {
        &self.grammars[id.as_index()]
    }

    /// Language selection by file name: matches the grammar file-type
    /// suffixes against the file's name and extension.
    pub fn language_for_filename(&self, filename: &str) -> Option<GrammarId> {
        let basename = filename.rsplit('/').next().unwrap_or(filename);
        for grammar in &self.grammars {
            for file_type in &grammar.file_types {
                if basename == file_type
                    || basename
                        .strip_suffix(file_type.as_str())
                        .is_some_and(|prefix| prefix.ends_with('.'))
                {
                    return Some(grammar.id);
                }
            }
        }
        None
    }

    /// Language selection by the first line of a file (shebangs, XML
    /// declarations and the like).
    pub fn language_for_first_line(&self, first_line: &str) -> Option<GrammarId> {
        for grammar in &self.grammars {
            if let Some(re) = grammar.first_line_regex()
                && re.find(first_line, 0).is_some()
            {
                return Some(grammar.id);
            }
        }
        None
    }

    /// Flattens the content pattern list of `container` into matchable
    /// candidates, resolving include directives on the way.
    ///
    /// `$base` resolves against `base_grammar_id` (the grammar the request
    /// started from), `$self` against the grammar owning the directive.
    /// Cyclic inclusion is bounded by the visited set; an include naming an
    /// unknown language or repository entry contributes nothing.
    pub fn collect_patterns(
        &self,
        base_grammar_id: GrammarId,
        container: GlobalRuleRef,
    ) -> Vec<(GlobalRuleRef, String)> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(container);
        let grammar = self.grammar(container.grammar);
        for pattern_ref in grammar.rule(container.rule).patterns() {
            self.resolve_pattern_ref(
                base_grammar_id,
                container.grammar,
                pattern_ref,
                &mut visited,
                &mut out,
            );
        }
        out
    }

    fn resolve_pattern_ref(
        &self,
        base_grammar_id: GrammarId,
        owner: GrammarId,
        pattern_ref: &PatternRef,
        visited: &mut HashSet<GlobalRuleRef>,
        out: &mut Vec<(GlobalRuleRef, String)>,
    ) {
        match pattern_ref {
            PatternRef::Rule(rule_id) => {
                self.push_rule(
                    base_grammar_id,
                    GlobalRuleRef {
                        grammar: owner,
                        rule: *rule_id,
                    },
                    visited,
                    out,
                );
            }
            PatternRef::SelfRoot => self.push_rule(
                base_grammar_id,
                GlobalRuleRef {
                    grammar: owner,
                    rule: ROOT_RULE_ID,
                },
                visited,
                out,
            ),
            PatternRef::BaseRoot => self.push_rule(
                base_grammar_id,
                GlobalRuleRef {
                    grammar: base_grammar_id,
                    rule: ROOT_RULE_ID,
                },
                visited,
                out,
            ),
            PatternRef::Local(name) => {
                match self.grammar(owner).repository_rule(name) {
                    Some(rule_id) => self.push_rule(
                        base_grammar_id,
                        GlobalRuleRef {
                            grammar: owner,
                            rule: rule_id,
                        },
                        visited,
                        out,
                    ),
                    None => log::warn!(
                        "grammar '{}' includes unknown repository entry '#{}'",
                        self.grammar(owner).name,
                        name
                    ),
                }
            }
            PatternRef::Foreign(scope_name) => {
                match self.grammar_id_by_scope_name.get(scope_name) {
                    Some(&foreign) => self.push_rule(
                        base_grammar_id,
                        GlobalRuleRef {
                            grammar: foreign,
                            rule: ROOT_RULE_ID,
                        },
                        visited,
                        out,
                    ),
                    None => log::warn!("include of unknown language '{scope_name}' ignored"),
                }
            }
            PatternRef::ForeignRule(scope_name, name) => {
                let resolved = self
                    .grammar_id_by_scope_name
                    .get(scope_name)
                    .and_then(|&id| {
                        self.grammar(id)
                            .repository_rule(name)
                            .map(|rule_id| GlobalRuleRef {
                                grammar: id,
                                rule: rule_id,
                            })
                    });
                match resolved {
                    Some(rule_ref) => self.push_rule(base_grammar_id, rule_ref, visited, out),
                    None => log::warn!("include of unknown rule '{scope_name}#{name}' ignored"),
                }
            }
        }
    }

    fn push_rule(
        &self,
        base_grammar_id: GrammarId,
        rule_ref: GlobalRuleRef,
        visited: &mut HashSet<GlobalRuleRef>,
        out: &mut Vec<(GlobalRuleRef, String)>,
    ) {
        if !visited.insert(rule_ref) {
            return;
        }

        let grammar = self.grammar(rule_ref.grammar);
        match grammar.rule(rule_ref.rule) {
            Rule::Match(rule) => {
                out.push((rule_ref, grammar.regex(rule.regex).pattern().to_owned()));
            }
            Rule::BeginEnd(rule) => {
                out.push((rule_ref, grammar.regex(rule.begin).pattern().to_owned()));
            }
            Rule::IncludeOnly(rule) => {
                for pattern_ref in &rule.patterns {
                    self.resolve_pattern_ref(
                        base_grammar_id,
                        rule_ref.grammar,
                        pattern_ref,
                        visited,
                        out,
                    );
                }
            }
            Rule::Noop => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(jsons: &[&str]) -> Registry {
        let mut registry = Registry::default();
        for json in jsons {
            let raw = RawGrammar::load_from_str(json).unwrap();
            registry.add_grammar_from_raw(raw);
        }
        registry
    }

    #[test]
    fn recursive_self_inclusion_is_bounded() {
        let registry = registry_with(&[r#"{
            "name": "Loopy",
            "scopeName": "source.loopy",
            "patterns": [
                { "match": "a", "name": "keyword.letter" },
                { "begin": "\\(", "end": "\\)", "name": "meta.group",
                  "patterns": [{ "include": "$self" }] }
            ]
        }"#]);

        let id = registry.grammar_id("Loopy").unwrap();
        let root = GlobalRuleRef {
            grammar: id,
            rule: ROOT_RULE_ID,
        };
        let patterns = registry.collect_patterns(id, root);
        // the match rule and the group's begin, each exactly once
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].1, "a");
        assert_eq!(patterns[1].1, "\\(");
    }

    #[test]
    fn cross_grammar_include_resolves_lazily() {
        let registry = registry_with(&[
            r#"{
                "name": "Host",
                "scopeName": "text.host",
                "patterns": [{ "include": "source.guest" }]
            }"#,
            r#"{
                "name": "Guest",
                "scopeName": "source.guest",
                "patterns": [{ "match": "g+", "name": "keyword.guest" }]
            }"#,
        ]);

        let host = registry.grammar_id("Host").unwrap();
        let root = GlobalRuleRef {
            grammar: host,
            rule: ROOT_RULE_ID,
        };
        let patterns = registry.collect_patterns(host, root);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].1, "g+");
        assert_ne!(patterns[0].0.grammar, host);
    }

    #[test]
    fn unknown_include_degrades_to_empty() {
        let registry = registry_with(&[r##"{
            "name": "Lonely",
            "scopeName": "source.lonely",
            "patterns": [
                { "include": "source.missing" },
                { "include": "#absent" }
            ]
        }"##]);

        let id = registry.grammar_id("Lonely").unwrap();
        let root = GlobalRuleRef {
            grammar: id,
            rule: ROOT_RULE_ID,
        };
        assert!(registry.collect_patterns(id, root).is_empty());
    }

    #[test]
    fn filename_and_first_line_selection() {
        let registry = registry_with(&[r#"{
            "name": "Shelly",
            "scopeName": "source.shelly",
            "fileTypes": ["sh", "bashrc"],
            "firstLineMatch": "^#!.*\\bsh\\b",
            "patterns": []
        }"#]);

        let id = registry.grammar_id("Shelly").unwrap();
        assert_eq!(registry.language_for_filename("deploy.sh"), Some(id));
        assert_eq!(registry.language_for_filename("bashrc"), Some(id));
        assert_eq!(registry.language_for_filename("deploy.rs"), None);
        assert_eq!(registry.language_for_filename("sh"), Some(id));
        assert_eq!(
            registry.language_for_first_line("#!/bin/sh"),
            Some(id)
        );
        assert_eq!(registry.language_for_first_line("#!/usr/bin/python"), None);
    }

    #[test]
    fn aliases_resolve_to_the_same_grammar(){
        let mut registry = registry_with(&[r#"{
            "name": "JavaScript",
            "scopeName": "source.js",
            "patterns": []
        }"#]);
        registry.add_alias("JavaScript", "js");
        assert_eq!(
            registry.grammar_id("js").unwrap(),
            registry.grammar_id("JavaScript").unwrap()
        );
        assert!(registry.grammar_id("unknown").is_err());
    }
}
