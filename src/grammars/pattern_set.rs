use std::fmt::{Debug, Formatter};

use onig::{RegSet, RegexOptions, SearchOptions};

use crate::grammars::GlobalRuleRef;

/// One attempted/successful pattern application: which rule matched, the
/// whole-match range and every numbered capture range, all relative to the
/// searched line.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PatternMatch {
    pub rule_ref: GlobalRuleRef,
    pub start: usize,
    pub end: usize,
    pub capture_pos: Vec<Option<(usize, usize)>>,
}

/// An ordered candidate list compiled into one onig RegSet.
///
/// Searching with `RegSetLead::Position` returns the leftmost match over all
/// members, with declaration order breaking offset ties — which is exactly
/// the candidate-selection rule of the matching algorithm. Members that fail
/// to compile are dropped (they never match); the rest of the set stays
/// usable.
pub struct PatternSet {
    rule_refs: Vec<GlobalRuleRef>,
    patterns: Vec<String>,
    /// Indices into `patterns` that made it into the regset
    compiled_members: Vec<usize>,
    regset: Option<RegSet>,
}

impl PatternSet {
    pub fn new(items: Vec<(GlobalRuleRef, String)>) -> Self {
        let (rule_refs, patterns): (Vec<_>, Vec<_>) = items.into_iter().unzip();
        let mut set = Self {
            rule_refs,
            patterns,
            compiled_members: Vec::new(),
            regset: None,
        };
        set.recompile();
        set
    }

    fn recompile(&mut self) {
        self.compiled_members.clear();
        self.regset = None;
        if self.patterns.is_empty() {
            return;
        }

        let all: Vec<&str> = self.patterns.iter().map(|s| s.as_str()).collect();
        if let Ok(regset) = RegSet::with_options(&all, RegexOptions::REGEX_OPTION_CAPTURE_GROUP) {
            self.compiled_members = (0..self.patterns.len()).collect();
            self.regset = Some(regset);
            return;
        }

        // At least one member is malformed; keep the ones that compile
        let valid: Vec<usize> = (0..self.patterns.len())
            .filter(|&i| match onig::Regex::new(&self.patterns[i]) {
                Ok(_) => true,
                Err(err) => {
                    log::warn!(
                        "dropping pattern '{}' from candidate set: {}",
                        self.patterns[i],
                        err
                    );
                    false
                }
            })
            .collect();
        if valid.is_empty() {
            return;
        }

        let subset: Vec<&str> = valid.iter().map(|&i| self.patterns[i].as_str()).collect();
        match RegSet::with_options(&subset, RegexOptions::REGEX_OPTION_CAPTURE_GROUP) {
            Ok(regset) => {
                self.compiled_members = valid;
                self.regset = Some(regset);
            }
            Err(err) => {
                log::warn!("candidate set failed to compile even after filtering: {err}");
            }
        }
    }

    /// Rewrite the first slot (the region's end pattern when it has match
    /// priority) with a freshly resolved end pattern.
    pub fn update_front(&mut self, end_pattern: &str) {
        self.update_slot(0, end_pattern);
    }

    /// Rewrite the last slot (the end pattern when the region defers to its
    /// content patterns).
    pub fn update_last(&mut self, end_pattern: &str) {
        self.update_slot(self.patterns.len().saturating_sub(1), end_pattern);
    }

    fn update_slot(&mut self, index: usize, pattern: &str) {
        if self.patterns.get(index).map(|p| p.as_str()) == Some(pattern) {
            return;
        }
        if let Some(slot) = self.patterns.get_mut(index) {
            *slot = pattern.to_owned();
            self.recompile();
        }
    }

    /// Leftmost match over all members at or after `pos` within `line`.
    /// The full line is handed to the engine so lookbehind keeps working.
    pub fn find_at(&self, line: &str, pos: usize) -> Option<PatternMatch> {
        let regset = self.regset.as_ref()?;

        let (member_index, captures) = regset.captures_with_options(
            line,
            pos,
            line.len(),
            onig::RegSetLead::Position,
            SearchOptions::SEARCH_OPTION_NONE,
        )?;
        let (start, end) = captures.pos(0)?;

        let capture_pos: Vec<Option<(usize, usize)>> =
            (0..captures.len()).map(|i| captures.pos(i)).collect();

        Some(PatternMatch {
            rule_ref: self.rule_refs[self.compiled_members[member_index]],
            start,
            end,
            capture_pos,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.compiled_members.is_empty()
    }
}

impl Debug for PatternSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PatternSet({} rules, {} compiled)",
            self.rule_refs.len(),
            self.compiled_members.len()
        )
    }
}
