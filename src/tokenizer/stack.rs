use std::fmt;

use crate::grammars::{GlobalRuleRef, GrammarId, ROOT_RULE_ID};
use crate::scope::Scope;

/// One open region (or the root) on the continuation stack.
///
/// A frame starts life as the record of a begin match: which rule opened,
/// the scope paths it established, and the end pattern that will close it —
/// already resolved against the begin captures when the end uses
/// backreferences. Frames that survive to the end of a line become the next
/// line's continuation entry, so equality deliberately ignores nothing: two
/// frames are interchangeable iff all persistent fields agree
/// (`enter_position` is reset at every line boundary).
#[derive(Clone, PartialEq)]
pub struct StackFrame {
    /// Rule that created this frame
    pub rule_ref: GlobalRuleRef,
    /// Scopes applied to the region's delimiters (and its content when the
    /// rule has no contentName)
    pub name_scopes: Vec<Scope>,
    /// Scopes applied between the delimiters
    pub content_scopes: Vec<Scope>,
    /// End pattern with backreferences substituted; None when the rule's
    /// static end pattern applies as-is
    pub end_pattern: Option<String>,
    /// Scan offset at which this region opened on the current line, for
    /// no-progress protection. None once the line ends.
    pub enter_position: Option<usize>,
}

/// The continuation stack: root frame first, innermost open region last.
#[derive(Clone, PartialEq)]
pub struct StateStack {
    pub(crate) frames: Vec<StackFrame>,
}

impl StateStack {
    pub fn new(grammar_id: GrammarId, grammar_scope: Scope) -> Self {
        Self {
            frames: vec![StackFrame {
                rule_ref: GlobalRuleRef {
                    grammar: grammar_id,
                    rule: ROOT_RULE_ID,
                },
                name_scopes: vec![grammar_scope],
                content_scopes: vec![grammar_scope],
                end_pattern: None,
                enter_position: None,
            }],
        }
    }

    pub(crate) fn from_frames(frames: Vec<StackFrame>) -> Self {
        debug_assert!(!frames.is_empty(), "stack never empty");
        Self { frames }
    }

    pub(crate) fn push(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    /// Exits the current region; never pops the root.
    pub fn pop(&mut self) -> Option<StackFrame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Clears per-line state on every frame; called at line boundaries so
    /// the frames can be stored as the next line's continuation entry.
    pub fn reset(&mut self) {
        for frame in &mut self.frames {
            frame.enter_position = None;
        }
    }

    /// Number of open regions (the root does not count).
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn top(&self) -> &StackFrame {
        self.frames.last().expect("stack never empty")
    }

    pub fn top_mut(&mut self) -> &mut StackFrame {
        self.frames.last_mut().expect("stack never empty")
    }
}

impl fmt::Debug for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "grammar={} rule={} name=[{}], content=[{}]",
            self.rule_ref.grammar.0,
            self.rule_ref.rule.0,
            crate::scope::path_to_string(&self.name_scopes),
            crate::scope::path_to_string(&self.content_scopes),
        )?;
        if let Some(pattern) = &self.end_pattern {
            write!(f, ", end_pattern=\"{}\"", pattern)?;
        }
        if let Some(enter) = self.enter_position {
            write!(f, ", enter_pos={}", enter)?;
        }
        Ok(())
    }
}

impl fmt::Debug for StateStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "StateStack:")?;
        for (depth, frame) in self.frames.iter().enumerate() {
            writeln!(f, "{}{:?}", "  ".repeat(depth), frame)?;
        }
        Ok(())
    }
}
