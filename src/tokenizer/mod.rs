//! The core driver: runs the grammar's patterns over a requested line range,
//! emits scope spans, and keeps per-line continuations correct across edits.

use std::collections::HashMap;

use crate::Registry;
use crate::buffer::TextSource;
use crate::grammars::{
    END_RULE_ID, GlobalRuleRef, GrammarId, PatternSet, Rule, resolve_backreferences,
};
use crate::scope::Scope;

mod context;
mod continuations;
mod stack;

pub use context::{CancelToken, Interrupt, ParseContext, ParseStats, Span, TokenizeOutcome};
pub use continuations::{ContinuationEntry, ContinuationStore};
pub use stack::{StackFrame, StateStack};

/// Collects spans in strictly increasing offset order with no gaps: every
/// produce() call covers whatever lies between the cursor and `end`, so the
/// union of emitted spans always equals the processed range exactly.
#[derive(Debug, Default)]
struct SpanAccumulator {
    spans: Vec<Span>,
    /// Absolute position up to which spans have been emitted
    cursor: usize,
}

impl SpanAccumulator {
    fn new(start: usize) -> Self {
        Self {
            spans: Vec::new(),
            cursor: start,
        }
    }

    fn produce(&mut self, end: usize, scopes: &[Scope]) {
        // Skip empty spans (zero-width matches)
        if end <= self.cursor {
            return;
        }

        #[cfg(feature = "debug")]
        log::debug!(
            "[produce] [{}..{end}] {}",
            self.cursor,
            crate::scope::path_to_string(scopes)
        );

        self.spans.push(Span {
            range: self.cursor..end,
            scopes: scopes.to_vec(),
        });
        self.cursor = end;
    }

    /// Clip to the requested sub-range.
    fn finish(self, range: std::ops::Range<usize>) -> Vec<Span> {
        self.spans
            .into_iter()
            .filter_map(|mut span| {
                span.range.start = span.range.start.max(range.start);
                span.range.end = span.range.end.min(range.end);
                (span.range.start < span.range.end).then_some(span)
            })
            .collect()
    }
}

/// Emit sub-spans for a match's captured groups, nesting inner groups
/// inside outer ones. `base_scopes` is the path the surrounding match
/// established; gaps between captures fall back to it.
fn emit_captures(
    acc: &mut SpanAccumulator,
    line_start: usize,
    base_scopes: &[Scope],
    captures: &[Option<Scope>],
    capture_pos: &[Option<(usize, usize)>],
) {
    if captures.is_empty() {
        return;
    }

    // (scopes, relative end)
    let mut open: Vec<(Vec<Scope>, usize)> = Vec::with_capacity(2);

    for group in 0..captures.len().min(capture_pos.len()) {
        let Some(scope) = captures[group] else {
            continue;
        };
        let Some((start, end)) = capture_pos[group] else {
            continue;
        };
        if start == end {
            continue;
        }

        // Close groups that end before this one starts
        while let Some((scopes, open_end)) = open.last()
            && *open_end <= start
        {
            acc.produce(line_start + open_end, scopes);
            open.pop();
        }

        match open.last() {
            Some((scopes, _)) => acc.produce(line_start + start, scopes),
            None => acc.produce(line_start + start, base_scopes),
        }

        let mut nested = match open.last() {
            Some((scopes, _)) => scopes.clone(),
            None => base_scopes.to_vec(),
        };
        nested.push(scope);
        open.push((nested, end));
    }

    while let Some((scopes, open_end)) = open.pop() {
        acc.produce(line_start + open_end, &scopes);
    }
}

/// The tokenizer for one document in one language.
///
/// It owns the document's continuation store and the compiled candidate-set
/// cache, and serves one request at a time: a `parse` call that arrives
/// while an earlier one is still in flight supersedes it, so the emitted
/// spans always describe the newest buffer content.
#[derive(Debug)]
pub struct Tokenizer<'r> {
    /// Grammar the whole document is tokenized as ($base resolves to it)
    base_grammar_id: GrammarId,
    registry: &'r Registry,
    continuations: ContinuationStore,
    /// Candidate sets by the rule whose content they describe. Compiled
    /// once and kept for the tokenizer's lifetime; only the end-pattern
    /// slot is ever rewritten (backreferences make it dynamic).
    pattern_cache: HashMap<GlobalRuleRef, PatternSet>,
    /// Cancellation token of the most recent request
    active: Option<CancelToken>,
    stats: ParseStats,
}

impl<'r> Tokenizer<'r> {
    pub fn new(base_grammar_id: GrammarId, registry: &'r Registry) -> Self {
        Self {
            base_grammar_id,
            registry,
            continuations: ContinuationStore::new(),
            pattern_cache: HashMap::new(),
            active: None,
            stats: ParseStats::default(),
        }
    }

    /// Tokenize the context's window and return the scope spans for its
    /// requested range.
    ///
    /// The newest request always wins the lane: calling `parse` marks any
    /// earlier, still-unfinished request as superseded, and this request
    /// itself returns `Aborted` at the next line boundary if its token gets
    /// cancelled or superseded. Continuations are committed for every line
    /// boundary the call crosses, so an aborted request wastes nothing.
    pub fn parse(&mut self, ctx: &ParseContext) -> TokenizeOutcome {
        if let Some(previous) = self.active.take() {
            previous.supersede();
        }
        self.active = Some(ctx.cancel_token());
        self.stats.requests += 1;
        if ctx.is_restarting() {
            self.stats.restarts += 1;
        }

        let mut stack = self.resume_stack(ctx);
        let mut acc = SpanAccumulator::new(ctx.start_offset());
        let mut line_no = ctx.line_offset();
        let mut line_start = ctx.start_offset();

        for line in ctx.window().split_inclusive('\n') {
            if let Some(interrupt) = ctx.interruption(line_no) {
                self.stats.aborts += 1;
                return TokenizeOutcome::Aborted(interrupt);
            }

            stack = self.tokenize_line(stack, line, line_start, &mut acc);
            stack.reset();
            line_no += 1;
            line_start += line.len();
            self.continuations.commit(line_no, stack.frames.clone());
            self.stats.lines_tokenized += 1;
        }

        self.active = None;
        TokenizeOutcome::Completed(acc.finish(ctx.range()))
    }

    /// Convenience wrapper: build a context for whole lines of `source`,
    /// deriving the continuation for the first line if the store does not
    /// have it yet.
    pub fn parse_lines<S: TextSource + ?Sized>(
        &mut self,
        source: &S,
        lines: std::ops::Range<usize>,
    ) -> TokenizeOutcome {
        if lines.start > 0 && self.continuations.continuation_for(lines.start).is_none() {
            self.continuation_at(lines.start, source);
        }
        let ctx = ParseContext::from_source(source, lines);
        self.parse(&ctx)
    }

    /// Edit notification sink: after the buffer mutates, shift the
    /// continuation entries for a line-count change and invalidate from the
    /// first changed line. Must be called before any further tokenization.
    pub fn apply_edit(&mut self, changed_lines: std::ops::Range<usize>, delta_line_count: isize) {
        if delta_line_count > 0 {
            self.continuations
                .splice(changed_lines.start, 0, delta_line_count as usize);
        } else if delta_line_count < 0 {
            self.continuations
                .splice(changed_lines.start, delta_line_count.unsigned_abs(), 0);
        }
        self.continuations.invalidate_from(changed_lines.start);
    }

    /// The continuation valid at the start of `line`, derived lazily from
    /// the nearest known-good earlier line (worst case line 0) when the
    /// store has nothing usable.
    pub fn continuation_at<S: TextSource + ?Sized>(
        &mut self,
        line: usize,
        source: &S,
    ) -> ContinuationEntry {
        if let Some(entry) = self.continuations.continuation_for(line) {
            return entry.clone();
        }

        let start = if line == 0 {
            0
        } else {
            self.continuations.nearest_valid_at_or_before(line)
        };
        let mut stack = match self.continuations.continuation_for(start) {
            Some(entry) if start > 0 => StateStack::from_frames(entry.frames().to_vec()),
            _ => self.fresh_stack(),
        };

        if line == 0 {
            stack.reset();
            let frames = stack.frames.clone();
            self.continuations.commit(0, frames);
        }

        // Re-run the matching algorithm silently; only the continuations
        // are kept
        let mut sink = SpanAccumulator::new(source.line_start_offset(start));
        for l in start..line {
            let line_start = source.line_start_offset(l);
            let line_end = source.line_start_offset(l + 1);
            let text = source.characters_in_range(line_start..line_end);
            stack = self.tokenize_line(stack, &text, line_start, &mut sink);
            stack.reset();
            self.continuations.commit(l + 1, stack.frames.clone());
            self.stats.lines_tokenized += 1;
        }

        self.continuations
            .continuation_for(line)
            .cloned()
            .expect("entry was just derived")
    }

    /// Scope path at an arbitrary offset: re-runs the matching algorithm
    /// for the containing line only.
    pub fn scope_at<S: TextSource + ?Sized>(&mut self, offset: usize, source: &S) -> Vec<Scope> {
        let line = line_containing_offset(source, offset);
        let entry = self.continuation_at(line, source);

        let line_start = source.line_start_offset(line);
        let line_end = source.line_start_offset(line + 1);
        let text = source.characters_in_range(line_start..line_end);

        let mut stack = StateStack::from_frames(entry.frames().to_vec());
        let mut acc = SpanAccumulator::new(line_start);
        stack = self.tokenize_line(stack, &text, line_start, &mut acc);
        stack.reset();
        self.continuations.commit(line + 1, stack.frames.clone());

        acc.spans
            .into_iter()
            .find(|span| span.range.contains(&offset))
            .map(|span| span.scopes)
            .unwrap_or_else(|| self.fresh_stack().top().content_scopes.clone())
    }

    /// Read access to the stored continuation for `line`, if it is valid.
    pub fn continuation_for(&self, line: usize) -> Option<&ContinuationEntry> {
        self.continuations.continuation_for(line)
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    fn fresh_stack(&self) -> StateStack {
        let grammar = self.registry.grammar(self.base_grammar_id);
        StateStack::new(self.base_grammar_id, grammar.scope)
    }

    /// The stack this request resumes from: the stored continuation for its
    /// first line, or a fresh one. A missing entry for a non-initial line
    /// means the host skipped an invalidation protocol step; the request is
    /// served from a fresh start rather than refused (degraded highlighting
    /// beats none).
    fn resume_stack(&mut self, ctx: &ParseContext) -> StateStack {
        if ctx.line_offset() == 0 {
            return self.fresh_stack();
        }
        match self.continuations.continuation_for(ctx.line_offset()) {
            Some(entry) => StateStack::from_frames(entry.frames().to_vec()),
            None => {
                log::warn!(
                    "no continuation for line {} (restarting={}); treating the line as a fresh start",
                    ctx.line_offset(),
                    ctx.is_restarting()
                );
                self.fresh_stack()
            }
        }
    }

    /// One line of the matching algorithm. `line` includes its trailing
    /// newline (when the buffer has one there); `line_start` is its
    /// absolute offset. Returns the stack as of the end of the line.
    fn tokenize_line(
        &mut self,
        mut stack: StateStack,
        line: &str,
        line_start: usize,
        acc: &mut SpanAccumulator,
    ) -> StateStack {
        let mut pos = 0usize;

        loop {
            let found = self.candidate_set(&stack).find_at(line, pos);
            self.stats.patterns_tried += 1;

            let Some(m) = found else {
                // Nothing matches in the remainder: the current path covers
                // it to the end of the line
                acc.produce(line_start + line.len(), &stack.top().content_scopes);
                break;
            };
            self.stats.patterns_matched += 1;
            let has_advanced = m.end > pos;

            #[cfg(feature = "debug")]
            log::debug!(
                "[tokenize_line] matched rule {:?} at {}..{} => {:?}",
                m.rule_ref,
                m.start,
                m.end,
                &line[m.start..m.end]
            );

            if m.rule_ref.rule == END_RULE_ID {
                // The innermost open region closes here
                let top_ref = stack.top().rule_ref;
                let grammar = self.registry.grammar(top_ref.grammar);
                let Rule::BeginEnd(region) = grammar.rule(top_ref.rule) else {
                    // Only regions seed an end slot; a mismatch means the
                    // stack and cache disagree. Give up on the line.
                    acc.produce(line_start + line.len(), &stack.top().content_scopes);
                    break;
                };

                acc.produce(line_start + m.start, &stack.top().content_scopes);
                // The end delimiter belongs to the region, not its content
                // and not the parent
                let delimiter_scopes = stack.top().name_scopes.clone();
                emit_captures(
                    acc,
                    line_start,
                    &delimiter_scopes,
                    &region.end_captures,
                    &m.capture_pos,
                );
                acc.produce(line_start + m.end, &delimiter_scopes);

                let reopened = stack.top().enter_position;
                let popped = stack.pop();

                if !has_advanced && reopened == Some(pos) {
                    // The region closed where it opened without consuming
                    // anything; keep it open and finish the line, otherwise
                    // the same begin would match here forever
                    if let Some(frame) = popped {
                        stack.push(frame);
                    }
                    acc.produce(line_start + line.len(), &stack.top().content_scopes);
                    break;
                }
            } else {
                let grammar = self.registry.grammar(m.rule_ref.grammar);
                match grammar.rule(m.rule_ref.rule) {
                    Rule::Match(rule) => {
                        acc.produce(line_start + m.start, &stack.top().content_scopes);
                        let mut scopes = stack.top().content_scopes.clone();
                        if let Some(scope) = rule.scope {
                            scopes.push(scope);
                        }
                        emit_captures(acc, line_start, &scopes, &rule.captures, &m.capture_pos);
                        acc.produce(line_start + m.end, &scopes);

                        if !has_advanced {
                            // Zero-width match that neither pushes nor pops:
                            // stop the line
                            acc.produce(line_start + line.len(), &stack.top().content_scopes);
                            break;
                        }
                    }
                    Rule::BeginEnd(rule) => {
                        acc.produce(line_start + m.start, &stack.top().content_scopes);

                        let mut name_scopes = stack.top().content_scopes.clone();
                        if let Some(scope) = rule.scope {
                            name_scopes.push(scope);
                        }
                        emit_captures(
                            acc,
                            line_start,
                            &name_scopes,
                            &rule.begin_captures,
                            &m.capture_pos,
                        );
                        acc.produce(line_start + m.end, &name_scopes);

                        let mut content_scopes = name_scopes.clone();
                        if let Some(scope) = rule.content_scope {
                            content_scopes.push(scope);
                        }
                        let end_pattern = if rule.end_has_backrefs {
                            Some(resolve_backreferences(
                                grammar.regex(rule.end).pattern(),
                                line,
                                &m.capture_pos,
                            ))
                        } else {
                            None
                        };

                        #[cfg(feature = "debug")]
                        log::debug!("[tokenize_line] pushing region {:?}", m.rule_ref);

                        stack.push(StackFrame {
                            rule_ref: m.rule_ref,
                            name_scopes,
                            content_scopes,
                            end_pattern,
                            enter_position: Some(pos),
                        });
                    }
                    Rule::IncludeOnly(_) | Rule::Noop => {
                        unreachable!("candidate sets only contain matchable rules")
                    }
                }
            }

            if has_advanced {
                pos = m.end;
            }
        }

        stack
    }

    /// The candidate set for the innermost open region (or the root): its
    /// content patterns plus, for regions, the end pattern — in front by
    /// default so it wins offset ties, behind when the region asks for
    /// content priority.
    fn candidate_set(&mut self, stack: &StateStack) -> &PatternSet {
        let rule_ref = stack.top().rule_ref;
        let grammar = self.registry.grammar(rule_ref.grammar);

        let (end_pattern, end_last) = match grammar.rule(rule_ref.rule) {
            Rule::BeginEnd(region) => {
                let end = match &stack.top().end_pattern {
                    Some(resolved) => resolved.clone(),
                    None => grammar.regex(region.end).pattern().to_owned(),
                };
                (Some(end), region.apply_end_pattern_last)
            }
            _ => (None, false),
        };

        if let Some(set) = self.pattern_cache.get_mut(&rule_ref) {
            self.stats.pattern_sets_cached += 1;
            if let Some(end) = &end_pattern {
                if end_last {
                    set.update_last(end);
                } else {
                    set.update_front(end);
                }
            }
        } else {
            let mut items = self
                .registry
                .collect_patterns(self.base_grammar_id, rule_ref);
            if let Some(end) = end_pattern {
                let end_ref = GlobalRuleRef {
                    grammar: rule_ref.grammar,
                    rule: END_RULE_ID,
                };
                if end_last {
                    items.push((end_ref, end));
                } else {
                    items.insert(0, (end_ref, end));
                }
            }
            self.pattern_cache.insert(rule_ref, PatternSet::new(items));
        }

        &self.pattern_cache[&rule_ref]
    }
}

fn line_containing_offset<S: TextSource + ?Sized>(source: &S, offset: usize) -> usize {
    let mut low = 0;
    let mut high = source.line_count();
    while low + 1 < high {
        let mid = low + (high - low) / 2;
        if source.line_start_offset(mid) <= offset {
            low = mid;
        } else {
            high = mid;
        }
    }
    low
}
