//! Incremental behavior tests: continuation correctness across calls,
//! splice-on-edit equivalence, revision stability, lazy derivation and the
//! abort/restart protocol.

use viola::{
    Interrupt, ParseContext, RawGrammar, Registry, Span, TextSource, TokenizeOutcome, Tokenizer,
};

const CISH: &str = r##"{
    "name": "C-ish",
    "scopeName": "source.cish",
    "patterns": [
        { "include": "#comment" },
        { "match": "\\w+", "name": "variable.other" }
    ],
    "repository": {
        "comment": { "name": "comment.block", "begin": "/\\*", "end": "\\*/" }
    }
}"##;

fn registry() -> Registry {
    let mut registry = Registry::default();
    registry.add_grammar_from_raw(RawGrammar::load_from_str(CISH).unwrap());
    registry
}

fn tokenizer(registry: &Registry) -> Tokenizer<'_> {
    Tokenizer::new(registry.grammar_id("C-ish").unwrap(), registry)
}

fn completed(outcome: TokenizeOutcome) -> Vec<Span> {
    outcome.into_spans().expect("request should complete")
}

#[test]
fn one_call_and_line_by_line_agree_on_continuations() {
    let registry = registry();
    let text = "top\n/* first\nsecond\n*/ tail\nend\n";

    let mut whole = tokenizer(&registry);
    let whole_spans = completed(whole.parse_lines(text, 0..5));

    let mut stepped = tokenizer(&registry);
    let mut stepped_spans = Vec::new();
    for line in 0..5 {
        stepped_spans.extend(completed(stepped.parse_lines(text, line..line + 1)));
    }

    for line in 1..=5 {
        assert_eq!(
            whole.continuation_for(line).unwrap().frames(),
            stepped.continuation_for(line).unwrap().frames(),
            "continuation for line {line} diverged"
        );
    }
    assert_eq!(whole_spans, stepped_spans);

    // The comment is open across its interior lines and closed after
    assert_eq!(whole.continuation_for(1).unwrap().open_regions(), 0);
    assert_eq!(whole.continuation_for(2).unwrap().open_regions(), 1);
    assert_eq!(whole.continuation_for(3).unwrap().open_regions(), 1);
    assert_eq!(whole.continuation_for(4).unwrap().open_regions(), 0);

    // "computed, nothing open" is not the same as "never computed"
    assert!(whole.continuation_for(5).is_some());
    assert!(whole.continuation_for(9).is_none());
}

#[test]
fn inserting_lines_splices_instead_of_recomputing() {
    let registry = registry();
    let before = "head\n/* open\nmiddle\n*/ close\nfoot\n";
    let after = "head\n/* open\n\n\nmiddle\n*/ close\nfoot\n";

    let mut edited = tokenizer(&registry);
    completed(edited.parse_lines(before, 0..5));

    // Two blank lines inserted at line 2
    edited.apply_edit(2..4, 2);
    let resumed = completed(edited.parse_lines(after, 2..7));

    let mut fresh = tokenizer(&registry);
    let full = completed(fresh.parse_lines(after, 0..7));

    let line2_start = after.line_start_offset(2);
    let tail: Vec<Span> = full
        .iter()
        .filter(|span| span.range.start >= line2_start)
        .cloned()
        .collect();
    assert_eq!(resumed, tail);

    for line in 1..=7 {
        assert_eq!(
            edited.continuation_for(line).unwrap().frames(),
            fresh.continuation_for(line).unwrap().frames(),
            "continuation for line {line} diverged after splice"
        );
    }
}

#[test]
fn removing_lines_splices_back() {
    let registry = registry();
    let before = "head\n/* open\n\n\nmiddle\n*/ close\nfoot\n";
    let after = "head\n/* open\nmiddle\n*/ close\nfoot\n";

    let mut edited = tokenizer(&registry);
    completed(edited.parse_lines(before, 0..7));

    edited.apply_edit(2..2, -2);
    let resumed = completed(edited.parse_lines(after, 2..5));

    let mut fresh = tokenizer(&registry);
    let full = completed(fresh.parse_lines(after, 0..5));
    let line2_start = after.line_start_offset(2);
    let tail: Vec<Span> = full
        .iter()
        .filter(|span| span.range.start >= line2_start)
        .cloned()
        .collect();
    assert_eq!(resumed, tail);
}

#[test]
fn revisions_survive_edits_that_change_nothing_structural() {
    let registry = registry();
    let text = "a\n/* x\ny */\nb\n";
    let mut t = tokenizer(&registry);
    completed(t.parse_lines(text, 0..4));

    let before: Vec<u64> = (1..=4)
        .map(|line| t.continuation_for(line).unwrap().revision())
        .collect();

    // Replace line 3's content without touching region structure
    let reworded = "a\n/* x\ny */\nc\n";
    t.apply_edit(3..4, 0);
    completed(t.parse_lines(reworded, 3..4));

    let after: Vec<u64> = (1..=4)
        .map(|line| t.continuation_for(line).unwrap().revision())
        .collect();
    assert_eq!(before, after, "identical stacks must keep their revisions");

    // Now open a region on line 3: the entry for line 4 actually changes
    let restructured = "a\n/* x\ny */\n/* c\n";
    t.apply_edit(3..4, 0);
    completed(t.parse_lines(restructured, 3..4));

    assert_eq!(t.continuation_for(4).unwrap().open_regions(), 1);
    assert_ne!(t.continuation_for(4).unwrap().revision(), before[3]);
}

#[test]
fn continuations_derive_lazily_from_the_nearest_good_line() {
    let registry = registry();
    let text = "x\n/* open\nstill\n*/\n";
    let mut t = tokenizer(&registry);

    // Nothing parsed yet; asking for line 2 re-runs lines 0 and 1 silently
    let entry = t.continuation_at(2, text);
    assert_eq!(entry.open_regions(), 1);

    // The lines crossed on the way got committed too
    assert!(t.continuation_for(1).is_some());
    assert_eq!(t.continuation_for(1).unwrap().open_regions(), 0);
}

#[test]
fn missing_continuation_degrades_to_a_fresh_start() {
    let registry = registry();
    let text = "a\n/* open\ninside\n";
    let mut t = tokenizer(&registry);

    // The host skipped the invalidation protocol: a window at line 2 with
    // an empty store. The request is still served, from an empty stack.
    let ctx = ParseContext::from_source(text, 2..3);
    let spans = completed(t.parse(&ctx));

    assert_eq!(spans.first().unwrap().range.start, text.line_start_offset(2));
    let names: Vec<String> = spans[0].scopes.iter().map(|s| s.name()).collect();
    // "inside" is tagged as plain root text, not comment interior
    assert_eq!(names, vec!["source.cish", "variable.other"]);
}

#[test]
fn newest_request_wins_and_restart_completes() {
    let registry = registry();
    let text = "one\ntwo\nthree\n";
    let mut t = tokenizer(&registry);

    let ctx = ParseContext::from_source(text, 0..3);
    let token = ctx.cancel_token();
    // A nested edit lands before the engine reaches the first line boundary
    token.cancel();
    let first = t.parse(&ctx);
    assert_eq!(
        first,
        TokenizeOutcome::Aborted(Interrupt::Cancelled { line: 0 })
    );

    // The caller resubmits against the updated buffer
    let updated = "one\nTWO\nthree\n";
    let ctx2 = ParseContext::from_source(updated, 0..3).restarting(true);
    let spans = completed(t.parse(&ctx2));

    let mut cursor = 0;
    for span in &spans {
        assert_eq!(span.range.start, cursor);
        cursor = span.range.end;
    }
    assert_eq!(cursor, updated.len());

    let stats = *t.stats();
    assert_eq!(stats.requests, 2);
    assert_eq!(stats.aborts, 1);
    assert_eq!(stats.restarts, 1);
}

#[test]
fn cancellation_is_observable_through_the_token() {
    let ctx = ParseContext::from_source("a\nb\n", 0..2);
    let token = ctx.cancel_token();
    assert!(!token.is_interrupted());
    token.cancel();
    assert!(token.is_interrupted());
}

#[test]
fn scope_queries_reflect_the_edited_buffer() {
    let registry = registry();
    let text = "a\n/* b\nc */\n";
    let mut t = tokenizer(&registry);
    completed(t.parse_lines(text, 0..3));

    let line1 = text.line_start_offset(1);
    let inside = t.scope_at(line1 + 3, text);
    assert_eq!(
        inside.iter().map(|s| s.name()).collect::<Vec<_>>(),
        vec!["source.cish", "comment.block"]
    );

    // The comment opener is deleted from line 1
    let edited = "a\nb\nc */\n";
    t.apply_edit(1..2, 0);
    let outside = t.scope_at(edited.line_start_offset(1), edited);
    assert_eq!(
        outside.iter().map(|s| s.name()).collect::<Vec<_>>(),
        vec!["source.cish", "variable.other"]
    );
}
