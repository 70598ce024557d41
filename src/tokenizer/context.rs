use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::buffer::TextSource;
use crate::scope::Scope;

/// One scope-tagged stretch of text.
///
/// `range` is absolute (buffer offsets), `scopes` is the full scope path at
/// those positions, outermost (language root) first. Spans from one request
/// are emitted in strictly increasing, non-overlapping order; adjacent spans
/// with identical paths are legal and may be merged by the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub range: Range<usize>,
    pub scopes: Vec<Scope>,
}

const LIVE: u8 = 0;
const CANCELLED: u8 = 1;
const SUPERSEDED: u8 = 2;

/// Shared cancellation signal for one parse request.
///
/// The owner clones it before submitting the request; when the underlying
/// buffer changes mid-flight (a nested edit), cancelling the token makes the
/// in-flight request return `Aborted` at its next line boundary. The
/// tokenizer itself flips the token to "superseded" when a newer request
/// takes over the lane.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<AtomicU8>);

impl CancelToken {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(LIVE)))
    }

    /// Mark the request stale because the buffer it was reading changed.
    pub fn cancel(&self) {
        let _ = self
            .0
            .compare_exchange(LIVE, CANCELLED, Ordering::AcqRel, Ordering::Acquire);
    }

    pub(crate) fn supersede(&self) {
        let _ = self
            .0
            .compare_exchange(LIVE, SUPERSEDED, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::Acquire) != LIVE
    }

    pub(crate) fn interruption(&self, line: usize) -> Option<Interrupt> {
        match self.0.load(Ordering::Acquire) {
            CANCELLED => Some(Interrupt::Cancelled { line }),
            SUPERSEDED => Some(Interrupt::Superseded { line }),
            _ => None,
        }
    }
}

/// Why a parse request stopped early. `line` is the first line that was
/// *not* processed; everything before it was already committed to the
/// continuation store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// The owner cancelled the request (the buffer changed under it)
    Cancelled { line: usize },
    /// A newer request took over the tokenizing lane
    Superseded { line: usize },
}

/// The result of one parse request. An aborted request is not an error: the
/// caller resubmits with `restarting` set and an up-to-date window.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenizeOutcome {
    Completed(Vec<Span>),
    Aborted(Interrupt),
}

impl TokenizeOutcome {
    pub fn spans(&self) -> Option<&[Span]> {
        match self {
            TokenizeOutcome::Completed(spans) => Some(spans),
            TokenizeOutcome::Aborted(_) => None,
        }
    }

    pub fn into_spans(self) -> Option<Vec<Span>> {
        match self {
            TokenizeOutcome::Completed(spans) => Some(spans),
            TokenizeOutcome::Aborted(_) => None,
        }
    }
}

/// The per-request input to the tokenizer: a character window, where that
/// window sits in the buffer, and the request flags. Created per call,
/// dropped when the call returns.
#[derive(Debug)]
pub struct ParseContext {
    window: String,
    /// Absolute offset of `window[0]`; must be the start of `line_offset`
    start_offset: usize,
    /// Line number of the window's first line
    line_offset: usize,
    /// Sub-range of the window to emit spans for (defaults to all of it)
    range: Range<usize>,
    /// True when this request resumes after an aborted one
    restarting: bool,
    cancel: CancelToken,
}

impl ParseContext {
    /// `window` must start at the beginning of line `line_offset`, at
    /// absolute offset `start_offset`.
    pub fn new(window: impl Into<String>, start_offset: usize, line_offset: usize) -> Self {
        let window = window.into();
        let range = start_offset..start_offset + window.len();
        Self {
            window,
            start_offset,
            line_offset,
            range,
            restarting: false,
            cancel: CancelToken::new(),
        }
    }

    /// Build a context covering whole lines `lines` of `source`.
    pub fn from_source<S: TextSource + ?Sized>(source: &S, lines: Range<usize>) -> Self {
        let start = source.line_start_offset(lines.start);
        let end = source.line_start_offset(lines.end);
        Self::new(
            source.characters_in_range(start..end).into_owned(),
            start,
            lines.start,
        )
    }

    /// Narrow the emitted spans to `range` (absolute offsets, clamped to the
    /// window). Matching still sees whole lines.
    pub fn with_range(mut self, range: Range<usize>) -> Self {
        let window_end = self.start_offset + self.window.len();
        self.range = range.start.clamp(self.start_offset, window_end)
            ..range.end.clamp(self.start_offset, window_end);
        self
    }

    pub fn restarting(mut self, flag: bool) -> Self {
        self.restarting = flag;
        self
    }

    /// A handle the owner keeps to cancel this request if the buffer
    /// changes while it runs.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn window(&self) -> &str {
        &self.window
    }

    pub fn start_offset(&self) -> usize {
        self.start_offset
    }

    pub fn line_offset(&self) -> usize {
        self.line_offset
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting
    }

    pub(crate) fn interruption(&self, line: usize) -> Option<Interrupt> {
        self.cancel.interruption(line)
    }
}

/// Running totals across every request a tokenizer served. Observational
/// only; nothing reads these for correctness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Candidate-set searches attempted
    pub patterns_tried: u64,
    /// Searches that produced a match
    pub patterns_matched: u64,
    /// Candidate sets served from the compiled cache
    pub pattern_sets_cached: u64,
    pub lines_tokenized: u64,
    pub requests: u64,
    /// Requests that arrived with the `restarting` flag
    pub restarts: u64,
    pub aborts: u64,
}
