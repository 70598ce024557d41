use crate::tokenizer::stack::StackFrame;

/// The continuation valid at the *start* of one line: the stack of regions
/// still open there, plus a revision token consumers can key caches on. The
/// revision only changes when the stack itself changes, so re-tokenizing a
/// line to an identical continuation invalidates nothing downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuationEntry {
    frames: Vec<StackFrame>,
    revision: u64,
}

impl ContinuationEntry {
    /// The open regions at the start of the line, outermost first (the
    /// first frame is always the grammar root).
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Identity token for cache invalidation
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// How many regions are open at the start of the line (the grammar root
    /// does not count). Zero means the line starts fresh — which is still a
    /// computed fact, distinct from "not yet computed".
    pub fn open_regions(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }
}

/// "Not yet computed" (Vacant), "computed but invalidated by an edit"
/// (Stale) and "usable" (Valid) are three distinct states: a stale entry is
/// never served, but it is kept so a recomputation that arrives at the same
/// stack can keep the old revision.
#[derive(Debug, Clone)]
enum Slot {
    Vacant,
    Stale(ContinuationEntry),
    Valid(ContinuationEntry),
}

/// Dense, line-indexed record of continuations.
///
/// Entry `N` is derived solely from lines `< N`, which is what makes the
/// splice operation sound: inserting or removing lines moves entries around
/// without recomputing them, and `invalidate_from` plus lazy re-derivation
/// repairs whatever the edit actually changed.
#[derive(Debug, Default)]
pub struct ContinuationStore {
    slots: Vec<Slot>,
    next_revision: u64,
}

impl ContinuationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The continuation for `line`, if it has been computed and not
    /// invalidated since.
    pub fn continuation_for(&self, line: usize) -> Option<&ContinuationEntry> {
        match self.slots.get(line) {
            Some(Slot::Valid(entry)) => Some(entry),
            _ => None,
        }
    }

    /// Store the continuation derived for the start of `line`. Returns the
    /// entry's revision: reused when the stack is unchanged from what was
    /// previously recorded (valid or stale), fresh otherwise.
    pub(crate) fn commit(&mut self, line: usize, frames: Vec<StackFrame>) -> u64 {
        self.ensure_len(line + 1);
        let previous = match &self.slots[line] {
            Slot::Valid(entry) | Slot::Stale(entry) => Some(entry),
            Slot::Vacant => None,
        };
        let revision = match previous {
            Some(entry) if entry.frames == frames => entry.revision,
            _ => {
                self.next_revision += 1;
                self.next_revision
            }
        };
        self.slots[line] = Slot::Valid(ContinuationEntry { frames, revision });
        revision
    }

    /// Index-splice for a line-count change: removes the entries of
    /// `removed` lines at `at_line` and shifts everything behind them,
    /// leaving `inserted` not-yet-computed slots in their place. No entry is
    /// recomputed here.
    pub fn splice(&mut self, at_line: usize, removed: usize, inserted: usize) {
        if at_line < self.slots.len() {
            let removed_end = (at_line + removed).min(self.slots.len());
            let _ = self.slots.drain(at_line..removed_end);
        }
        if inserted > 0 && at_line <= self.slots.len() {
            let _ = self
                .slots
                .splice(at_line..at_line, std::iter::repeat_n(Slot::Vacant, inserted));
        }
    }

    /// Drops (demotes) every entry at or after `line`; they will be
    /// recomputed on next access.
    pub fn invalidate_from(&mut self, line: usize) {
        for slot in self.slots.iter_mut().skip(line) {
            if let Slot::Valid(entry) = slot {
                *slot = Slot::Stale(entry.clone());
            }
        }
    }

    /// Largest line `<= line` whose continuation is usable; line 0 always
    /// qualifies (a document starts with nothing open).
    pub fn nearest_valid_at_or_before(&self, line: usize) -> usize {
        (1..=line)
            .rev()
            .find(|&l| self.continuation_for(l).is_some())
            .unwrap_or(0)
    }

    fn ensure_len(&mut self, len: usize) {
        if self.slots.len() < len {
            self.slots.resize_with(len, || Slot::Vacant);
        }
    }
}
