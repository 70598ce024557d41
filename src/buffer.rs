//! The buffer-access capability the tokenizer's host implements.

use std::borrow::Cow;
use std::ops::Range;

/// Read access to the text being tokenized, injected by the host.
///
/// The tokenizer only ever reads through this trait; it never reaches back
/// into view or document state. Offsets are byte offsets, lines are 0-based,
/// and a line's text includes its trailing newline (except possibly the last
/// line of the buffer).
pub trait TextSource {
    /// Number of lines in the buffer. An empty buffer has one empty line.
    fn line_count(&self) -> usize;

    /// Byte offset at which `line` starts. `line == line_count()` returns
    /// the end of the buffer, so `line_start_offset(l)..line_start_offset(l + 1)`
    /// is always the span of line `l`.
    fn line_start_offset(&self, line: usize) -> usize;

    /// The text in `range`.
    fn characters_in_range(&self, range: Range<usize>) -> Cow<'_, str>;
}

/// Convenience implementation for plain string buffers; scans for line
/// starts, so hosts with a real line index should implement the trait
/// themselves.
impl TextSource for str {
    fn line_count(&self) -> usize {
        self.bytes().filter(|&b| b == b'\n').count() + 1
    }

    fn line_start_offset(&self, line: usize) -> usize {
        if line == 0 {
            return 0;
        }
        let mut remaining = line;
        for (idx, b) in self.bytes().enumerate() {
            if b == b'\n' {
                remaining -= 1;
                if remaining == 0 {
                    return idx + 1;
                }
            }
        }
        self.len()
    }

    fn characters_in_range(&self, range: Range<usize>) -> Cow<'_, str> {
        Cow::Borrowed(&self[range])
    }
}
