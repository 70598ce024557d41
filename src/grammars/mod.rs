mod compiled;
mod pattern_set;
mod raw;
mod regex;

pub use compiled::*;
pub use pattern_set::{PatternMatch, PatternSet};
pub use raw::{RawGrammar, RawRule};
pub use regex::{Regex, escape_literal, resolve_backreferences};
