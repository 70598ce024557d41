mod buffer;
mod error;
mod grammars;
mod registry;
mod scope;
mod tokenizer;

pub use buffer::TextSource;
pub use error::{Error, PatternError};
pub use grammars::{CompiledGrammar, GlobalRuleRef, GrammarId, RawGrammar, Regex, RuleId};
pub use registry::{PLAIN_GRAMMAR_NAME, Registry};
pub use scope::{Scope, path_to_string};
pub use tokenizer::{
    CancelToken, ContinuationEntry, ContinuationStore, Interrupt, ParseContext, ParseStats, Span,
    StackFrame, StateStack, TokenizeOutcome, Tokenizer,
};
