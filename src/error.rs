//! Error types for resolution and evaluation

use thiserror::Error;

/// The error type evaluation handlers may fail with
///
/// Handler failures are forwarded to the caller unmodified; the evaluator performs no recovery
/// and returns no partial tree.
pub type EvalError = Box<dyn std::error::Error + Send + Sync>;

/// Everything that can go wrong while resolving or evaluating a formula
#[derive(Debug, Error)]
pub enum FormulaError {
    /// A tag that requires a terminator was never closed
    #[error(
        "no closing `{expected}` for tag `{keyword}` opened with `{begin}` at byte {start}"
    )]
    Unterminated {
        /// The keyword whose region was left open
        keyword: String,
        /// The begin tag text that opened the region
        begin: String,
        /// A description of the terminator that was expected
        expected: String,
        /// Byte offset of the begin tag in the source string
        start: usize,
    },
    /// A keyword with this name is already declared
    #[error("keyword `{0}` is already declared")]
    DuplicateKeyword(String),
    /// A handler for this keyword is already registered
    #[error("handler for keyword `{0}` is already registered")]
    DuplicateHandler(String),
    /// No keyword with this name is declared
    #[error("unknown keyword `{0}`")]
    UnknownKeyword(String),
    /// An evaluation handler failed; the inner error is the handler's own
    #[error(transparent)]
    Eval(#[from] EvalError),
}
