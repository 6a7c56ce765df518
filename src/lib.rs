//! A fast extensible nested-tag formula parser and evaluator
//!
//! This crate parses strings containing begin/end tag pairs (a "formula" dialect such as
//! `{$expr=...$}`) into a tree of [`Formula`] nodes, then evaluates the tree bottom-up with
//! per-keyword handlers. The parsed structure keeps references to the underlying string in
//! order to avoid copies, so a tree borrows the source it was resolved from.
//!
//! Parsing happens in two phases. The [`matcher`] scans the source once for every tag
//! occurrence, honoring per-tag context constraints (for example a keyword that only counts
//! when delimited by whitespace). The resolver then walks the flat match list and pairs begin
//! tags with their terminators, recursing into nested content, skipping escaped terminators
//! inside string literals, and closing sentinel-terminated regions at the next tag or the end
//! of input.
//!
//! ## Usage
//!
//! ```sh
//! cargo add formula-parser
//! ```
//!
//! then
//!
//! ```
//! let tree = formula_parser::analyse("a {$expr=1+1$} b").unwrap();
//! assert_eq!(tree.children[0].content(), "1+1");
//! ```
//!
//! ## Dialects
//!
//! The tag dialect is data, not code: a [`KeywordSet`] declares each keyword's begin tag,
//! end tag or [`EndMarker`]s, and options such as [`single_tag`][KeywordOptions::single_tag]
//! or string-literal escaping. [`analyse`] uses the built-in [`template_keywords`] dialect;
//! [`analyse_formula`] takes any table.
//!
//! ## Evaluation
//!
//! A [`FormulaEngine`] couples a keyword table with evaluation handlers, closures called for
//! each node after its children. [`FormulaEngine::run_formula`] evaluates structurally;
//! [`FormulaEngine::run_formula_as_string`] additionally splices each child's value into its
//! parent's content, which turns a tree into a rendered string:
//!
//! ```
//! use formula_parser::{template_keywords, Context, FormulaEngine, Value};
//!
//! let engine = FormulaEngine::new(template_keywords(), false)
//!     .with_handler("expr", |node, _ctx| {
//!         node.value = Value::String(node.content().to_uppercase());
//!         Ok(())
//!     });
//! let mut ctx = Context::new();
//! let tree = engine.run_formula_as_string("say {$expr=hi$}!", &mut ctx).unwrap();
//! assert_eq!(tree.value, Value::String("say HI!".into()));
//! ```
#![warn(missing_docs)]

mod engine;
mod error;
mod keyword;
pub mod matcher;
mod resolve;
pub mod tree;

pub use engine::{handlers, Context, FormulaEngine, Handler};
pub use error::{EvalError, FormulaError};
pub use keyword::{template_keywords, EndMarker, Keyword, KeywordOptions, KeywordSet, TagDef};
pub use matcher::{search, CharRule, Match, Pattern, PatternSet, SortOrder};
pub use resolve::{analyse, analyse_formula};
pub use tree::{Formula, Value};
