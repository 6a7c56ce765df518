//! The resolved formula tree
//!
//! A [`Formula`] is one matched tag region of the source string: the keyword that matched, the
//! full `begin..end` byte span, the content strictly between the tags, and the child formulas
//! found inside that content. Like the rest of the crate it keeps references to the underlying
//! string instead of copying it, so a tree is only valid while the source string is alive.
//!
//! Trees are produced by [`analyse_formula`][crate::analyse_formula] and evaluated in place by
//! [`FormulaEngine`][crate::FormulaEngine], which fills in [`Formula::value`].

use std::ops::Range;

pub use serde_json::Value;

/// One resolved tag region and its nested children
///
/// Sibling spans never overlap, and every child's span lies strictly inside its parent's
/// content span. The root returned for a whole document may be a synthetic node with an empty
/// keyword spanning the entire input when the input does not collapse to a single tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula<'a> {
    /// The name of the keyword that matched, empty for a synthetic root
    pub keyword: String,
    /// The full matched text, begin tag through end tag inclusive
    pub raw: &'a str,
    /// Byte offset of the region start in the source string
    pub start: usize,
    /// Byte offset just past the region end
    pub end: usize,
    /// Byte offset where the content between the tags starts
    pub content_start: usize,
    /// Byte offset just past the content
    pub content_end: usize,
    /// Nested formulas in left-to-right source order
    pub children: Vec<Formula<'a>>,
    /// The evaluated value, [`Value::Null`] until an evaluator sets it
    pub value: Value,
    inner: &'a str,
    // string-substitution mode: the rewritten content, visible only while this node's own
    // handler runs
    pub(crate) substituted: Option<String>,
}

impl<'a> Formula<'a> {
    /// Create a node from its spans within the source string
    ///
    /// # Panics
    /// When the spans are out of bounds or not on character boundaries.
    pub fn from_spans(
        source: &'a str,
        keyword: impl Into<String>,
        span: Range<usize>,
        content: Range<usize>,
    ) -> Self {
        Formula {
            keyword: keyword.into(),
            raw: &source[span.clone()],
            start: span.start,
            end: span.end,
            content_start: content.start,
            content_end: content.end,
            children: Vec::new(),
            value: Value::Null,
            inner: &source[content],
            substituted: None,
        }
    }

    /// The content between the tags
    ///
    /// During string-substitution evaluation of this node itself this is the content with child
    /// regions textually replaced by their values; at any other time it is the original slice,
    /// equal to [`raw_content`][Formula::raw_content].
    pub fn content(&self) -> &str {
        self.substituted.as_deref().unwrap_or(self.inner)
    }

    /// The original content slice of the source string
    pub fn raw_content(&self) -> &'a str {
        self.inner
    }

    /// The byte span of the whole region
    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The byte span of the content between the tags
    pub fn content_span(&self) -> Range<usize> {
        self.content_start..self.content_end
    }

    /// The value coerced to a string
    ///
    /// [`Value::String`] yields the string itself, [`Value::Null`] the empty string, and any
    /// other value its JSON rendering.
    pub fn value_string(&self) -> String {
        match &self.value {
            Value::Null => String::new(),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}
