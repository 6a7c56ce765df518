//! The evaluation engine: keyword registry plus per-keyword handlers
//!
//! A [`FormulaEngine`] owns a [`KeywordSet`], its compiled pattern set, and a registry of
//! evaluation handlers. Evaluation walks the resolved tree bottom-up and calls each node's
//! handler with the node and a shared mutable [`Context`]. Handlers are arbitrary closures,
//! which makes them the opt-in mechanism for anything computed from tag content.

use crate::error::{EvalError, FormulaError};
use crate::keyword::{Keyword, KeywordSet};
use crate::matcher::PatternSet;
use crate::resolve::analyse_with_patterns;
use crate::tree::{Formula, Value};
use fnv::FnvHashMap;
use tracing::trace;

/// The shared parameter bag handlers read from and write to
pub type Context = serde_json::Map<String, Value>;

/// An evaluation callback for one keyword
///
/// Receives the node after all of its children have been evaluated. The handler typically
/// inspects [`Formula::content`] and the children's values and stores a result in
/// [`Formula::value`].
pub type Handler =
    Box<dyn for<'s> Fn(&mut Formula<'s>, &mut Context) -> Result<(), EvalError> + Send + Sync>;

/// A keyword table with evaluation handlers attached
///
/// The compiled pattern set is cached and recomputed whenever the keyword table changes, so
/// repeated runs against the same engine never recompile.
///
/// # Example
/// ```
/// use formula_parser::{template_keywords, Context, FormulaEngine, Value};
///
/// let engine = FormulaEngine::new(template_keywords(), false)
///     .with_handler("expr", |node, _ctx| {
///         node.value = Value::String(node.content().to_uppercase());
///         Ok(())
///     });
/// let mut ctx = Context::new();
/// let tree = engine.run_formula("{$expr=abc$}", &mut ctx).unwrap();
/// assert_eq!(tree.value, Value::String("ABC".into()));
/// ```
pub struct FormulaEngine {
    keywords: KeywordSet,
    patterns: PatternSet,
    handlers: FnvHashMap<String, Handler>,
    default_handler: Handler,
    ignore_case: bool,
}

impl FormulaEngine {
    /// Create an engine over a keyword table
    ///
    /// No per-keyword handlers are registered; every node falls back to the
    /// [`inner_content`][handlers::inner_content] default until
    /// [`with_handler`][FormulaEngine::with_handler] or
    /// [`add_keyword`][FormulaEngine::add_keyword] attaches one.
    pub fn new(keywords: KeywordSet, ignore_case: bool) -> Self {
        let patterns = keywords.compile();
        FormulaEngine {
            keywords,
            patterns,
            handlers: FnvHashMap::default(),
            default_handler: handlers::inner_content(),
            ignore_case,
        }
    }

    /// Attach a handler for one keyword, replacing any previous one
    pub fn with_handler<F>(mut self, keyword: impl Into<String>, handler: F) -> Self
    where
        F: for<'s> Fn(&mut Formula<'s>, &mut Context) -> Result<(), EvalError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(keyword.into(), Box::new(handler));
        self
    }

    /// Replace the fallback handler used for keywords without their own
    pub fn with_default_handler<F>(mut self, handler: F) -> Self
    where
        F: for<'s> Fn(&mut Formula<'s>, &mut Context) -> Result<(), EvalError>
            + Send
            + Sync
            + 'static,
    {
        self.default_handler = Box::new(handler);
        self
    }

    /// The current keyword table
    pub fn keywords(&self) -> &KeywordSet {
        &self.keywords
    }

    /// Declare a keyword, optionally with its handler
    ///
    /// # Errors
    /// [`FormulaError::DuplicateKeyword`] (or [`FormulaError::DuplicateHandler`]) when the name
    /// is already taken and `replace` is false.
    pub fn add_keyword(
        &mut self,
        name: impl Into<String>,
        keyword: Keyword,
        handler: Option<Handler>,
        replace: bool,
    ) -> Result<(), FormulaError> {
        let name = name.into();
        if !replace && self.keywords.contains(&name) {
            return Err(FormulaError::DuplicateKeyword(name));
        }
        if let Some(handler) = handler {
            if !replace && self.handlers.contains_key(&name) {
                return Err(FormulaError::DuplicateHandler(name));
            }
            self.handlers.insert(name.clone(), handler);
        }
        self.keywords.insert(name, keyword);
        self.patterns = self.keywords.compile();
        Ok(())
    }

    /// Remove a keyword and, when asked, its handler
    ///
    /// # Errors
    /// [`FormulaError::UnknownKeyword`] when no keyword with this name is declared.
    pub fn delete_keyword(&mut self, name: &str, with_handler: bool) -> Result<(), FormulaError> {
        if self.keywords.remove(name).is_none() {
            return Err(FormulaError::UnknownKeyword(name.into()));
        }
        if with_handler {
            self.handlers.remove(name);
        }
        self.patterns = self.keywords.compile();
        Ok(())
    }

    /// Remove every keyword and, when asked, every handler
    pub fn clear_keywords(&mut self, with_handlers: bool) {
        self.keywords.clear();
        if with_handlers {
            self.handlers.clear();
        }
        self.patterns = self.keywords.compile();
    }

    /// Resolve a source string with this engine's keyword table, without evaluating
    ///
    /// # Errors
    /// [`FormulaError::Unterminated`] when a tag region is never closed.
    pub fn analyse<'a>(&self, source: &'a str) -> Result<Formula<'a>, FormulaError> {
        analyse_with_patterns(source, &self.keywords, &self.patterns, self.ignore_case)
    }

    /// Resolve and evaluate a source string
    ///
    /// Children are evaluated before their parents; each node's handler sees the node's raw
    /// content and its children's already-computed values. Returns the evaluated tree, whose
    /// root value is whatever the root's handler produced.
    ///
    /// # Errors
    /// Resolution errors, or [`FormulaError::Eval`] when a handler fails.
    pub fn run_formula<'a>(
        &self,
        source: &'a str,
        ctx: &mut Context,
    ) -> Result<Formula<'a>, FormulaError> {
        let mut tree = self.analyse(source)?;
        self.eval(&mut tree, ctx)?;
        Ok(tree)
    }

    /// Resolve and evaluate with textual substitution
    ///
    /// Like [`run_formula`][FormulaEngine::run_formula], except that before a parent's handler
    /// runs, every occurrence of each child's raw text in the parent's content is replaced by
    /// the child's string-coerced value; the parent's handler observes the rewritten text via
    /// [`Formula::content`]. The original content is restored afterwards, and every node's
    /// final value is coerced to a string.
    ///
    /// # Errors
    /// Resolution errors, or [`FormulaError::Eval`] when a handler fails.
    pub fn run_formula_as_string<'a>(
        &self,
        source: &'a str,
        ctx: &mut Context,
    ) -> Result<Formula<'a>, FormulaError> {
        let mut tree = self.analyse(source)?;
        self.eval_as_string(&mut tree, ctx)?;
        Ok(tree)
    }

    fn apply(&self, node: &mut Formula<'_>, ctx: &mut Context) -> Result<(), FormulaError> {
        trace!(keyword = %node.keyword, start = node.start, "evaluating node");
        let handler = self
            .handlers
            .get(&node.keyword)
            .unwrap_or(&self.default_handler);
        handler(node, ctx).map_err(FormulaError::Eval)
    }

    fn eval(&self, node: &mut Formula<'_>, ctx: &mut Context) -> Result<(), FormulaError> {
        for child in &mut node.children {
            self.eval(child, ctx)?;
        }
        self.apply(node, ctx)
    }

    fn eval_as_string(&self, node: &mut Formula<'_>, ctx: &mut Context) -> Result<(), FormulaError> {
        for child in &mut node.children {
            self.eval_as_string(child, ctx)?;
        }
        if !node.children.is_empty() {
            let mut content = node.raw_content().to_string();
            for child in &node.children {
                content = content.replace(child.raw, &child.value_string());
            }
            node.substituted = Some(content);
        }
        let result = self.apply(node, ctx);
        node.substituted = None;
        result?;
        node.value = Value::String(node.value_string());
        Ok(())
    }
}

/// Built-in evaluation handlers
pub mod handlers {
    use super::{Handler, Value};

    /// Value the node with its full matched text, tags included
    pub fn full_text() -> Handler {
        Box::new(|node, _ctx| {
            node.value = Value::String(node.raw.to_string());
            Ok(())
        })
    }

    /// Value the node with the content between its tags
    ///
    /// This is the engine's fallback for keywords without a registered handler. In
    /// string-substitution mode it sees the substituted content, which makes an unhandled
    /// tree render itself tags-stripped.
    pub fn inner_content() -> Handler {
        Box::new(|node, _ctx| {
            node.value = Value::String(node.content().to_string());
            Ok(())
        })
    }

    /// Value the node with the current local time rendered by a [`chrono`] format string
    pub fn timestamp(format: impl Into<String>) -> Handler {
        let format = format.into();
        Box::new(move |node, _ctx| {
            node.value = Value::String(chrono::Local::now().format(&format).to_string());
            Ok(())
        })
    }
}
