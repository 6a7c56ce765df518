//! Keyword tables: the declarative description of a tag dialect
//!
//! A [`Keyword`] names one logical tag type: its begin tag, an optional end tag, and
//! [`KeywordOptions`] describing how its region terminates and whether its content is parsed
//! further. A [`KeywordSet`] collects keywords in declaration order and
//! [compiles][KeywordSet::compile] them into the flat [`PatternSet`] the matcher scans for.

use crate::matcher::{CharRule, PatternSet};
use lazy_static::lazy_static;
use indexmap::IndexMap;

/// A literal tag with optional front and back context constraints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagDef {
    /// The literal tag text
    pub text: String,
    /// Required characters immediately before the tag; empty means unconstrained
    pub front: Vec<CharRule>,
    /// Required characters immediately after the tag; empty means unconstrained
    pub back: Vec<CharRule>,
}

impl TagDef {
    /// A tag without context constraints
    pub fn new(text: impl Into<String>) -> Self {
        TagDef {
            text: text.into(),
            front: Vec::new(),
            back: Vec::new(),
        }
    }

    /// A tag with explicit front and back context rules
    pub fn with_context(
        text: impl Into<String>,
        front: Vec<CharRule>,
        back: Vec<CharRule>,
    ) -> Self {
        TagDef {
            text: text.into(),
            front,
            back,
        }
    }
}

/// A non-literal end condition for keywords declared without an end tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndMarker {
    /// The region extends to the end of the source string
    EndOfInput,
    /// The region ends where the next recognized begin tag starts
    NextTag,
    /// The region ends at this literal marker (e.g. an escape terminator)
    Literal(String),
}

/// How a keyword's region is delimited and interpreted
///
/// Exactly one of "explicit end tag", [`single_tag`][KeywordOptions::single_tag] or a non-empty
/// [`end_markers`][KeywordOptions::end_markers] should describe the termination strategy. The
/// combination is not validated up front; the resolver checks `single_tag`, then
/// [`string_literal`][KeywordOptions::string_literal], then
/// [`sub_formulas`][KeywordOptions::sub_formulas], in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordOptions {
    /// The begin tag alone is the whole region; no content and no end tag
    pub single_tag: bool,
    /// Recurse into the content looking for nested tags
    pub sub_formulas: bool,
    /// The content is a literal string; never recursed into
    pub string_literal: bool,
    /// Sequences that look like the end tag inside a string literal but must be skipped,
    /// e.g. `\"` or `""`
    pub string_ignore: Vec<String>,
    /// End conditions used when no explicit end tag is declared
    pub end_markers: Vec<EndMarker>,
}

impl Default for KeywordOptions {
    fn default() -> Self {
        KeywordOptions {
            single_tag: false,
            sub_formulas: true,
            string_literal: false,
            string_ignore: Vec::new(),
            end_markers: Vec::new(),
        }
    }
}

impl KeywordOptions {
    /// Options for a standalone tag with no content
    pub fn single() -> Self {
        KeywordOptions {
            single_tag: true,
            ..Self::default()
        }
    }

    /// Options for a string literal with the given ignore sequences
    pub fn string<I, S>(ignore: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeywordOptions {
            string_literal: true,
            sub_formulas: false,
            string_ignore: ignore.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Options for a nested tag terminated by the given markers instead of an end tag
    pub fn until<I>(markers: I) -> Self
    where
        I: IntoIterator<Item = EndMarker>,
    {
        KeywordOptions {
            end_markers: markers.into_iter().collect(),
            ..Self::default()
        }
    }
}

/// One logical tag type in a dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    /// The begin tag
    pub begin: TagDef,
    /// The end tag, if the keyword has a literal one
    pub end: Option<TagDef>,
    /// Termination and content options
    pub options: KeywordOptions,
}

impl Keyword {
    /// Create a keyword from all of its parts
    pub fn new(begin: TagDef, end: Option<TagDef>, options: KeywordOptions) -> Self {
        Keyword { begin, end, options }
    }

    /// A keyword with begin and end tags and default options (nested content)
    pub fn enclosed(begin: TagDef, end: TagDef) -> Self {
        Keyword::new(begin, Some(end), KeywordOptions::default())
    }

    /// A standalone tag
    pub fn single(begin: TagDef) -> Self {
        Keyword::new(begin, None, KeywordOptions::single())
    }
}

/// A declaration-ordered collection of named keywords
///
/// Declaration order is meaningful: it is the order the resolver tries begin tags in, and it
/// becomes the pattern declaration rank used by the matcher's sort orders. Inserting a name
/// that already exists replaces the previous definition.
#[derive(Debug, Clone, Default)]
pub struct KeywordSet {
    keywords: IndexMap<String, Keyword>,
}

impl KeywordSet {
    /// Create an empty keyword set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a keyword, returning the previous definition if any
    pub fn insert(&mut self, name: impl Into<String>, keyword: Keyword) -> Option<Keyword> {
        self.keywords.insert(name.into(), keyword)
    }

    /// Remove a keyword by name, preserving the declaration order of the rest
    pub fn remove(&mut self, name: &str) -> Option<Keyword> {
        self.keywords.shift_remove(name)
    }

    /// Remove every keyword
    pub fn clear(&mut self) {
        self.keywords.clear();
    }

    /// Look up a keyword by name
    pub fn get(&self, name: &str) -> Option<&Keyword> {
        self.keywords.get(name)
    }

    /// Whether a keyword with this name is declared
    pub fn contains(&self, name: &str) -> bool {
        self.keywords.contains_key(name)
    }

    /// Iterate keywords in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Keyword)> {
        self.keywords.iter().map(|(name, kw)| (name.as_str(), kw))
    }

    /// The number of declared keywords
    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    /// Whether no keywords are declared
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Flatten the keyword table into the pattern set the matcher scans for
    ///
    /// Every begin tag is registered with its context rules, as is every explicit end tag.
    /// Keywords without an end tag register each [`EndMarker::Literal`] as its own pattern
    /// (the sentinels have no literal text to find). String literals additionally register
    /// their ignore sequences so the resolver can detect shadowed terminators. Identical
    /// pattern texts from different keywords are merged per
    /// [`PatternSet::insert`].
    pub fn compile(&self) -> PatternSet {
        let mut patterns = PatternSet::new();
        for (_, keyword) in self.keywords.iter() {
            let begin = &keyword.begin;
            patterns.insert(&begin.text, begin.front.clone(), begin.back.clone());
            if let Some(end) = &keyword.end {
                patterns.insert(&end.text, end.front.clone(), end.back.clone());
            } else if !keyword.options.single_tag {
                for marker in &keyword.options.end_markers {
                    if let EndMarker::Literal(text) = marker {
                        patterns.insert(text, Vec::new(), Vec::new());
                    }
                }
            }
            if keyword.options.string_literal {
                for sequence in &keyword.options.string_ignore {
                    patterns.insert(sequence, Vec::new(), Vec::new());
                }
            }
        }
        patterns
    }
}

impl<S: Into<String>> FromIterator<(S, Keyword)> for KeywordSet {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (S, Keyword)>,
    {
        let mut set = KeywordSet::new();
        for (name, keyword) in iter {
            set.insert(name, keyword);
        }
        set
    }
}

/// The default template-tag dialect used by [`analyse`][crate::analyse]
///
/// Three keywords: `expr` (`{$expr=` ... `$}`, nested), `string` (double-quoted literal with
/// `\"` and `""` as escape sequences) and `now` (the standalone tag `{$now$}`).
pub fn template_keywords() -> KeywordSet {
    [
        (
            "expr",
            Keyword::enclosed(TagDef::new("{$expr="), TagDef::new("$}")),
        ),
        (
            "string",
            Keyword::new(
                TagDef::new("\""),
                Some(TagDef::new("\"")),
                KeywordOptions::string(["\\\"", "\"\""]),
            ),
        ),
        ("now", Keyword::single(TagDef::new("{$now$}"))),
    ]
    .into_iter()
    .collect()
}

lazy_static! {
    pub(crate) static ref TEMPLATE_KEYWORDS: KeywordSet = template_keywords();
}

#[cfg(test)]
mod tests {
    use super::{EndMarker, Keyword, KeywordOptions, KeywordSet, TagDef};
    use crate::matcher::CharRule;

    #[test]
    fn compile_registers_begin_and_end_tags() {
        let mut keywords = KeywordSet::new();
        keywords.insert(
            "py",
            Keyword::enclosed(TagDef::new("{$PY="), TagDef::new("$}")),
        );
        let patterns = keywords.compile();
        assert_eq!(patterns.len(), 2);
        assert!(patterns.get("{$PY=").is_some());
        assert!(patterns.get("$}").is_some());
    }

    #[test]
    fn sentinel_markers_are_not_patterns() {
        let mut keywords = KeywordSet::new();
        keywords.insert(
            "tail",
            Keyword::new(
                TagDef::new("{$end="),
                None,
                KeywordOptions::until([
                    EndMarker::EndOfInput,
                    EndMarker::NextTag,
                    EndMarker::Literal("\\$".into()),
                ]),
            ),
        );
        let patterns = keywords.compile();
        assert_eq!(patterns.len(), 2);
        assert!(patterns.get("\\$").is_some());
    }

    #[test]
    fn string_ignore_sequences_become_patterns() {
        let mut keywords = KeywordSet::new();
        keywords.insert(
            "string",
            Keyword::new(
                TagDef::new("\""),
                Some(TagDef::new("\"")),
                KeywordOptions::string(["\\\"", "\"\""]),
            ),
        );
        let patterns = keywords.compile();
        assert_eq!(patterns.len(), 3);
        assert!(patterns.get("\\\"").is_some());
        assert!(patterns.get("\"\"").is_some());
    }

    #[test]
    fn shared_tag_text_merges_contexts() {
        let mut keywords = KeywordSet::new();
        keywords.insert(
            "a",
            Keyword::enclosed(
                TagDef::with_context("$}", vec![CharRule::Literal('x')], Vec::new()),
                TagDef::new("end"),
            ),
        );
        keywords.insert(
            "b",
            Keyword::enclosed(TagDef::new("$}"), TagDef::new("end")),
        );
        let patterns = keywords.compile();
        let merged = patterns.get("$}").unwrap();
        assert!(merged.front.contains(&CharRule::Any));
        assert!(merged.front.contains(&CharRule::Literal('x')));
    }

    #[test]
    fn insert_replaces_and_remove_keeps_order() {
        let mut keywords = KeywordSet::new();
        keywords.insert("a", Keyword::single(TagDef::new("<a>")));
        keywords.insert("b", Keyword::single(TagDef::new("<b>")));
        keywords.insert("c", Keyword::single(TagDef::new("<c>")));
        let previous = keywords.insert("b", Keyword::single(TagDef::new("<B>")));
        assert_eq!(previous.unwrap().begin.text, "<b>");
        keywords.remove("a");
        let names: Vec<_> = keywords.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["b", "c"]);
        assert_eq!(keywords.get("b").unwrap().begin.text, "<B>");
    }

    #[test]
    fn template_dialect_compiles() {
        let patterns = super::template_keywords().compile();
        assert!(patterns.get("{$expr=").is_some());
        assert!(patterns.get("$}").is_some());
        assert!(patterns.get("{$now$}").is_some());
        assert!(patterns.get("\"\"").is_some());
    }
}
