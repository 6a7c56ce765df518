//! The structural resolver: from a flat match list to a formula tree
//!
//! Resolution walks the position-sorted match list once, recursing whenever it enters a nested
//! tag. At each step the current match is either the pending parent's terminator (ending the
//! recursion level), the begin tag of some keyword (opening a new region), or unrecognized
//! text that stays uncaptured. How a region closes depends on the keyword's options: single
//! tags close themselves, string literals scan ahead for an unshadowed end tag, and nested
//! tags recurse. The resolver uses plain recursion, so input nesting depth should be trusted
//! or bounded by the caller.

use crate::error::FormulaError;
use crate::keyword::{EndMarker, Keyword, KeywordSet, TEMPLATE_KEYWORDS};
use crate::matcher::{search, Match, PatternSet, SortOrder};
use crate::tree::Formula;
use tracing::debug;

/// Resolve a source string against a keyword table into a formula tree
///
/// Compiles the keyword table, scans for every tag occurrence and builds the nested tree. When
/// the whole input is exactly one tag region that region is the root; otherwise a synthetic
/// root with an empty keyword spans the entire input and holds the top-level regions as
/// children.
///
/// # Errors
/// [`FormulaError::Unterminated`] when a tag that requires a terminator is never closed.
///
/// # Example
/// ```
/// use formula_parser::{analyse_formula, Keyword, KeywordSet, TagDef};
///
/// let mut keywords = KeywordSet::new();
/// keywords.insert("py", Keyword::enclosed(TagDef::new("{$PY="), TagDef::new("$}")));
/// let tree = analyse_formula("{$PY=abc$}", &keywords, false).unwrap();
/// assert_eq!(tree.keyword, "py");
/// assert_eq!(tree.content(), "abc");
/// ```
pub fn analyse_formula<'a>(
    source: &'a str,
    keywords: &KeywordSet,
    ignore_case: bool,
) -> Result<Formula<'a>, FormulaError> {
    let patterns = keywords.compile();
    analyse_with_patterns(source, keywords, &patterns, ignore_case)
}

/// Resolve a source string with the default [template dialect][crate::template_keywords]
///
/// # Errors
/// [`FormulaError::Unterminated`] when a tag region is never closed.
pub fn analyse(source: &str) -> Result<Formula<'_>, FormulaError> {
    analyse_formula(source, &TEMPLATE_KEYWORDS, false)
}

// entry point shared with the engine, which caches its compiled pattern set
pub(crate) fn analyse_with_patterns<'a>(
    source: &'a str,
    keywords: &KeywordSet,
    patterns: &PatternSet,
    ignore_case: bool,
) -> Result<Formula<'a>, FormulaError> {
    let matches = search(source, patterns, ignore_case, true, SortOrder::PositionAsc);
    debug!(matches = matches.len(), "resolving formula");
    let (mut children, _) = resolve_level(source, keywords, &matches, 0, None)?;
    if children.len() == 1 && children[0].start == 0 && children[0].end == source.len() {
        if let Some(only) = children.pop() {
            return Ok(only);
        }
    }
    let mut root = Formula::from_spans(source, "", 0..source.len(), 0..source.len());
    root.children = children;
    Ok(root)
}

type Level<'a> = (Vec<Formula<'a>>, Option<usize>);

fn resolve_level<'a>(
    source: &'a str,
    keywords: &KeywordSet,
    matches: &[Match<'_, '_>],
    mut index: usize,
    parent: Option<&str>,
) -> Result<Level<'a>, FormulaError> {
    let mut nodes = Vec::new();
    while index < matches.len() {
        let current = &matches[index];
        if let Some(parent_name) = parent {
            if is_end_tag(keywords, parent_name, current) {
                return Ok((nodes, Some(index)));
            }
        }
        let Some((name, keyword)) = begin_keyword(keywords, current) else {
            // not a begin tag: implicit, uncaptured content
            index += 1;
            continue;
        };

        if keyword.options.single_tag {
            nodes.push(Formula::from_spans(
                source,
                name,
                current.start..current.end,
                current.end..current.end,
            ));
            index = skip_overlaps(matches, index);
        } else if keyword.options.string_literal || !keyword.options.sub_formulas {
            let shadow = keyword.options.string_literal;
            let (node, next) =
                resolve_delimited(source, keywords, matches, index, name, keyword, shadow)?;
            nodes.push(node);
            index = next;
        } else {
            let (open_start, open_end) = (current.start, current.end);
            index = skip_overlaps(matches, index);

            let mut parent_key = Some(name);
            if keyword.end.is_none() {
                if keyword.options.end_markers.contains(&EndMarker::NextTag) {
                    // the region ends exactly where the next recognized begin tag starts,
                    // or at the end of input when there is none
                    let mut scan = index;
                    let mut close = source.len();
                    while scan < matches.len() {
                        if begin_keyword(keywords, &matches[scan]).is_some() {
                            close = matches[scan].start;
                            break;
                        }
                        scan += 1;
                    }
                    nodes.push(Formula::from_spans(
                        source,
                        name,
                        open_start..close,
                        open_end..close,
                    ));
                    index = scan;
                    continue;
                } else if keyword.options.end_markers.contains(&EndMarker::EndOfInput) {
                    parent_key = None;
                }
            }

            let (children, stop) = resolve_level(source, keywords, matches, index, parent_key)?;
            let (end, content_end) = match stop {
                Some(stop_index) => (matches[stop_index].end, matches[stop_index].start),
                None => (source.len(), source.len()),
            };
            let mut node = Formula::from_spans(source, name, open_start..end, open_end..content_end);
            node.children = children;
            nodes.push(node);
            match stop {
                Some(stop_index) => index = skip_overlaps(matches, stop_index),
                None => {
                    if parent_key.is_some() {
                        // the match list is exhausted but this keyword needs a real terminator
                        return Err(unterminated(name, keyword, open_start));
                    }
                    return Ok((nodes, None));
                }
            }
        }
    }
    Ok((nodes, None))
}

// string literals and no-sub-formula regions: scan forward for the keyword's own terminator,
// with ignore-sequence shadowing applied only to string literals
fn resolve_delimited<'a>(
    source: &'a str,
    keywords: &KeywordSet,
    matches: &[Match<'_, '_>],
    open_index: usize,
    name: &str,
    keyword: &Keyword,
    shadow: bool,
) -> Result<(Formula<'a>, usize), FormulaError> {
    let open = &matches[open_index];
    let mut index = skip_overlaps(matches, open_index);
    while index < matches.len() {
        let current = &matches[index];
        if !is_end_tag(keywords, name, current)
            || (shadow && shadowed_by_ignore(matches, index, &keyword.options.string_ignore))
        {
            index += 1;
            continue;
        }
        let node = Formula::from_spans(
            source,
            name,
            open.start..current.end,
            open.end..current.start,
        );
        return Ok((node, skip_overlaps(matches, index)));
    }
    Err(unterminated(name, keyword, open.start))
}

// does this match close the named keyword? sentinel markers never match a literal pattern
fn is_end_tag(keywords: &KeywordSet, name: &str, current: &Match<'_, '_>) -> bool {
    let Some(keyword) = keywords.get(name) else {
        return false;
    };
    match &keyword.end {
        Some(end) => current.pattern == end.text,
        None => keyword.options.end_markers.iter().any(
            |marker| matches!(marker, EndMarker::Literal(text) if text == current.pattern),
        ),
    }
}

fn begin_keyword<'k>(
    keywords: &'k KeywordSet,
    current: &Match<'_, '_>,
) -> Option<(&'k str, &'k Keyword)> {
    keywords
        .iter()
        .find(|(_, keyword)| keyword.begin.text == current.pattern)
}

// first following match that starts at or after the end of the match at `current`, so a
// finalized region never re-exposes matches nested inside it
fn skip_overlaps(matches: &[Match<'_, '_>], current: usize) -> usize {
    let end = matches[current].end;
    matches
        .iter()
        .enumerate()
        .skip(current + 1)
        .find(|(_, m)| m.start >= end)
        .map_or(matches.len(), |(i, _)| i)
}

// is the candidate terminator at `tag_index` actually part of an ignore sequence? check every
// match overlapping its start position, both before and at it
fn shadowed_by_ignore(matches: &[Match<'_, '_>], tag_index: usize, ignore: &[String]) -> bool {
    let max_len = ignore.iter().map(|s| s.len()).max().unwrap_or(0);
    if max_len < 2 {
        return false;
    }
    let tag = &matches[tag_index];
    for cmp in matches[..tag_index].iter().rev() {
        if cmp.start + max_len <= tag.start {
            break;
        }
        if cmp.start <= tag.start
            && tag.start < cmp.end
            && ignore.iter().any(|s| s == cmp.pattern)
        {
            return true;
        }
    }
    for cmp in &matches[tag_index + 1..] {
        if cmp.start > tag.start {
            break;
        }
        if ignore.iter().any(|s| s == cmp.pattern) {
            return true;
        }
    }
    false
}

fn unterminated(name: &str, keyword: &Keyword, start: usize) -> FormulaError {
    let expected = match &keyword.end {
        Some(end) => end.text.clone(),
        None => {
            let literals: Vec<&str> = keyword
                .options
                .end_markers
                .iter()
                .filter_map(|marker| match marker {
                    EndMarker::Literal(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            if literals.is_empty() {
                "end tag".into()
            } else {
                literals.join("` or `")
            }
        }
    };
    FormulaError::Unterminated {
        keyword: name.into(),
        begin: keyword.begin.text.clone(),
        expected,
        start,
    }
}

#[cfg(test)]
mod tests {
    use super::{analyse, analyse_formula};
    use crate::error::FormulaError;
    use crate::keyword::{EndMarker, Keyword, KeywordOptions, KeywordSet, TagDef};

    fn py_keywords() -> KeywordSet {
        [(
            "py",
            Keyword::enclosed(TagDef::new("{$PY="), TagDef::new("$}")),
        )]
        .into_iter()
        .collect()
    }

    #[test]
    fn single_region_collapses_to_root() {
        let tree = analyse_formula("{$PY=abc$}", &py_keywords(), false).unwrap();
        assert_eq!(tree.keyword, "py");
        assert_eq!(tree.raw, "{$PY=abc$}");
        assert_eq!(tree.content(), "abc");
        assert_eq!(tree.span(), 0..10);
        assert_eq!(tree.content_span(), 5..8);
        assert!(tree.children.is_empty());
    }

    #[test]
    fn surrounding_text_gets_a_synthetic_root() {
        let source = "x {$PY=abc$} y";
        let tree = analyse_formula(source, &py_keywords(), false).unwrap();
        assert_eq!(tree.keyword, "");
        assert_eq!(tree.raw, source);
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].keyword, "py");
        assert_eq!(tree.children[0].span(), 2..12);
    }

    #[test]
    fn nested_regions_become_children() {
        let source = "{$PY=a{$PY=b$}c$}";
        let tree = analyse_formula(source, &py_keywords(), false).unwrap();
        assert_eq!(tree.keyword, "py");
        assert_eq!(tree.content(), "a{$PY=b$}c");
        assert_eq!(tree.children.len(), 1);
        let child = &tree.children[0];
        assert_eq!(child.keyword, "py");
        assert_eq!(child.content(), "b");
        assert!(child.start > tree.content_start && child.end < tree.content_end + 1);
    }

    #[test]
    fn escaped_quotes_do_not_terminate_strings() {
        let keywords: KeywordSet = [(
            "string",
            Keyword::new(
                TagDef::new("\""),
                Some(TagDef::new("\"")),
                KeywordOptions::string(["\\\"", "\"\""]),
            ),
        )]
        .into_iter()
        .collect();
        let source = "\"a\\\"b\"";
        let tree = analyse_formula(source, &keywords, false).unwrap();
        assert_eq!(tree.keyword, "string");
        assert_eq!(tree.content(), "a\\\"b");
        assert_eq!(tree.span(), 0..source.len());
    }

    #[test]
    fn doubled_quotes_are_shadowed_too() {
        let keywords: KeywordSet = [(
            "string",
            Keyword::new(
                TagDef::new("\""),
                Some(TagDef::new("\"")),
                KeywordOptions::string(["\\\"", "\"\""]),
            ),
        )]
        .into_iter()
        .collect();
        let tree = analyse_formula("\"a\"\"b\"", &keywords, false).unwrap();
        assert_eq!(tree.content(), "a\"\"b");
    }

    #[test]
    fn missing_end_tag_is_an_error() {
        let err = analyse_formula("{$PY=abc", &py_keywords(), false).unwrap_err();
        match err {
            FormulaError::Unterminated {
                keyword,
                begin,
                expected,
                start,
            } => {
                assert_eq!(keyword, "py");
                assert_eq!(begin, "{$PY=");
                assert_eq!(expected, "$}");
                assert_eq!(start, 0);
            }
            other => panic!("expected Unterminated, got {other:?}"),
        }
    }

    #[test]
    fn flat_region_ignores_inner_tags() {
        let mut options = KeywordOptions::default();
        options.sub_formulas = false;
        let mut keywords = py_keywords();
        keywords.insert(
            "raw",
            Keyword::new(
                TagDef::new("{$raw="),
                Some(TagDef::new("$}")),
                options,
            ),
        );
        let tree = analyse_formula("{$raw=a{$PY=b$}", &keywords, false).unwrap();
        // the first `$}` closes the raw region; the inner begin tag is not recursed into
        assert_eq!(tree.keyword, "raw");
        assert_eq!(tree.content(), "a{$PY=b");
        assert!(tree.children.is_empty());
    }

    #[test]
    fn single_tags_have_no_content() {
        let keywords: KeywordSet =
            [("now", Keyword::single(TagDef::new("{$now$}")))].into_iter().collect();
        let tree = analyse_formula("a{$now$}b", &keywords, false).unwrap();
        assert_eq!(tree.keyword, "");
        assert_eq!(tree.children.len(), 1);
        let node = &tree.children[0];
        assert_eq!(node.raw, "{$now$}");
        assert_eq!(node.content(), "");
        assert_eq!(node.content_span(), 8..8);
    }

    #[test]
    fn next_tag_marker_closes_at_following_begin() {
        let keywords: KeywordSet = [
            (
                "head",
                Keyword::new(
                    TagDef::new("<h>"),
                    None,
                    KeywordOptions::until([EndMarker::NextTag]),
                ),
            ),
            ("mark", Keyword::single(TagDef::new("*"))),
        ]
        .into_iter()
        .collect();
        let tree = analyse_formula("<h>alpha*x", &keywords, false).unwrap();
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].keyword, "head");
        assert_eq!(tree.children[0].content(), "alpha");
        assert_eq!(tree.children[0].span(), 0..8);
        assert_eq!(tree.children[1].keyword, "mark");
    }

    #[test]
    fn next_tag_marker_without_following_tag_runs_to_end() {
        let keywords: KeywordSet = [(
            "head",
            Keyword::new(
                TagDef::new("<h>"),
                None,
                KeywordOptions::until([EndMarker::NextTag]),
            ),
        )]
        .into_iter()
        .collect();
        let tree = analyse_formula("<h>alpha", &keywords, false).unwrap();
        assert_eq!(tree.keyword, "head");
        assert_eq!(tree.content(), "alpha");
    }

    #[test]
    fn end_of_input_marker_consumes_the_rest() {
        let mut keywords = py_keywords();
        keywords.insert(
            "tail",
            Keyword::new(
                TagDef::new("{$end="),
                None,
                KeywordOptions::until([EndMarker::EndOfInput]),
            ),
        );
        let tree = analyse_formula("{$end=a {$PY=b$} c", &keywords, false).unwrap();
        assert_eq!(tree.keyword, "tail");
        assert_eq!(tree.content(), "a {$PY=b$} c");
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].keyword, "py");
    }

    #[test]
    fn sentinel_only_flat_keyword_is_unterminated() {
        // deliberate precedence: sentinel markers only apply to nested keywords
        let mut options = KeywordOptions::until([EndMarker::EndOfInput]);
        options.sub_formulas = false;
        let keywords: KeywordSet = [(
            "flat",
            Keyword::new(TagDef::new("{$f="), None, options),
        )]
        .into_iter()
        .collect();
        let err = analyse_formula("{$f=abc", &keywords, false).unwrap_err();
        assert!(matches!(err, FormulaError::Unterminated { keyword, .. } if keyword == "flat"));
    }

    #[test]
    fn default_dialect_analyse() {
        let tree = analyse("a {$expr=1+1$} b {$now$}").unwrap();
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0].keyword, "expr");
        assert_eq!(tree.children[0].content(), "1+1");
        assert_eq!(tree.children[1].keyword, "now");
    }

    #[test]
    fn ignore_case_applies_to_tags() {
        let tree = analyse_formula("{$py=abc$}", &py_keywords(), true).unwrap();
        assert_eq!(tree.keyword, "py");
        assert_eq!(tree.content(), "abc");
    }
}
