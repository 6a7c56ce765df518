//! Multi-pattern substring search with per-pattern context constraints
//!
//! The matcher is the first phase of formula parsing: given a [`PatternSet`] compiled from a
//! keyword table, [`search`] finds every occurrence of every pattern in a single left-to-right
//! scan of the source string. Each pattern can require a particular character immediately before
//! or after it (a "front" or "back" constraint), expressed as [`CharRule`]s, so that for example
//! the keyword `from` only matches when delimited by whitespace.
//!
//! The scan keeps a pending set of partially matched patterns and advances every entry one
//! character at a time, so the whole search is `O(source_len * active_patterns)` and never
//! re-reads input. Positions are byte offsets into the source, which makes [`Match::text`] a
//! plain subslice of it.
//!
//! # Example
//! ```
//! use formula_parser::{search, CharRule, PatternSet, SortOrder};
//!
//! let mut patterns = PatternSet::new();
//! patterns.insert("from", vec![CharRule::Start, CharRule::Literal(' ')], vec![CharRule::Literal(' ')]);
//! let found = search("select * from t", &patterns, false, true, SortOrder::PositionAsc);
//! assert_eq!(found.len(), 1);
//! assert_eq!((found[0].start, found[0].end), (9, 13));
//! ```

use fnv::{FnvBuildHasher, FnvHashMap};
use indexmap::map::Entry;
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::ops::Range;
use tracing::trace;

/// A single-character context constraint attached to a pattern
///
/// Front rules constrain the character immediately before a pattern occurrence, back rules the
/// character immediately after. An empty rule list means the context is not checked at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharRule {
    /// Matches the start of the source string (only meaningful as a front rule)
    Start,
    /// Matches the end of the source string (only meaningful as a back rule)
    End,
    /// Matches any character, or no character at all
    Any,
    /// Matches exactly this character
    Literal(char),
}

fn chars_eq(left: char, right: char, ignore_case: bool) -> bool {
    left == right || (ignore_case && left.to_lowercase().eq(right.to_lowercase()))
}

/// The context constraints of one pattern in a [`PatternSet`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pattern {
    /// Rules for the character immediately before an occurrence; empty means unconstrained
    pub front: Vec<CharRule>,
    /// Rules for the character immediately after an occurrence; empty means unconstrained
    pub back: Vec<CharRule>,
}

/// A set of literal patterns to search for, each with optional context constraints
///
/// Pattern texts are unique within the set; inserting the same text twice merges the context
/// rules (see [`insert`][PatternSet::insert]). Insertion order is preserved and acts as the
/// declaration rank used by [`SortOrder::DeclaredAsc`] and [`SortOrder::DeclaredDesc`].
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: IndexMap<String, Pattern, FnvBuildHasher>,
}

impl PatternSet {
    /// Create an empty pattern set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern with its front and back context rules
    ///
    /// If the text is already present the rule sets are unioned instead: a side that was
    /// unconstrained on either entry widens the merged rules with [`CharRule::Any`], so a merged
    /// pattern never becomes stricter than any of its sources.
    pub fn insert(&mut self, text: impl Into<String>, front: Vec<CharRule>, back: Vec<CharRule>) {
        match self.patterns.entry(text.into()) {
            Entry::Occupied(mut entry) => {
                let pattern = entry.get_mut();
                merge_rules(&mut pattern.front, front);
                merge_rules(&mut pattern.back, back);
            }
            Entry::Vacant(entry) => {
                entry.insert(Pattern { front, back });
            }
        }
    }

    /// Look up a pattern's context rules by its text
    pub fn get(&self, text: &str) -> Option<&Pattern> {
        self.patterns.get(text)
    }

    /// The declaration rank of a pattern, i.e. its insertion index
    pub fn rank(&self, text: &str) -> Option<usize> {
        self.patterns.get_index_of(text)
    }

    /// Iterate patterns in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Pattern)> {
        self.patterns.iter().map(|(text, pat)| (text.as_str(), pat))
    }

    /// The number of distinct patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the set contains no patterns
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Pattern)> for PatternSet {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (S, Pattern)>,
    {
        let mut set = PatternSet::new();
        for (text, pattern) in iter {
            set.insert(text, pattern.front, pattern.back);
        }
        set
    }
}

fn merge_rules(existing: &mut Vec<CharRule>, incoming: Vec<CharRule>) {
    if existing.is_empty() && incoming.is_empty() {
        return;
    }
    if (existing.is_empty() || incoming.is_empty()) && !existing.contains(&CharRule::Any) {
        existing.push(CharRule::Any);
    }
    for rule in incoming {
        if !existing.contains(&rule) {
            existing.push(rule);
        }
    }
}

/// Tie-break order used to discard overlapping matches when multiple matching is disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Earlier-declared patterns win
    DeclaredAsc,
    /// Later-declared patterns win
    DeclaredDesc,
    /// Longer patterns win
    LongestFirst,
    /// Shorter patterns win
    ShortestFirst,
    /// Earlier occurrences win, with the earlier-ending record first on ties
    #[default]
    PositionAsc,
    /// Later occurrences win
    PositionDesc,
}

/// One located occurrence of a pattern
///
/// `start..end` is the byte span of the pattern text itself, exclusive of any context characters
/// that satisfied its front or back rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match<'a, 'p> {
    /// The pattern text that matched
    pub pattern: &'p str,
    /// The matched slice of the source string
    pub text: &'a str,
    /// Byte offset where the occurrence starts
    pub start: usize,
    /// Byte offset just past the occurrence
    pub end: usize,
    /// The front rule that was satisfied, if the pattern had front rules
    pub front: Option<CharRule>,
    /// The back rule that was satisfied, if the pattern had back rules
    pub back: Option<CharRule>,
}

impl Match<'_, '_> {
    /// The byte span of the occurrence
    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }
}

// a partially matched pattern: `cursor` characters of pattern `rank` have matched so far
struct Pending {
    rank: usize,
    start: usize,
    cursor: usize,
    front: Option<CharRule>,
}

struct Compiled<'p> {
    text: &'p str,
    chars: Vec<char>,
    front: &'p [CharRule],
    back: &'p [CharRule],
}

impl Compiled<'_> {
    fn trivial_back(&self) -> bool {
        self.back.is_empty() || self.back.contains(&CharRule::Any)
    }

    fn trivial_back_rule(&self) -> Option<CharRule> {
        if self.back.is_empty() {
            None
        } else {
            Some(CharRule::Any)
        }
    }
}

/// Find every occurrence of every pattern in one left-to-right scan
///
/// With `multiple_match` set, overlapping occurrences of different patterns are all reported.
/// Without it, whenever two records overlap only the winner under `order` is kept. Case
/// folding with `ignore_case` is applied per character comparison, so [`Match::text`] always
/// holds the original spelling from `source`.
///
/// The result is sorted by `(start, end)` and contains at most one record per pattern and start
/// position. An input without occurrences yields an empty vector, never an error.
pub fn search<'a, 'p>(
    source: &'a str,
    patterns: &'p PatternSet,
    ignore_case: bool,
    multiple_match: bool,
    order: SortOrder,
) -> Vec<Match<'a, 'p>> {
    let compiled: Vec<Compiled<'p>> = patterns
        .iter()
        .filter(|(text, _)| !text.is_empty())
        .map(|(text, pattern)| Compiled {
            text,
            chars: text.chars().collect(),
            front: &pattern.front,
            back: &pattern.back,
        })
        .collect();

    let mut found: FnvHashMap<(usize, usize), Match<'a, 'p>> = FnvHashMap::default();
    let mut emit = |rank: usize, start: usize, end: usize, front, back| {
        found.insert(
            (rank, start),
            Match {
                pattern: compiled[rank].text,
                text: &source[start..end],
                start,
                end,
                front,
                back,
            },
        );
    };

    // patterns anchored to the start of the string are seeded before the scan
    let mut pending: Vec<Pending> = compiled
        .iter()
        .enumerate()
        .filter(|(_, pat)| pat.front.contains(&CharRule::Start))
        .map(|(rank, _)| Pending {
            rank,
            start: 0,
            cursor: 0,
            front: Some(CharRule::Start),
        })
        .collect();

    for (pos, chr) in source.char_indices() {
        // advance every pending entry by one character
        let mut idx = 0;
        while idx < pending.len() {
            let entry = &mut pending[idx];
            let pattern = &compiled[entry.rank];
            if entry.cursor >= pattern.chars.len() {
                // fully matched; this character decides an explicit back constraint
                if let Some(back) = literal_rule(pattern.back, chr, ignore_case) {
                    emit(entry.rank, entry.start, pos, entry.front, Some(back));
                }
                pending.swap_remove(idx);
            } else if chars_eq(pattern.chars[entry.cursor], chr, ignore_case) {
                entry.cursor += 1;
                if entry.cursor == pattern.chars.len() && pattern.trivial_back() {
                    let back = pattern.trivial_back_rule();
                    emit(entry.rank, entry.start, pos + chr.len_utf8(), entry.front, back);
                    pending.swap_remove(idx);
                } else {
                    idx += 1;
                }
            } else {
                pending.swap_remove(idx);
            }
        }

        // start new entries at this position
        for (rank, pattern) in compiled.iter().enumerate() {
            let unconstrained =
                pattern.front.is_empty() || pattern.front.contains(&CharRule::Any);
            if unconstrained {
                if chars_eq(pattern.chars[0], chr, ignore_case) {
                    let front = if pattern.front.is_empty() {
                        None
                    } else {
                        Some(CharRule::Any)
                    };
                    if pattern.chars.len() == 1 && pattern.trivial_back() {
                        emit(rank, pos, pos + chr.len_utf8(), front, pattern.trivial_back_rule());
                    } else {
                        pending.push(Pending {
                            rank,
                            start: pos,
                            cursor: 1,
                            front,
                        });
                    }
                }
            } else if let Some(front) = literal_rule(pattern.front, chr, ignore_case) {
                // the current character is consumed as context; the pattern starts after it
                pending.push(Pending {
                    rank,
                    start: pos + chr.len_utf8(),
                    cursor: 0,
                    front: Some(front),
                });
            }
        }
    }

    // entries still fully matched at the end of the string satisfy an end-of-string back rule
    for entry in pending {
        let pattern = &compiled[entry.rank];
        if entry.cursor == pattern.chars.len() && pattern.back.contains(&CharRule::End) {
            emit(
                entry.rank,
                entry.start,
                source.len(),
                entry.front,
                Some(CharRule::End),
            );
        }
    }

    let mut result: Vec<Match<'a, 'p>> = found.into_values().collect();
    result.sort_by(|left, right| {
        (left.start, left.end, patterns.rank(left.pattern))
            .cmp(&(right.start, right.end, patterns.rank(right.pattern)))
    });
    trace!(
        patterns = compiled.len(),
        matches = result.len(),
        "pattern scan complete"
    );

    if multiple_match {
        result
    } else {
        dedup_overlaps(result, patterns, order)
    }
}

fn literal_rule(rules: &[CharRule], chr: char, ignore_case: bool) -> Option<CharRule> {
    rules.iter().copied().find(|rule| match rule {
        CharRule::Literal(expect) => chars_eq(*expect, chr, ignore_case),
        _ => false,
    })
}

fn dedup_overlaps<'a, 'p>(
    sorted: Vec<Match<'a, 'p>>,
    patterns: &PatternSet,
    order: SortOrder,
) -> Vec<Match<'a, 'p>> {
    let mut kept: Vec<Match<'a, 'p>> = Vec::with_capacity(sorted.len());
    for item in sorted {
        match kept.last() {
            Some(last)
                if (last.start <= item.start && item.start < last.end)
                    || (last.start < item.end && item.end <= last.end) =>
            {
                if compare(last, &item, patterns, order) == Ordering::Greater {
                    kept.pop();
                    kept.push(item);
                }
            }
            _ => kept.push(item),
        }
    }
    kept
}

fn compare(
    left: &Match<'_, '_>,
    right: &Match<'_, '_>,
    patterns: &PatternSet,
    order: SortOrder,
) -> Ordering {
    match order {
        SortOrder::DeclaredAsc => patterns.rank(left.pattern).cmp(&patterns.rank(right.pattern)),
        SortOrder::DeclaredDesc => patterns.rank(right.pattern).cmp(&patterns.rank(left.pattern)),
        SortOrder::LongestFirst => right
            .pattern
            .chars()
            .count()
            .cmp(&left.pattern.chars().count()),
        SortOrder::ShortestFirst => left
            .pattern
            .chars()
            .count()
            .cmp(&right.pattern.chars().count()),
        SortOrder::PositionAsc => (left.start, left.end).cmp(&(right.start, right.end)),
        SortOrder::PositionDesc => (right.start, right.end).cmp(&(left.start, left.end)),
    }
}
