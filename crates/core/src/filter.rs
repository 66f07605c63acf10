//! Filter vocabulary: predicates, free-text search and ordering keys.
//!
//! Query-string filter schemas (e.g. [`crate::HeroFilter`]) turn themselves
//! into a [`FilterSpec`]; stores evaluate a spec either in SQL or in memory.
//! Field names in a spec are always `&'static str` taken from an entity's
//! declared field list, never from user input.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{CrudError, CrudResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Neq,
    /// Case-sensitive SQL `LIKE` pattern.
    Like,
    /// Case-insensitive SQL `ILIKE` pattern.
    ILike,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub field: &'static str,
    pub op: Op,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey {
    pub field: &'static str,
    pub direction: Direction,
}

/// A fully-resolved filter: all predicates AND-ed, search OR-ed over the
/// entity's search fields, then ordered by `order_by`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    pub predicates: Vec<Predicate>,
    pub search: Option<String>,
    pub order_by: Vec<OrderKey>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &'static str, op: Op, value: impl Into<String>) -> Self {
        self.predicates.push(Predicate {
            field,
            op,
            value: value.into(),
        });
        self
    }

    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn ordered_by(mut self, field: &'static str, direction: Direction) -> Self {
        self.order_by.push(OrderKey { field, direction });
        self
    }
}

/// A query-string shape that can be turned into a [`FilterSpec`].
pub trait FilterSchema: DeserializeOwned + Send + 'static {
    fn into_spec(self) -> CrudResult<Option<FilterSpec>>;
}

/// Filter schema for entities that declare none: accepts any query string
/// and never filters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoFilter {}

impl FilterSchema for NoFilter {
    fn into_spec(self) -> CrudResult<Option<FilterSpec>> {
        Ok(None)
    }
}

/// Parse a comma-separated ordering list such as `name,-created_at`.
///
/// `-field` sorts descending, `+field` or a bare `field` ascending. Every
/// field must appear in `allowed`.
pub fn parse_order_by(raw: &str, allowed: &'static [&'static str]) -> CrudResult<Vec<OrderKey>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (direction, name) = match part.as_bytes()[0] {
                b'-' => (Direction::Desc, &part[1..]),
                b'+' => (Direction::Asc, &part[1..]),
                _ => (Direction::Asc, part),
            };
            let field = allowed
                .iter()
                .copied()
                .find(|f| *f == name)
                .ok_or_else(|| CrudError::validation(format!("unknown order_by field `{name}`")))?;
            Ok(OrderKey { field, direction })
        })
        .collect()
}

/// Evaluate a SQL `LIKE` pattern (`%`, `_`, `\` escape) against `value`.
///
/// Runs in `O(pattern * value)`: the set of pattern positions reachable so
/// far is advanced one value character at a time.
pub fn like_matches(pattern: &str, value: &str, case_insensitive: bool) -> bool {
    let (pattern, value) = if case_insensitive {
        (pattern.to_lowercase(), value.to_lowercase())
    } else {
        (pattern.to_owned(), value.to_owned())
    };
    let tokens = tokenize(&pattern);

    // reached[i]: the first `i` tokens match the value consumed so far.
    let mut reached = vec![false; tokens.len() + 1];
    reached[0] = true;
    skip_any(&tokens, &mut reached);

    for c in value.chars() {
        let mut next = vec![false; tokens.len() + 1];
        for (i, token) in tokens.iter().enumerate() {
            if !reached[i] {
                continue;
            }
            match token {
                Token::Any => next[i] = true,
                Token::One => next[i + 1] = true,
                Token::Lit(l) if *l == c => next[i + 1] = true,
                Token::Lit(_) => {}
            }
        }
        skip_any(&tokens, &mut next);
        if !next.contains(&true) {
            return false;
        }
        reached = next;
    }
    reached[tokens.len()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Any,
    One,
    Lit(char),
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut chars = pattern.chars();
    let mut tokens = Vec::new();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => Token::Any,
            '_' => Token::One,
            // A trailing backslash is literal.
            '\\' => Token::Lit(chars.next().unwrap_or('\\')),
            c => Token::Lit(c),
        });
    }
    tokens
}

/// `%` also matches nothing.
fn skip_any(tokens: &[Token], reached: &mut [bool]) {
    for (i, token) in tokens.iter().enumerate() {
        if reached[i] && *token == Token::Any {
            reached[i + 1] = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FIELDS: &[&str] = &["name", "created_at"];

    #[test]
    fn order_by_parses_directions() {
        let keys = parse_order_by("name, -created_at,+name", FIELDS).unwrap();
        assert_eq!(
            keys,
            vec![
                OrderKey { field: "name", direction: Direction::Asc },
                OrderKey { field: "created_at", direction: Direction::Desc },
                OrderKey { field: "name", direction: Direction::Asc },
            ]
        );
    }

    #[test]
    fn order_by_rejects_unknown_fields() {
        let err = parse_order_by("name,password", FIELDS).unwrap_err();
        assert!(matches!(err, CrudError::Validation(_)));
    }

    #[test]
    fn order_by_ignores_empty_segments() {
        assert!(parse_order_by(" , ,", FIELDS).unwrap().is_empty());
    }

    #[test]
    fn like_wildcards() {
        assert!(like_matches("Sup%", "Superman", false));
        assert!(!like_matches("sup%", "Superman", false));
        assert!(like_matches("sup%", "Superman", true));
        assert!(like_matches("B_tman", "Batman", false));
        assert!(!like_matches("B_tman", "Btman", false));
        assert!(like_matches("100\\%", "100%", false));
        assert!(!like_matches("100\\%", "1000", false));
        assert!(like_matches("%%", "", false));
        assert!(like_matches("a\\", "a\\", false));
    }

    #[test]
    fn many_wildcards_do_not_backtrack() {
        let value = "a".repeat(200);
        let pattern = format!("{}b", "%a".repeat(12));
        let started = std::time::Instant::now();
        assert!(!like_matches(&pattern, &value, false));
        assert!(like_matches(&pattern.replace('b', "a"), &value, false));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    /// Plain backtracking matcher, only usable on short inputs.
    fn like_by_backtracking(pattern: &[char], value: &[char]) -> bool {
        match pattern.split_first() {
            None => value.is_empty(),
            Some((&'%', rest)) => (0..=value.len()).any(|skip| like_by_backtracking(rest, &value[skip..])),
            Some((&'_', rest)) => !value.is_empty() && like_by_backtracking(rest, &value[1..]),
            Some((c, rest)) => value.first() == Some(c) && like_by_backtracking(rest, &value[1..]),
        }
    }

    proptest! {
        #[test]
        fn literal_patterns_are_equality(s in "[a-zA-Z0-9 ]{0,12}", t in "[a-zA-Z0-9 ]{0,12}") {
            prop_assert_eq!(like_matches(&s, &t, false), s == t);
        }

        #[test]
        fn agrees_with_backtracking(pattern in "[ab%_]{0,8}", value in "[ab]{0,10}") {
            let p: Vec<char> = pattern.chars().collect();
            let v: Vec<char> = value.chars().collect();
            prop_assert_eq!(like_matches(&pattern, &value, false), like_by_backtracking(&p, &v));
        }

        #[test]
        fn surrounding_percent_is_contains(needle in "[a-z]{0,4}", hay in "[a-zA-Z]{0,16}") {
            let pattern = format!("%{needle}%");
            prop_assert_eq!(
                like_matches(&pattern, &hay, true),
                hay.to_lowercase().contains(&needle)
            );
        }
    }
}
