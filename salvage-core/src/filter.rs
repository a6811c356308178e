//! Attribute filters understood by every [`EntityStore`](crate::EntityStore).

use serde_json::Value;

/// A predicate over entities.
///
/// Attribute names may refer to intrinsic columns (`slug`, `title`, ...) or
/// to keys of the entity's `attrs` map. Text comparisons marked
/// case-insensitive compare lowercased values. `Regex` patterns use the
/// `regex` crate syntax; prefix with `(?i)` for case-insensitive matching.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every entity.
    All,
    /// Concrete kind is one of the listed kinds.
    KindIn(Vec<String>),
    IdIn(Vec<i64>),
    Eq { attr: String, value: Value },
    IEq { attr: String, value: String },
    Regex { attr: String, pattern: String },
    IEndsWith { attr: String, suffix: String },
    IContains { attr: String, needle: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::KindIn(kinds.into_iter().map(Into::into).collect())
    }

    pub fn eq(attr: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            attr: attr.into(),
            value: value.into(),
        }
    }

    pub fn ieq(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self::IEq {
            attr: attr.into(),
            value: value.into(),
        }
    }

    pub fn regex(attr: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Regex {
            attr: attr.into(),
            pattern: pattern.into(),
        }
    }

    pub fn iends_with(attr: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self::IEndsWith {
            attr: attr.into(),
            suffix: suffix.into(),
        }
    }

    pub fn icontains(attr: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::IContains {
            attr: attr.into(),
            needle: needle.into(),
        }
    }

    /// Conjunction, flattening trivial cases.
    pub fn and(filters: Vec<Filter>) -> Self {
        let mut filters: Vec<Filter> = filters.into_iter().filter(|f| *f != Self::All).collect();
        match filters.len() {
            0 => Self::All,
            1 => filters.remove(0),
            _ => Self::And(filters),
        }
    }

    /// Disjunction, flattening the single-branch case.
    pub fn or(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            filters.remove(0)
        } else {
            Self::Or(filters)
        }
    }
}

/// An ordering annotation: an entity's rank is the index of the first tier
/// filter it matches, or `tiers.len()` when it matches none. Stores return
/// ranked results lowest rank first, ties in natural (id) order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    pub tiers: Vec<Filter>,
}

impl Ranking {
    pub fn new(tiers: Vec<Filter>) -> Self {
        Self { tiers }
    }

    pub fn default_rank(&self) -> usize {
        self.tiers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_drops_all_and_unwraps_singletons() {
        assert_eq!(Filter::and(vec![Filter::All]), Filter::All);
        let eq = Filter::eq("slug", "a");
        assert_eq!(Filter::and(vec![Filter::All, eq.clone()]), eq);
    }

    #[test]
    fn or_keeps_empty_disjunction() {
        // An empty OR matches nothing; it must not collapse into `All`.
        assert_eq!(Filter::or(vec![]), Filter::Or(vec![]));
    }
}
