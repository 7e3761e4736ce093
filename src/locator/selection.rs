//! Chapter selection expressions
//!
//! `all`, a 1-based list position (`5`), an inclusive range (`1-10`,
//! reversed ranges allowed) or a comma-separated mix of those.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("empty chapter selection")]
    Empty,

    #[error("invalid selection term '{0}', expected a number, a range like 1-10, or 'all'")]
    InvalidTerm(String),

    #[error("chapter {position} is out of range, the work has {available} chapters")]
    OutOfRange { position: usize, available: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Term {
    All,
    Single(usize),
    Range(usize, usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterSelection {
    terms: Vec<Term>,
}

impl ChapterSelection {
    pub fn all() -> Self {
        Self {
            terms: vec![Term::All],
        }
    }

    /// Resolve against a work with `available` chapters into sorted, unique,
    /// 0-based indices
    pub fn resolve(&self, available: usize) -> Result<Vec<usize>, SelectionError> {
        let check = |position: usize| {
            if position == 0 || position > available {
                Err(SelectionError::OutOfRange {
                    position,
                    available,
                })
            } else {
                Ok(position - 1)
            }
        };

        let mut indices = BTreeSet::new();
        for term in &self.terms {
            match *term {
                Term::All => indices.extend(0..available),
                Term::Single(position) => {
                    indices.insert(check(position)?);
                }
                Term::Range(a, b) => {
                    let (start, end) = (check(a.min(b))?, check(a.max(b))?);
                    indices.extend(start..=end);
                }
            }
        }

        if indices.is_empty() {
            return Err(SelectionError::Empty);
        }
        Ok(indices.into_iter().collect())
    }
}

impl Default for ChapterSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl FromStr for ChapterSelection {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut terms = Vec::new();

        for raw in s.split(',') {
            let term = raw.trim().to_ascii_lowercase();
            if term.is_empty() {
                continue;
            }

            let parse = |n: &str| {
                n.trim()
                    .parse::<usize>()
                    .map_err(|_| SelectionError::InvalidTerm(term.clone()))
            };

            let parsed = if term == "all" {
                Term::All
            } else if let Some((start, end)) = term.split_once('-') {
                Term::Range(parse(start)?, parse(end)?)
            } else {
                Term::Single(parse(&term)?)
            };
            terms.push(parsed);
        }

        if terms.is_empty() {
            return Err(SelectionError::Empty);
        }
        Ok(Self { terms })
    }
}

impl fmt::Display for ChapterSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .terms
            .iter()
            .map(|t| match t {
                Term::All => "all".to_string(),
                Term::Single(n) => n.to_string(),
                Term::Range(a, b) => format!("{}-{}", a, b),
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(s: &str, available: usize) -> Result<Vec<usize>, SelectionError> {
        s.parse::<ChapterSelection>()?.resolve(available)
    }

    #[test]
    fn test_all() {
        assert_eq!(resolve("all", 3).unwrap(), vec![0, 1, 2]);
        assert_eq!(resolve(" ALL ", 2).unwrap(), vec![0, 1]);
        assert_eq!(resolve("all", 0), Err(SelectionError::Empty));
    }

    #[test]
    fn test_single_and_ranges() {
        assert_eq!(resolve("5", 10).unwrap(), vec![4]);
        assert_eq!(resolve("2-4", 10).unwrap(), vec![1, 2, 3]);
        assert_eq!(resolve("4-2", 10).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_combinations_are_deduplicated() {
        assert_eq!(resolve("1-3, 2, 7", 10).unwrap(), vec![0, 1, 2, 6]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(
            resolve("0", 5),
            Err(SelectionError::OutOfRange { position: 0, available: 5 })
        );
        assert_eq!(
            resolve("3-9", 5),
            Err(SelectionError::OutOfRange { position: 9, available: 5 })
        );
        assert!(matches!(resolve("abc", 5), Err(SelectionError::InvalidTerm(_))));
        assert!(matches!(resolve("1-", 5), Err(SelectionError::InvalidTerm(_))));
        assert_eq!(resolve(" , ", 5), Err(SelectionError::Empty));
    }

    #[test]
    fn test_display_round_trips_terms() {
        let selection: ChapterSelection = "1-3,7".parse().unwrap();
        assert_eq!(selection.to_string(), "1-3,7");
    }
}
