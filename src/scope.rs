//! Defines the `Scope` type and its parsing/formatting, and the registered `ScopeEntry`
//! metadata a scope store hands back (§3 Scope entry).
use std::cmp;
use std::collections::HashSet;
use std::fmt;
use std::str;

use serde::{Deserialize, Serialize};

/// Scope of a grant or resource: a set of scope-tokens separated by spaces.
///
/// Scopes are interpreted as a conjunction of tokens, i.e. a scope is fulfilled if all of
/// its tokens are fulfilled. This induces a partial ordering where scope `A` is less than
/// or equal to scope `B` if all tokens of `A` are found in `B`, so that:
/// > A token with scope `B` is allowed to access a resource requiring scope `A` iff `A <= B`
///
/// Scope-tokens are restricted to the printable, non-quote, non-backslash subset of ASCII
/// used by RFC 6749 §3.3: `%x21 / %x23-5B / %x5D-7E`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Scope {
    tokens: HashSet<String>,
}

/// Error returned when a scope string contains a disallowed character or an empty token.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParseScopeError;

impl fmt::Display for ParseScopeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("invalid scope token")
    }
}

impl std::error::Error for ParseScopeError {}

fn valid_token_char(c: char) -> bool {
    matches!(c, '\x21' | '\x23'..='\x5b' | '\x5d'..='\x7e')
}

impl str::FromStr for Scope {
    type Err = ParseScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = HashSet::new();
        for token in s.split(' ') {
            if token.is_empty() {
                continue;
            }
            if !token.chars().all(valid_token_char) {
                return Err(ParseScopeError);
            }
            tokens.insert(token.to_owned());
        }
        Ok(Scope { tokens })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut tokens: Vec<&str> = self.tokens.iter().map(String::as_str).collect();
        tokens.sort();
        write!(f, "{}", tokens.join(" "))
    }
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw: String = Deserialize::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl Scope {
    pub fn empty() -> Self {
        Scope {
            tokens: HashSet::new(),
        }
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// `true` if a token holding `self` would be granted access to a resource requiring
    /// `required`, i.e. `required <= self`.
    pub fn allow_access(&self, required: &Scope) -> bool {
        required.tokens.is_subset(&self.tokens)
    }

    pub fn union(&self, other: &Scope) -> Scope {
        Scope {
            tokens: self.tokens.union(&other.tokens).cloned().collect(),
        }
    }

    pub fn intersection(&self, other: &Scope) -> Scope {
        Scope {
            tokens: self.tokens.intersection(&other.tokens).cloned().collect(),
        }
    }
}

impl PartialOrd for Scope {
    fn partial_cmp(&self, other: &Scope) -> Option<cmp::Ordering> {
        if self == other {
            Some(cmp::Ordering::Equal)
        } else if self.tokens.is_subset(&other.tokens) {
            Some(cmp::Ordering::Less)
        } else if other.tokens.is_subset(&self.tokens) {
            Some(cmp::Ordering::Greater)
        } else {
            None
        }
    }
}

/// Registered scope metadata, as returned by a scope store (§3 Scope entry).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScopeEntry {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub resources: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_subset_semantics() {
        let grant_scope: Scope = "some_scope other_scope".parse().unwrap();
        let resource_scope: Scope = "some_scope".parse().unwrap();
        let uncomparable: Scope = "some_scope third_scope".parse().unwrap();

        assert!(resource_scope <= grant_scope);
        assert!(resource_scope.allow_access(&grant_scope));
        assert!(!(uncomparable <= grant_scope));
        assert!(!uncomparable.allow_access(&grant_scope));
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!("good scope\"bad".parse::<Scope>().is_err());
    }

    #[test]
    fn display_is_sorted_and_stable() {
        let scope: Scope = "zeta alpha".parse().unwrap();
        assert_eq!(scope.to_string(), "alpha zeta");
    }
}
