//! Wildcard filter lists
//!
//! A filter list is a `|`-separated set of patterns using `*` and `?`; every
//! other character is literal. Matching is case-insensitive. A candidate path
//! matches when the whole path or any one of its segments matches any
//! pattern, so `*.tmp` hides both `a.tmp` and `cache.tmp/inner.txt`.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::fmt;
use tracing::warn;

/// Compiled filter patterns
#[derive(Clone)]
pub struct FilterSet {
    patterns: Vec<String>,
    set: GlobSet,
}

impl FilterSet {
    /// Parse a `|`-separated pattern list; empty tokens are dropped
    pub fn parse(list: &str) -> Self {
        let mut patterns = Vec::new();
        let mut builder = GlobSetBuilder::new();
        for token in list.split('|').map(str::trim).filter(|t| !t.is_empty()) {
            let token = token.to_lowercase();
            let glob = GlobBuilder::new(&wildcard_to_glob(&token))
                .case_insensitive(true)
                .literal_separator(false)
                .backslash_escape(false)
                .build();
            match glob {
                Ok(glob) => {
                    builder.add(glob);
                    patterns.push(token);
                }
                Err(e) => warn!("Ignoring filter pattern {:?}: {}", token, e),
            }
        }

        match builder.build() {
            Ok(set) => Self { patterns, set },
            Err(e) => {
                warn!("Ignoring filter list {:?}: {}", list, e);
                Self::empty()
            }
        }
    }

    /// A set that matches nothing
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    /// Whether no pattern is configured
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Number of patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Check a relative path or a single name against the set
    pub fn is_match(&self, candidate: &str) -> bool {
        if self.set.is_empty() {
            return false;
        }
        // Globs fold ASCII case only
        let lowered = candidate.to_lowercase();
        if self.set.is_match(&lowered) {
            return true;
        }

        lowered
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty())
            .any(|segment| self.set.is_match(segment))
    }
}

impl Default for FilterSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterSet")
            .field(&self.patterns.join("|"))
            .finish()
    }
}

/// Glob source for a `*`/`?` wildcard
///
/// Glob metacharacters other than `*` and `?` become one-character classes
/// and runs of `*` collapse to one, so no wildcard gains a glob meaning.
pub fn wildcard_to_glob(wildcard: &str) -> String {
    let mut glob = String::with_capacity(wildcard.len());
    for c in wildcard.chars() {
        match c {
            '*' if glob.ends_with('*') => {}
            '*' | '?' => glob.push(c),
            '[' | ']' | '{' | '}' | '\\' => {
                glob.push('[');
                glob.push(c);
                glob.push(']');
            }
            _ => glob.push(c),
        }
    }
    glob
}
