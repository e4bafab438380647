//! Exclusion rules applied to local paths and remote keys.
//!
//! Rules are literal strings with substring semantics, not globs: a local
//! path is excluded when any rule occurs inside any of its components, a
//! remote key when any rule occurs anywhere in the key.

/// A set of literal exclusion rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludeSet {
    rules: Vec<String>,
}

impl ExcludeSet {
    /// Builds a set from raw rules. Blank rules are dropped since an empty
    /// string is a substring of everything.
    pub fn new<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for rule in rules {
            set.add(rule.as_ref());
        }
        set
    }

    /// Adds a rule, ignoring blanks and duplicates.
    pub fn add(&mut self, rule: &str) {
        let rule = rule.trim();
        if rule.is_empty() || self.rules.iter().any(|r| r == rule) {
            return;
        }
        self.rules.push(rule.to_string());
    }

    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// True when a single path component (file or directory name) matches.
    pub fn matches_name(&self, name: &str) -> bool {
        self.rules.iter().any(|rule| name.contains(rule.as_str()))
    }

    /// True when any component of a `/`-separated relative path matches.
    pub fn matches_local(&self, relative_path: &str) -> bool {
        relative_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .any(|segment| self.matches_name(segment))
    }

    /// True when any rule occurs anywhere in the full object key.
    pub fn matches_remote(&self, key: &str) -> bool {
        self.rules.iter().any(|rule| key.contains(rule.as_str()))
    }
}
