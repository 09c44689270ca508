//! First-match rule lookup by path and method.

use crate::engine::rules::Rule;
use regex::Regex;
use tracing::debug;

/// Compiled form of a rule's path pattern.
///
/// A pattern that fails to compile as a regex degrades to substring
/// containment. A user-typed pattern must never abort request handling, so
/// the downgrade happens once at compile time and matching itself is total.
#[derive(Debug, Clone)]
pub enum PathMatcher {
    Regex(Regex),
    Substring(String),
}

impl PathMatcher {
    pub fn compile(source: &str) -> Self {
        match Regex::new(source) {
            Ok(re) => PathMatcher::Regex(re),
            Err(err) => {
                debug!("Pattern '{}' is not a valid regex ({}), matching as substring", source, err);
                PathMatcher::Substring(source.to_string())
            }
        }
    }

    pub fn is_match(&self, path: &str) -> bool {
        match self {
            PathMatcher::Regex(re) => re.is_match(path),
            PathMatcher::Substring(s) => path.contains(s.as_str()),
        }
    }
}

/// Return the first enabled rule, in insertion order, whose method filter
/// admits `method` and whose pattern matches `path`.
pub fn find_matching_rule<'a>(rules: &'a [Rule], path: &str, method: &str) -> Option<&'a Rule> {
    rules
        .iter()
        .find(|rule| rule.enabled && rule.admits_method(method) && rule.matches_path(path))
}
