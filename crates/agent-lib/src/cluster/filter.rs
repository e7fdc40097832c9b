//! Namespace allow/deny filtering with shell-style glob patterns

use regex::Regex;
use tracing::warn;

/// Namespace filter built from include and exclude glob lists
///
/// Exclusion always wins. An empty include list, or one containing `"*"`,
/// admits every namespace that is not excluded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamespaceFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl NamespaceFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self {
            include: include.into_iter().map(Pattern::new).collect(),
            exclude: exclude.into_iter().map(Pattern::new).collect(),
        }
    }

    /// Build a filter from comma-separated pattern lists
    pub fn from_lists(include: &str, exclude: &str) -> Self {
        Self::new(split_patterns(include), split_patterns(exclude))
    }

    pub fn include(&self) -> Vec<&str> {
        self.include.iter().map(|p| p.glob.as_str()).collect()
    }

    pub fn exclude(&self) -> Vec<&str> {
        self.exclude.iter().map(|p| p.glob.as_str()).collect()
    }

    /// Whether usage for `namespace` should be accounted
    pub fn allow(&self, namespace: &str) -> bool {
        if self.exclude.iter().any(|p| p.matches(namespace)) {
            return false;
        }

        self.include.is_empty()
            || self
                .include
                .iter()
                .any(|p| p.glob == "*" || p.matches(namespace))
    }
}

fn split_patterns(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// A glob compiled to an anchored regex
#[derive(Debug, Clone)]
struct Pattern {
    glob: String,
    /// `None` when the glob does not compile, it then matches literally
    regex: Option<Regex>,
}

impl Pattern {
    fn new(glob: String) -> Self {
        let regex = match Regex::new(&glob_to_regex(&glob)) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(
                    pattern = %glob,
                    error = %e,
                    "Invalid namespace pattern, matching it literally"
                );
                None
            }
        };
        Self { glob, regex }
    }

    fn matches(&self, text: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(text),
            None => self.glob == text,
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.glob == other.glob
    }
}

/// Match `text` against a glob supporting `*`, `?` and `[...]` classes
pub fn glob_match(pattern: &str, text: &str) -> bool {
    Pattern::new(pattern.to_string()).matches(text)
}

/// Translate a glob into an anchored regex
///
/// An unterminated `[` is a literal bracket.
fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("^");

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                if let Some((class, next)) = translate_class(&chars, i) {
                    out.push_str(&class);
                    i = next;
                    continue;
                }
                out.push_str(r"\[");
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// Translate the class opening at `chars[start] == '['`
///
/// Returns the regex class and the index just past the closing `]`, or
/// `None` when the class is not terminated. A `]` right after the opening
/// (or after `!`) is a member, not the end.
fn translate_class(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut class = String::from("[");
    let mut i = start + 1;
    if matches!(chars.get(i), Some('!') | Some('^')) {
        class.push('^');
        i += 1;
    }

    let mut first = true;
    while i < chars.len() {
        let current = chars[i];
        if current == ']' && !first {
            class.push(']');
            return Some((class, i + 1));
        }
        first = false;

        push_class_member(&mut class, current);
        if chars.get(i + 1) == Some(&'-') && chars.get(i + 2).is_some_and(|&e| e != ']') {
            class.push('-');
            push_class_member(&mut class, chars[i + 2]);
            i += 3;
        } else {
            i += 1;
        }
    }

    None
}

fn push_class_member(class: &mut String, c: char) {
    if matches!(c, '\\' | '[' | ']' | '^' | '-' | '&' | '~') {
        class.push('\\');
    }
    class.push(c);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match_basics() {
        assert!(glob_match("kube-*", "kube-system"));
        assert!(glob_match("kube-*", "kube-"));
        assert!(!glob_match("kube-*", "default"));
        assert!(glob_match("*", ""));
        assert!(glob_match("team-?", "team-a"));
        assert!(!glob_match("team-?", "team-ab"));
        assert!(glob_match("*-prod", "billing-prod"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
        assert!(glob_match("default", "default"));
    }

    #[test]
    fn test_glob_match_classes() {
        assert!(glob_match("ns-[abc]", "ns-b"));
        assert!(!glob_match("ns-[abc]", "ns-d"));
        assert!(glob_match("ns-[0-9]", "ns-7"));
        assert!(glob_match("ns-[!0-9]", "ns-x"));
        assert!(!glob_match("ns-[!0-9]", "ns-3"));
        assert!(glob_match("ns-[", "ns-["));
        assert!(glob_match("ns-[]a]", "ns-]"));
        assert!(glob_match("ns-[a-]", "ns--"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        assert!(glob_match("team.a", "team.a"));
        assert!(!glob_match("team.a", "teamxa"));
        assert!(glob_match("a+b", "a+b"));
        assert!(!glob_match("a+b", "aab"));
    }

    #[test]
    fn test_invalid_range_matches_literally() {
        assert!(glob_match("ns-[z-a]", "ns-[z-a]"));
        assert!(!glob_match("ns-[z-a]", "ns-b"));
    }

    #[test]
    fn test_exclude_wins() {
        let filter = NamespaceFilter::from_lists("*", "kube-*");
        assert!(!filter.allow("kube-system"));
        assert!(filter.allow("default"));
    }

    #[test]
    fn test_empty_include_allows_all() {
        let filter = NamespaceFilter::default();
        assert!(filter.allow("kube-system"));
        assert!(filter.allow("anything"));
    }

    #[test]
    fn test_include_star_allows_all() {
        let filter = NamespaceFilter::from_lists("*", "");
        assert!(filter.allow("kube-system"));
    }

    #[test]
    fn test_include_patterns_restrict() {
        let filter = NamespaceFilter::from_lists("team-*, default", "team-legacy");
        assert!(filter.allow("team-a"));
        assert!(filter.allow("default"));
        assert!(!filter.allow("team-legacy"));
        assert!(!filter.allow("monitoring"));
        assert_eq!(filter.include(), ["team-*", "default"]);
        assert_eq!(filter.exclude(), ["team-legacy"]);
    }
}
