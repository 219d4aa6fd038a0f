use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("relocation pattern must not be empty (destination: '{destination}')")]
    EmptyPattern { destination: String },
    #[error("relocation destination must not be empty (pattern: '{pattern}')")]
    EmptyDestination { pattern: String },
    #[error(
        "can't relocate from {pattern} to {destination} as it clashes with other paths: {clashing}",
        clashing = .clashes.join(", ")
    )]
    Conflicting {
        pattern: String,
        destination: String,
        clashes: Vec<String>,
    },
}

/// A single `pattern -> destination` namespace move, kept in both the path
/// form used by class files (`com/foo/`) and the dotted form used by Kotlin
/// package names (`com.foo`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelocationRule {
    source_path: String,
    dest_path: String,
    source_package: String,
    dest_package: String,
}

impl RelocationRule {
    /// Accepts either `com.foo`, `com/foo` or `com/foo/` for both sides.
    pub fn new(pattern: &str, destination: &str) -> Result<Self, RuleError> {
        let source = normalize(pattern);
        let dest = normalize(destination);
        if source.is_empty() {
            return Err(RuleError::EmptyPattern {
                destination: destination.to_string(),
            });
        }
        if dest.is_empty() {
            return Err(RuleError::EmptyDestination {
                pattern: pattern.to_string(),
            });
        }

        Ok(Self {
            source_path: format!("{source}/"),
            dest_path: format!("{dest}/"),
            source_package: source.replace('/', "."),
            dest_package: dest.replace('/', "."),
        })
    }

    /// Source prefix in path form, always ending with `/`.
    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    /// Destination prefix in path form, always ending with `/`.
    pub fn dest_path(&self) -> &str {
        &self.dest_path
    }

    /// Source prefix in dotted form, without a trailing separator.
    pub fn source_package(&self) -> &str {
        &self.source_package
    }

    pub fn dest_package(&self) -> &str {
        &self.dest_package
    }

    fn overlaps(&self, path: &str) -> bool {
        self.source_path.starts_with(path) || path.starts_with(&self.source_path)
    }

    fn whole(&self, value: &str) -> Option<String> {
        let source_root = &self.source_path[..self.source_path.len() - 1];
        if value == source_root {
            return Some(self.dest_path[..self.dest_path.len() - 1].to_string());
        }
        if value == self.source_package {
            return Some(self.dest_package.clone());
        }
        None
    }

    /// Length of the source prefix `rest` starts with, and its replacement.
    fn match_at(&self, rest: &str) -> Option<(usize, Cow<'_, str>)> {
        if rest.starts_with(&self.source_path) {
            return Some((self.source_path.len(), Cow::Borrowed(&self.dest_path)));
        }
        let dotted = rest.strip_prefix(self.source_package.as_str())?;
        if !dotted.starts_with('.') {
            return None;
        }
        let replacement = format!("{}.", self.dest_package);
        Some((self.source_package.len() + 1, Cow::Owned(replacement)))
    }

    fn literal_prefix(&self, separator: char) -> Cow<'_, str> {
        if separator == '/' {
            Cow::Borrowed(&self.source_path)
        } else {
            Cow::Owned(format!("{}.", self.source_package))
        }
    }
}

impl fmt::Display for RelocationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source_package, self.dest_package)
    }
}

/// Ordered, validated collection of relocation rules.
///
/// Source prefixes never overlap, and no destination is nested with
/// another rule's source in either direction, so at most one rule applies
/// to any name and rewriting an already rewritten value is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<RelocationRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every pair in order, stopping at the first invalid one.
    pub fn from_pairs<I, P, D>(pairs: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = (P, D)>,
        P: AsRef<str>,
        D: AsRef<str>,
    {
        let mut rules = Self::new();
        for (pattern, destination) in pairs {
            rules.register(pattern.as_ref(), destination.as_ref())?;
        }
        Ok(rules)
    }

    pub fn register(
        &mut self,
        pattern: &str,
        destination: &str,
    ) -> Result<&RelocationRule, RuleError> {
        let rule = RelocationRule::new(pattern, destination)?;

        let mut clashes: Vec<String> = self
            .rules
            .iter()
            .filter(|existing| {
                existing.overlaps(&rule.source_path)
                    || existing.overlaps(&rule.dest_path)
                    || rule.overlaps(&existing.dest_path)
            })
            .map(|existing| existing.source_package.clone())
            .collect();
        if rule.dest_path.starts_with(&rule.source_path) {
            clashes.push(rule.source_package.clone());
        }

        if !clashes.is_empty() {
            return Err(RuleError::Conflicting {
                pattern: pattern.to_string(),
                destination: destination.to_string(),
                clashes,
            });
        }

        self.rules.push(rule);
        Ok(&self.rules[self.rules.len() - 1])
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelocationRule> {
        self.rules.iter()
    }

    /// Relocates every segment-aligned occurrence of a source prefix, in path
    /// or dotted form. Values no rule applies to are returned borrowed.
    ///
    /// An occurrence is aligned when it starts the value or follows a
    /// character that cannot be part of a qualified name, so `Lcom/foo/A;`
    /// is left alone here; descriptors go through
    /// [`RuleSet::rewrite_descriptor`].
    ///
    /// Each occurrence is rewritten by the first rule matching there and
    /// scanning resumes after it, so a replacement is never matched again.
    pub fn rewrite<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if let Some(rewritten) = self.rules.iter().find_map(|rule| rule.whole(value)) {
            return Cow::Owned(rewritten);
        }

        let mut result = String::new();
        let mut last = 0;
        let mut index = 0;
        while index < value.len() {
            if is_segment_start(value, index) {
                let rest = &value[index..];
                if let Some((matched, replacement)) =
                    self.rules.iter().find_map(|rule| rule.match_at(rest))
                {
                    result.push_str(&value[last..index]);
                    result.push_str(&replacement);
                    index += matched;
                    last = index;
                    continue;
                }
            }
            index += rest_char_len(&value[index..]);
        }

        if last == 0 {
            return Cow::Borrowed(value);
        }
        result.push_str(&value[last..]);
        Cow::Owned(result)
    }

    /// Relocates a string constant only when it is shaped like a fully
    /// qualified type name (`com/foo/Widget` or `com.foo.Widget`) that lives
    /// under a source prefix. Anything else, such as resource paths, is left
    /// untouched.
    pub fn rewrite_type_literal(&self, value: &str) -> Option<String> {
        let has_slash = value.contains('/');
        let has_dot = value.contains('.');
        let separator = match (has_slash, has_dot) {
            (true, false) => '/',
            (false, true) => '.',
            _ => return None,
        };
        if !value.split(separator).all(is_java_identifier) {
            return None;
        }

        let matched = self.rules.iter().any(|rule| {
            let prefix = rule.literal_prefix(separator);
            value.len() > prefix.len() && value.starts_with(prefix.as_ref())
        });
        if !matched {
            return None;
        }

        match self.rewrite(value) {
            Cow::Owned(rewritten) => Some(rewritten),
            Cow::Borrowed(_) => None,
        }
    }
}

fn normalize(raw: &str) -> String {
    raw.trim().replace('.', "/").trim_matches('/').to_string()
}

fn rest_char_len(rest: &str) -> usize {
    rest.chars().next().map_or(1, char::len_utf8)
}

fn is_segment_start(value: &str, index: usize) -> bool {
    value[..index]
        .chars()
        .next_back()
        .map_or(true, |previous| !is_qualified_name_char(previous))
}

fn is_qualified_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '/' | '.')
}

fn is_java_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
