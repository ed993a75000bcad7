//! Name patterns.

use quarry_core::{QuarryError, Result};
use wildmatch::WildMatch;

pub(crate) const DEFAULT_SCHEMA: &str = "public";

/// A single pattern: exact name or `*`/`?` wildcards.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    matcher: WildMatch,
}

impl NamePattern {
    fn new(source: String) -> Self {
        let matcher = WildMatch::new(&source);
        Self { source, matcher }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_wildcard(&self) -> bool {
        self.source.contains(['*', '?'])
    }

    pub fn matches(&self, name: &str) -> bool {
        self.matcher.matches(name)
    }
}

/// An ordered set of patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<NamePattern>,
}

impl PatternSet {
    /// Patterns over `schema.name`; bare names are placed in `public`.
    pub fn qualified(sources: &[String]) -> Result<Self> {
        let patterns = sources
            .iter()
            .map(|s| normalize_qualified(s).map(NamePattern::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Patterns over schema names.
    pub fn schemas(sources: &[String]) -> Result<Self> {
        let patterns = sources
            .iter()
            .map(|s| {
                let s = normalize(s)?;
                if s.contains('.') {
                    return Err(QuarryError::SchemaFilter(format!(
                        "schema pattern '{}' must not contain a dot",
                        s
                    )));
                }
                Ok(NamePattern::new(s))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamePattern> {
        self.patterns.iter()
    }
}

fn normalize(source: &str) -> Result<String> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(QuarryError::SchemaFilter("empty name pattern".to_string()));
    }
    // Loader lists written for SQL LIKE use % for "anything".
    Ok(trimmed.replace('%', "*"))
}

fn normalize_qualified(source: &str) -> Result<String> {
    let pattern = normalize(source)?;
    let parts: Vec<&str> = pattern.split('.').collect();
    match parts.as_slice() {
        [name] => Ok(format!("{}.{}", DEFAULT_SCHEMA, name)),
        [schema, name] if !schema.is_empty() && !name.is_empty() => Ok(pattern),
        _ => Err(QuarryError::SchemaFilter(format!(
            "'{}' is not a valid schema.name pattern",
            source.trim()
        ))),
    }
}

/// Put a bare object name into the default schema.
pub(crate) fn qualify(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{}.{}", DEFAULT_SCHEMA, name)
    }
}

pub(crate) fn schema_of(qualified: &str) -> &str {
    qualified.split_once('.').map(|(s, _)| s).unwrap_or(DEFAULT_SCHEMA)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_patterns() {
        assert_eq!(normalize_qualified("users").unwrap(), "public.users");
        assert_eq!(normalize_qualified(" app.% ").unwrap(), "app.*");
        assert!(normalize_qualified("").is_err());
        assert!(normalize_qualified("a.b.c").is_err());
    }

    #[test]
    fn wildcard_question_mark_matches_one_char() {
        let set = PatternSet::qualified(&["app.log_?".to_string()]).unwrap();
        assert!(set.matches("app.log_1"));
        assert!(!set.matches("app.log_12"));
    }
}
