//! Rule type definitions and name normalisation.

/// A single domain-matching rule.
///
/// `Domain` and `Full` values are normalised to lowercase FQDN form
/// (trailing dot) at construction; `Keyword` values are lowercased;
/// `Regex` values are kept as authored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Matches the name itself and any dot-aligned subdomain of it.
    Domain(String),
    /// Matches the name exactly.
    Full(String),
    /// Matches when the value occurs as a substring anywhere in the name.
    Keyword(String),
    /// Matches the name against a regular expression.
    Regex(String),
}

impl Rule {
    /// Domain-suffix rule, normalised to lowercase FQDN.
    pub fn domain(value: impl AsRef<str>) -> Self {
        Rule::Domain(fqdn(value.as_ref()))
    }

    /// Exact-name rule, normalised to lowercase FQDN.
    pub fn full(value: impl AsRef<str>) -> Self {
        Rule::Full(fqdn(value.as_ref()))
    }

    /// Substring rule, lowercased.
    pub fn keyword(value: impl AsRef<str>) -> Self {
        Rule::Keyword(value.as_ref().to_ascii_lowercase())
    }

    /// Regex rule, kept as authored.
    pub fn regex(value: impl Into<String>) -> Self {
        Rule::Regex(value.into())
    }
}

/// Normalise a name to lowercase fully-qualified form: lowercase ASCII,
/// trailing dot appended if missing. The empty string becomes `"."`.
pub fn fqdn(name: &str) -> String {
    let mut out = name.to_ascii_lowercase();
    if !out.ends_with('.') {
        out.push('.');
    }
    out
}
