// src/packages/dependency.rs

//! Debian relationship field parsing
//!
//! Format: `libc6 (>= 2.34), package (= 1.0-1), other | alternative`.
//! Parsing is best-effort: an alternative whose version constraint cannot be
//! understood is kept as a bare name made of the whole alternative text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version relation operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    /// `<<`
    StrictlyEarlier,
    /// `<=`, also the legacy `<`
    EarlierOrEqual,
    /// `=`
    Exactly,
    /// `>=`, also the legacy `>`
    LaterOrEqual,
    /// `>>`
    StrictlyLater,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::StrictlyEarlier => "<<",
            Relation::EarlierOrEqual => "<=",
            Relation::Exactly => "=",
            Relation::LaterOrEqual => ">=",
            Relation::StrictlyLater => ">>",
        }
    }

    /// Split a leading operator off `text`, longest operator first
    fn split_prefix(text: &str) -> Option<(Self, &str)> {
        const OPERATORS: [(&str, Relation); 7] = [
            ("<<", Relation::StrictlyEarlier),
            ("<=", Relation::EarlierOrEqual),
            (">=", Relation::LaterOrEqual),
            (">>", Relation::StrictlyLater),
            ("=", Relation::Exactly),
            ("<", Relation::EarlierOrEqual),
            (">", Relation::LaterOrEqual),
        ];

        OPERATORS
            .iter()
            .find_map(|(op, relation)| text.strip_prefix(op).map(|rest| (*relation, rest)))
    }
}

/// Version constraint such as `>=1.0`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub relation: Relation,
    pub version: String,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.relation.as_str(), self.version)
    }
}

/// A single package reference inside a relationship field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Package name, including any `:arch` qualifier
    pub name: String,
    pub constraint: Option<Constraint>,
}

impl Dependency {
    /// Create a dependency with no version constraint
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: None,
        }
    }

    /// Create a dependency with a version constraint
    pub fn versioned(name: impl Into<String>, relation: Relation, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: Some(Constraint {
                relation,
                version: version.into(),
            }),
        }
    }

    /// Parse one alternative: `name`, `name (op version)` or `name [arch]`
    fn parse(text: &str) -> Self {
        let text = text.trim();

        let Some(open) = text.find('(') else {
            return Self::bare(strip_arch_restriction(text));
        };

        let parsed = (|| {
            let close = text[open..].find(')')? + open;
            if !text[close + 1..].trim().is_empty() && !text[close + 1..].trim().starts_with('[') {
                return None;
            }

            let name = text[..open].trim();
            let (relation, version) = Relation::split_prefix(text[open + 1..close].trim())?;
            let version = version.trim();
            if name.is_empty() || version.is_empty() || version.contains(char::is_whitespace) {
                return None;
            }

            Some(Self::versioned(name, relation, version))
        })();

        parsed.unwrap_or_else(|| Self::bare(text))
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some(constraint) => write!(
                f,
                "{} ({} {})",
                self.name,
                constraint.relation.as_str(),
                constraint.version
            ),
            None => f.write_str(&self.name),
        }
    }
}

/// One comma-separated element of a relationship field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencySpec {
    Single(Dependency),
    /// `a | b | c`: any one alternative satisfies the group
    AnyOf(Vec<Dependency>),
}

impl DependencySpec {
    /// All package references in this element, in written order
    pub fn alternatives(&self) -> &[Dependency] {
        match self {
            DependencySpec::Single(dep) => std::slice::from_ref(dep),
            DependencySpec::AnyOf(deps) => deps,
        }
    }
}

/// Parse a whole relationship field value
///
/// Empty elements (`a, , b`) are skipped; an empty or absent field yields an
/// empty list.
pub fn parse_relations(value: &str) -> Vec<DependencySpec> {
    value
        .split(',')
        .filter_map(|group| {
            let mut alternatives: Vec<Dependency> = group
                .split('|')
                .filter(|alt| !alt.trim().is_empty())
                .map(Dependency::parse)
                .collect();

            match alternatives.len() {
                0 => None,
                1 => alternatives.pop().map(DependencySpec::Single),
                _ => Some(DependencySpec::AnyOf(alternatives)),
            }
        })
        .collect()
}

/// Drop a trailing `[arch list]` restriction used in source relationships
fn strip_arch_restriction(text: &str) -> &str {
    match text.find('[') {
        Some(pos) if text.ends_with(']') => text[..pos].trim_end(),
        _ => text,
    }
}
