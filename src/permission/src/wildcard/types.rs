//! Wildcard permission grammar and matching
//!
//! A permission string is split on the part delimiter into ordered parts,
//! each part is split on the sub-part delimiter into a set of alternatives.
//! The wildcard token in any position matches anything in that position.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PermissionError, Result};

/// Default token meaning "anything" in a part or sub-part
pub const DEFAULT_WILDCARD_TOKEN: &str = "*";

/// Default separator between parts
pub const DEFAULT_PART_DELIMITER: &str = ":";

/// Default separator between alternatives inside a part
pub const DEFAULT_SUBPART_DELIMITER: &str = ",";

/// Token and delimiters of the wildcard grammar
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct WildcardSyntax {
    pub token: String,
    pub part_delimiter: String,
    pub subpart_delimiter: String,
}

impl Default for WildcardSyntax {
    fn default() -> Self {
        Self {
            token: DEFAULT_WILDCARD_TOKEN.to_string(),
            part_delimiter: DEFAULT_PART_DELIMITER.to_string(),
            subpart_delimiter: DEFAULT_SUBPART_DELIMITER.to_string(),
        }
    }
}

impl WildcardSyntax {
    /// Creates a syntax and validates it
    pub fn new(
        token: impl Into<String>,
        part_delimiter: impl Into<String>,
        subpart_delimiter: impl Into<String>,
    ) -> Result<Self> {
        let syntax = Self {
            token: token.into(),
            part_delimiter: part_delimiter.into(),
            subpart_delimiter: subpart_delimiter.into(),
        };
        syntax.validate()?;
        Ok(syntax)
    }

    /// Checks that the token and delimiters can be told apart
    ///
    /// # Errors
    ///
    /// Returns `InvalidWildcardConfiguration` if any element is empty, the two
    /// delimiters overlap, or the token contains a delimiter.
    pub fn validate(&self) -> Result<()> {
        let invalid =
            |msg: String| -> Result<()> { Err(PermissionError::InvalidWildcardConfiguration(msg)) };

        if self.token.is_empty() {
            return invalid("wildcard token cannot be empty".to_string());
        }
        if self.part_delimiter.is_empty() || self.subpart_delimiter.is_empty() {
            return invalid("wildcard delimiters cannot be empty".to_string());
        }
        if self.part_delimiter.contains(self.subpart_delimiter.as_str())
            || self.subpart_delimiter.contains(self.part_delimiter.as_str())
        {
            return invalid(format!(
                "part delimiter '{}' and sub-part delimiter '{}' overlap",
                self.part_delimiter, self.subpart_delimiter
            ));
        }
        if self.token.contains(self.part_delimiter.as_str())
            || self.token.contains(self.subpart_delimiter.as_str())
        {
            return invalid(format!(
                "wildcard token '{}' contains a delimiter",
                self.token
            ));
        }

        Ok(())
    }

    /// Parses a permission or pattern string under this syntax
    pub fn parse(&self, s: &str) -> WildcardPermission {
        WildcardPermission::parse(s, self)
    }

    /// Does `permission` satisfy `pattern`?
    pub fn matches(&self, permission: &str, pattern: &str) -> bool {
        self.parse(pattern).implies(&self.parse(permission))
    }

    /// Whether the string uses the wildcard token anywhere
    pub fn has_token(&self, s: &str) -> bool {
        s.contains(self.token.as_str())
    }
}

/// Does `permission` satisfy `pattern` under the default syntax?
///
/// ```
/// use gatehouse_permission::wildcard::matches;
///
/// assert!(matches("posts:create", "posts:*"));
/// assert!(matches("posts:create", "posts:create,edit"));
/// assert!(!matches("posts:delete", "posts:create,edit"));
/// ```
pub fn matches(permission: &str, pattern: &str) -> bool {
    WildcardSyntax::default().matches(permission, pattern)
}

/// One position of a parsed permission
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Part {
    alternatives: BTreeSet<String>,
    has_token: bool,
    is_bare_token: bool,
}

impl Part {
    fn parse(raw: &str, syntax: &WildcardSyntax) -> Self {
        let alternatives: BTreeSet<String> = raw
            .split(syntax.subpart_delimiter.as_str())
            .map(str::to_string)
            .collect();
        let has_token = alternatives.contains(&syntax.token);

        Self {
            alternatives,
            has_token,
            is_bare_token: raw == syntax.token,
        }
    }

    fn accepts(&self, other: &Part) -> bool {
        self.has_token
            || other.has_token
            || self
                .alternatives
                .iter()
                .any(|alt| other.alternatives.contains(alt))
    }
}

/// A permission string parsed into parts and sub-part alternatives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WildcardPermission {
    raw: String,
    parts: Vec<Part>,
}

impl WildcardPermission {
    /// Parses a string. An empty string is a single empty part.
    pub fn parse(s: &str, syntax: &WildcardSyntax) -> Self {
        let parts = s
            .split(syntax.part_delimiter.as_str())
            .map(|raw| Part::parse(raw, syntax))
            .collect();

        Self {
            raw: s.to_string(),
            parts,
        }
    }

    /// Returns the original string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Number of parts
    pub fn depth(&self) -> usize {
        self.parts.len()
    }

    /// Alternatives of the part at `index`, in sorted order
    pub fn alternatives(&self, index: usize) -> Option<Vec<&str>> {
        self.parts
            .get(index)
            .map(|part| part.alternatives.iter().map(String::as_str).collect())
    }

    /// Whether any position uses the wildcard token
    pub fn has_wildcards(&self) -> bool {
        self.parts.iter().any(|part| part.has_token)
    }

    /// Treating `self` as the pattern, is `permission` granted?
    ///
    /// A pattern whose last part is exactly the token also covers any number
    /// of extra trailing parts of the permission.
    pub fn implies(&self, permission: &WildcardPermission) -> bool {
        let trailing = self.parts.last().is_some_and(|part| part.is_bare_token);
        Self::match_parts(&self.parts, &permission.parts, trailing)
    }

    fn match_parts(pattern: &[Part], permission: &[Part], trailing: bool) -> bool {
        match (pattern.split_first(), permission.split_first()) {
            // Permission exhausted: every remaining pattern part must be a wildcard
            (_, None) => pattern.iter().all(|part| part.has_token),
            // Pattern exhausted first
            (None, Some(_)) => trailing,
            (Some((head, pattern_rest)), Some((other, permission_rest))) => {
                head.accepts(other) && Self::match_parts(pattern_rest, permission_rest, trailing)
            }
        }
    }
}

impl fmt::Display for WildcardPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Matching contract used by the authorizer in wildcard mode
pub trait WildcardMatcher: Send + Sync {
    /// Whether holding `pattern` grants `permission`
    fn implies(&self, pattern: &str, permission: &str) -> bool;
}

impl WildcardMatcher for WildcardSyntax {
    fn implies(&self, pattern: &str, permission: &str) -> bool {
        self.matches(permission, pattern)
    }
}

/// Checks a matcher against the fixed contract every implementation must meet
///
/// # Errors
///
/// Returns `InvalidWildcardConfiguration` naming the first case that fails.
pub fn verify_matcher(matcher: &dyn WildcardMatcher, syntax: &WildcardSyntax) -> Result<()> {
    let join = |parts: &[&str]| parts.join(syntax.part_delimiter.as_str());
    let alts = |alts: &[&str]| alts.join(syntax.subpart_delimiter.as_str());
    let token = syntax.token.as_str();

    let cases = [
        (join(&["posts", "edit"]), join(&["posts", "edit"]), true),
        (join(&["posts", token]), join(&["posts", "edit"]), true),
        (join(&["posts", token]), join(&["posts", "edit", "draft"]), true),
        (join(&["posts", &alts(&["create", "edit"])]), join(&["posts", "edit"]), true),
        (join(&["posts", &alts(&["create", "edit"])]), join(&["posts", "delete"]), false),
        (join(&["posts", "edit"]), join(&["posts", "edit", "draft"]), false),
        ("posts".to_string(), "comments".to_string(), false),
    ];

    for (pattern, permission, expected) in cases {
        if matcher.implies(&pattern, &permission) != expected {
            return Err(PermissionError::InvalidWildcardConfiguration(format!(
                "matcher returned {} for pattern '{}' against '{}'",
                !expected, pattern, permission
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_parts() {
        let syntax = WildcardSyntax::default();
        let perm = syntax.parse("posts:create,edit:own");
        assert_eq!(perm.depth(), 3);
        assert_eq!(perm.alternatives(1), Some(vec!["create", "edit"]));
        assert!(!perm.has_wildcards());
        assert_eq!(perm.as_str(), "posts:create,edit:own");
    }

    #[test]
    fn test_empty_string_is_single_part() {
        let perm = WildcardSyntax::default().parse("");
        assert_eq!(perm.depth(), 1);
        assert_eq!(perm.alternatives(0), Some(vec![""]));
    }

    #[test]
    fn test_validate_syntax() {
        assert!(WildcardSyntax::default().validate().is_ok());
        assert!(WildcardSyntax::new("@", ":", ";").is_ok());
        assert!(matches!(
            WildcardSyntax::new("", ":", ","),
            Err(PermissionError::InvalidWildcardConfiguration(_))
        ));
        assert!(matches!(
            WildcardSyntax::new("*", ":", ":"),
            Err(PermissionError::InvalidWildcardConfiguration(_))
        ));
        assert!(matches!(
            WildcardSyntax::new("*:", ":", ","),
            Err(PermissionError::InvalidWildcardConfiguration(_))
        ));
    }

    #[test]
    fn test_default_syntax_passes_contract() {
        let syntax = WildcardSyntax::default();
        assert!(verify_matcher(&syntax, &syntax).is_ok());
    }

    #[test]
    fn test_broken_matcher_fails_contract() {
        struct ExactOnly;
        impl WildcardMatcher for ExactOnly {
            fn implies(&self, pattern: &str, permission: &str) -> bool {
                pattern == permission
            }
        }

        let err = verify_matcher(&ExactOnly, &WildcardSyntax::default()).unwrap_err();
        assert!(matches!(err, PermissionError::InvalidWildcardConfiguration(_)));
    }
}
