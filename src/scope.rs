//! Scope tags attached to branches.
//!
//! A scope is an ordered set of identifier tags, stored in branch metadata as
//! a comma-separated string. An unset or empty scope inherits from the parent
//! chain; the sentinel value `none` suppresses inheritance and means
//! "explicitly no scope". Scopes feed PR title prefixes (`[api,db] `).

use std::fmt;

/// Sentinel scope string that suppresses inheritance.
pub const SCOPE_NONE: &str = "none";

/// A branch's scope as stored in metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    /// No explicit scope; inherit from the parent chain up to trunk.
    #[default]
    Inherit,
    /// Explicitly empty (the `none` sentinel); do not inherit.
    None,
    /// One or more tags, in insertion order, deduplicated.
    Tags(Vec<String>),
}

impl Scope {
    /// Parse a stored scope string. Empty or whitespace-only input is
    /// `Inherit`; the case-insensitive sentinel `none` is `None`; otherwise
    /// tags are split on commas, trimmed, and deduplicated preserving order.
    pub fn parse(raw: &str) -> Scope {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Scope::Inherit;
        }
        if trimmed.eq_ignore_ascii_case(SCOPE_NONE) {
            return Scope::None;
        }
        let mut tags: Vec<String> = Vec::new();
        for part in trimmed.split(',') {
            let tag = part.trim();
            if tag.is_empty() {
                continue;
            }
            if !tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                tags.push(tag.to_string());
            }
        }
        if tags.is_empty() {
            Scope::Inherit
        } else {
            Scope::Tags(tags)
        }
    }

    /// Parse an optional stored value (absent means inherit).
    pub fn parse_opt(raw: Option<&str>) -> Scope {
        raw.map(Scope::parse).unwrap_or_default()
    }

    /// The string form persisted in metadata, or `None` when nothing should
    /// be written (inherit).
    pub fn to_stored(&self) -> Option<String> {
        match self {
            Scope::Inherit => None,
            Scope::None => Some(SCOPE_NONE.to_string()),
            Scope::Tags(tags) => Some(tags.join(",")),
        }
    }

    /// Whether this scope carries tags.
    pub fn has_tags(&self) -> bool {
        matches!(self, Scope::Tags(_))
    }

    /// The tags, empty for `Inherit` and `None`.
    pub fn tags(&self) -> &[String] {
        match self {
            Scope::Tags(tags) => tags,
            _ => &[],
        }
    }

    /// Render the PR title prefix for this scope, e.g. `[api,db] `.
    /// Returns `None` when the scope has no tags.
    pub fn title_prefix(&self) -> Option<String> {
        match self {
            Scope::Tags(tags) => Some(format!("[{}] ", tags.join(","))),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Inherit => Ok(()),
            Scope::None => write!(f, "{}", SCOPE_NONE),
            Scope::Tags(tags) => write!(f, "{}", tags.join(",")),
        }
    }
}

/// Apply a scope's title prefix to a PR title.
///
/// If the title already starts with a `[...]` prefix that matches the scope
/// case-insensitively, the title is returned unchanged. A different existing
/// prefix is replaced; a missing prefix is prepended. A scope without tags
/// strips any existing prefix.
pub fn apply_title_prefix(title: &str, scope: &Scope) -> String {
    let (existing, rest) = split_title_prefix(title);
    match scope.title_prefix() {
        Some(prefix) => match existing {
            Some(current) if current.eq_ignore_ascii_case(prefix.trim_end()) => title.to_string(),
            _ => format!("{}{}", prefix, rest),
        },
        None => rest.to_string(),
    }
}

/// True when the title's existing `[...]` prefix (or absence of one) already
/// matches the scope, i.e. no update is needed.
pub fn title_prefix_matches(title: &str, scope: &Scope) -> bool {
    let (existing, _) = split_title_prefix(title);
    match (existing, scope.title_prefix()) {
        (Some(current), Some(wanted)) => current.eq_ignore_ascii_case(wanted.trim_end()),
        (None, None) => true,
        _ => false,
    }
}

/// Split a title into its leading `[...]` prefix (if any) and the remainder.
fn split_title_prefix(title: &str) -> (Option<&str>, &str) {
    let trimmed = title.trim_start();
    if let Some(stripped) = trimmed.strip_prefix('[') {
        if let Some(close) = stripped.find(']') {
            let prefix = &trimmed[..close + 2];
            let rest = trimmed[close + 2..].trim_start();
            return (Some(prefix), rest);
        }
    }
    (None, trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_is_inherit() {
        assert_eq!(Scope::parse(""), Scope::Inherit);
        assert_eq!(Scope::parse("   "), Scope::Inherit);
        assert_eq!(Scope::parse_opt(None), Scope::Inherit);
    }

    #[test]
    fn test_parse_none_sentinel() {
        assert_eq!(Scope::parse("none"), Scope::None);
        assert_eq!(Scope::parse("NONE"), Scope::None);
        assert_eq!(Scope::parse(" None "), Scope::None);
    }

    #[test]
    fn test_parse_tags_trims_and_dedups() {
        let scope = Scope::parse("api, db,api ,");
        assert_eq!(scope, Scope::Tags(vec!["api".to_string(), "db".to_string()]));
    }

    #[test]
    fn test_stored_round_trip() {
        for raw in ["api,db", "none"] {
            let scope = Scope::parse(raw);
            assert_eq!(scope.to_stored().as_deref(), Some(raw));
        }
        assert_eq!(Scope::Inherit.to_stored(), None);
    }

    #[test]
    fn test_title_prefix() {
        assert_eq!(
            Scope::parse("api,db").title_prefix().as_deref(),
            Some("[api,db] ")
        );
        assert_eq!(Scope::None.title_prefix(), None);
        assert_eq!(Scope::Inherit.title_prefix(), None);
    }

    #[test]
    fn test_apply_prefix_prepends_when_absent() {
        let scope = Scope::parse("api");
        assert_eq!(apply_title_prefix("Add endpoint", &scope), "[api] Add endpoint");
    }

    #[test]
    fn test_apply_prefix_keeps_matching_prefix_case_insensitive() {
        let scope = Scope::parse("api");
        assert_eq!(apply_title_prefix("[API] Add endpoint", &scope), "[API] Add endpoint");
        assert!(title_prefix_matches("[API] Add endpoint", &scope));
    }

    #[test]
    fn test_apply_prefix_replaces_different_prefix() {
        let scope = Scope::parse("db");
        assert_eq!(apply_title_prefix("[api] Add index", &scope), "[db] Add index");
        assert!(!title_prefix_matches("[api] Add index", &scope));
    }

    #[test]
    fn test_apply_prefix_strips_when_scope_empty() {
        assert_eq!(apply_title_prefix("[api] Add index", &Scope::None), "Add index");
        assert!(title_prefix_matches("Add index", &Scope::None));
    }

    #[test]
    fn test_display() {
        assert_eq!(Scope::parse("api,db").to_string(), "api,db");
        assert_eq!(Scope::None.to_string(), "none");
        assert_eq!(Scope::Inherit.to_string(), "");
    }
}
