//! Test suite for wildcard matching
//!
//! Tests cover:
//! - Exact matching
//! - Trailing wildcards and missing parts
//! - Sub-part alternatives
//! - Custom syntax
//! - Edge cases

use super::*;

// ============================================================================
// Exact and Wildcard Matching
// ============================================================================

#[test]
fn test_exact_match() {
    assert!(matches("posts", "posts"));
    assert!(matches("posts:create", "posts:create"));
    assert!(!matches("posts:create", "posts:edit"));
    assert!(!matches("posts", "comments"));
}

#[test]
fn test_matching_is_case_sensitive() {
    assert!(!matches("Posts:create", "posts:create"));
    assert!(!matches("posts:CREATE", "posts:create,edit"));
}

#[test]
fn test_single_wildcard_part() {
    assert!(matches("posts:create", "posts:*"));
    assert!(matches("posts:create", "*:create"));
    assert!(matches("posts:create", "*"));
    assert!(!matches("comments:create", "posts:*"));
}

#[test]
fn test_trailing_wildcard_covers_extra_parts() {
    assert!(matches("posts:create:draft", "posts:*"));
    assert!(matches("posts:create:draft:own", "posts:*"));
    assert!(matches("posts:create:draft", "*"));
}

#[test]
fn test_trailing_wildcard_covers_missing_parts() {
    // Chosen policy: remaining pattern parts that are wildcards match absent parts
    assert!(matches("posts", "posts:*"));
    assert!(matches("posts", "posts:*:*"));
    assert!(matches("posts", "posts:create,*"));
    assert!(!matches("posts", "posts:create"));
    assert!(!matches("posts", "posts:*:create"));
}

#[test]
fn test_pattern_shorter_without_wildcard_fails() {
    assert!(!matches("posts:create", "posts"));
    assert!(!matches("posts:create:draft", "posts:create"));
}

#[test]
fn test_only_bare_last_part_extends() {
    // `create,*` holds the token but is not the bare token, so it does not
    // cover extra trailing parts
    assert!(matches("posts:edit", "posts:create,*"));
    assert!(!matches("posts:edit:draft", "posts:create,*"));
}

#[test]
fn test_inner_wildcard() {
    assert!(matches("posts:create:draft", "posts:*:draft"));
    assert!(!matches("posts:create:published", "posts:*:draft"));
}

// ============================================================================
// Sub-part Alternatives
// ============================================================================

#[test]
fn test_subpart_alternatives() {
    assert!(matches("posts:create", "posts:create,edit"));
    assert!(matches("posts:edit", "posts:create,edit"));
    assert!(!matches("posts:delete", "posts:create,edit"));
}

#[test]
fn test_subpart_alternatives_on_both_sides() {
    assert!(matches("posts,comments:edit", "comments:edit"));
    assert!(matches("posts:create,edit", "posts:edit,delete"));
    assert!(!matches("posts:create,view", "posts:edit,delete"));
}

#[test]
fn test_duplicate_alternatives() {
    assert!(matches("posts:edit", "posts:edit,edit"));
    assert!(!matches("posts:view", "posts:edit,edit,edit"));

    let parsed = WildcardSyntax::default().parse("posts:edit,edit");
    assert_eq!(parsed.alternatives(1), Some(vec!["edit"]));
}

#[test]
fn test_wildcard_inside_subpart_list() {
    assert!(matches("posts:anything", "posts:a,*,b"));
    assert!(matches("posts:a", "posts:a,*,b"));
}

#[test]
fn test_wildcard_on_permission_side() {
    assert!(matches("posts:*", "posts:edit"));
}

// ============================================================================
// Edge Cases
// ============================================================================

#[test]
fn test_empty_strings() {
    assert!(matches("", ""));
    assert!(!matches("", "posts"));
    assert!(!matches("posts", ""));
    assert!(matches("", "*"));
}

#[test]
fn test_empty_parts() {
    assert!(matches("posts::edit", "posts::edit"));
    assert!(!matches("posts::edit", "posts:create:edit"));
    assert!(matches("posts::edit", "posts:*:edit"));
}

#[test]
fn test_pattern_longer_than_permission() {
    assert!(!matches("posts:create", "posts:create:draft"));
    assert!(matches("posts:create", "posts:create:*"));
}

#[test]
fn test_has_wildcards() {
    let syntax = WildcardSyntax::default();
    assert!(syntax.parse("posts:*").has_wildcards());
    assert!(syntax.parse("posts:a,*").has_wildcards());
    assert!(!syntax.parse("posts:edit").has_wildcards());
    assert!(syntax.has_token("posts:*"));
}

// ============================================================================
// Custom Syntax
// ============================================================================

#[test]
fn test_custom_token_and_delimiters() {
    let syntax = WildcardSyntax::new("@", ":", ";").unwrap();

    assert!(syntax.matches("posts:create", "posts:@"));
    assert!(syntax.matches("posts:create:draft", "posts:@"));
    assert!(syntax.matches("posts:edit", "posts:create;edit"));
    // Default token and sub-part delimiter are plain characters here
    assert!(!syntax.matches("posts:edit", "posts:*"));
    assert!(!syntax.matches("posts:edit", "posts:create,edit"));
    assert!(syntax.matches("posts:create,edit", "posts:create,edit"));
}

#[test]
fn test_multi_character_delimiters() {
    let syntax = WildcardSyntax::new("ANY", "::", "|").unwrap();

    assert!(syntax.matches("posts::edit", "posts::ANY"));
    assert!(syntax.matches("posts::edit", "posts::create|edit"));
    assert!(!syntax.matches("posts::edit", "posts::create"));
}

#[test]
fn test_custom_syntax_passes_contract() {
    let syntax = WildcardSyntax::new("@", ":", ";").unwrap();
    let resolver = WildcardResolver::new(syntax.clone());
    assert!(verify_matcher(&resolver, &syntax).is_ok());
}

#[test]
fn test_display() {
    let parsed = WildcardSyntax::default().parse("posts:create,edit");
    assert_eq!(format!("{}", parsed), "posts:create,edit");
}
