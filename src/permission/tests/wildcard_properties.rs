//! Property tests for the wildcard grammar

use gatehouse_permission::wildcard::{matches, WildcardResolver, WildcardSyntax};
use proptest::prelude::*;

/// Permission strings without the wildcard token
fn literal_permission() -> impl Strategy<Value = String> {
    "[a-z]{1,8}(:[a-z,]{1,8}){0,4}"
}

proptest! {
    #[test]
    fn prop_literal_matches_itself(permission in literal_permission()) {
        prop_assert!(matches(&permission, &permission));
    }

    #[test]
    fn prop_extra_part_needs_wildcard(permission in literal_permission(), extra in "[a-z]{1,8}") {
        let longer = format!("{}:{}", permission, extra);
        prop_assert!(!matches(&longer, &permission));
        let wildcard = format!("{}:*", permission);
        prop_assert!(matches(&longer, &wildcard));
    }

    #[test]
    fn prop_trailing_wildcard_covers_prefix(head in "[a-z]{1,8}", tail in literal_permission()) {
        let permission = format!("{}:{}", head, tail);
        let pattern = format!("{}:*", head);
        prop_assert!(matches(&permission, &pattern));
    }

    #[test]
    fn prop_resolver_agrees_with_matcher(pattern in "[a-z*]{1,3}(:[a-z*,]{1,3}){0,3}", permission in literal_permission()) {
        let resolver = WildcardResolver::new(WildcardSyntax::default());
        prop_assert_eq!(resolver.implies(&pattern, &permission), matches(&permission, &pattern));
        // Cached answer is the same
        prop_assert_eq!(resolver.implies(&pattern, &permission), matches(&permission, &pattern));
    }
}

#[test]
fn test_documented_examples() {
    assert!(matches("posts:create", "posts:*"));
    assert!(matches("posts:create:draft", "posts:*"));
    assert!(matches("posts", "posts:*"));
    assert!(matches("posts:create", "posts:create,edit"));
    assert!(!matches("posts:delete", "posts:create,edit"));
}
