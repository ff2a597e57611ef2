//! Wildcard permission matching
//!
//! Permission strings are delimited into parts, and parts into alternative
//! sub-parts. A held permission acts as a pattern against the requested one.
//!
//! # Examples
//!
//! ```
//! use gatehouse_permission::wildcard::{matches, WildcardSyntax};
//!
//! assert!(matches("posts:create:draft", "posts:*"));
//! assert!(!matches("posts:create:draft", "posts:create"));
//!
//! let custom = WildcardSyntax::new("@", ":", ";").unwrap();
//! assert!(custom.matches("posts:edit", "posts:create;edit"));
//! ```

mod types;
mod resolver;

#[cfg(test)]
mod tests;

pub use types::{
    matches, verify_matcher, WildcardMatcher, WildcardPermission, WildcardSyntax,
    DEFAULT_PART_DELIMITER, DEFAULT_SUBPART_DELIMITER, DEFAULT_WILDCARD_TOKEN,
};
pub use resolver::{CacheStats, WildcardResolver};
