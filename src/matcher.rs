//! # Topic Matcher
//!
//! Tests topics against MQTT filter patterns, and parses the
//! comma-separated pattern lists the broker hands over as plugin options.
//!
//! ## Filter Syntax
//!
//! - `+` matches exactly one topic level, including an empty one
//!   (`a/+` matches `a/`).
//! - `#` matches the remainder of the topic, zero or more levels
//!   (`a/#` matches `a`, `a/b` and `a/b/c`), and must be the final level.
//! - Anything else matches byte-for-byte.
//!
//! An empty pattern matches nothing; a pattern without wildcards is a
//! plain string-equality test. Both sides are compared as UTF-8 bytes.

use tracing::{info, warn};

/// Hard cap on the number of exclusion patterns accepted from options.
pub const MAX_PATTERNS: usize = 64;

// =============================================================================
// Matching
// =============================================================================

/// Returns true if `topic` matches the MQTT filter `pattern`.
///
/// Walks both strings level by level, where levels are the `/`-separated
/// segments. `#` succeeds immediately; `+` consumes one topic level; a
/// literal level must compare equal. When the pattern runs out, the topic
/// must be exhausted too.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }

    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match pattern_levels.next() {
            None => return topic_levels.next().is_none(),
            Some("#") => return true,
            Some(p) => match topic_levels.next() {
                None => return false,
                Some(t) => {
                    if p != "+" && p != t {
                        return false;
                    }
                }
            },
        }
    }
}

/// Returns true if any pattern in the list matches the topic.
pub fn matches_any(patterns: &[String], topic: &str) -> bool {
    patterns.iter().any(|p| topic_matches(p, topic))
}

// =============================================================================
// Pattern List Parsing
// =============================================================================

/// Parses a comma-separated exclusion-pattern option value.
///
/// Tokens are trimmed of ASCII whitespace; empty tokens are dropped.
/// Patterns with `#` anywhere but the final level are rejected with a
/// warning. At most [`MAX_PATTERNS`] patterns are kept; the excess is
/// logged and ignored. Each accepted pattern is logged at INFO so the
/// effective filter set is visible in the broker log at startup.
pub fn parse_patterns(value: &str) -> Vec<String> {
    let mut patterns = Vec::new();

    for token in value.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if !valid_pattern(token) {
            warn!(pattern = token, "ignoring invalid topic filter");
            continue;
        }
        if patterns.len() == MAX_PATTERNS {
            warn!(
                max = MAX_PATTERNS,
                "too many exclusion patterns, ignoring the rest"
            );
            break;
        }
        info!(pattern = token, "excluding topic pattern");
        patterns.push(token.to_string());
    }

    patterns
}

/// A `#` is only valid as the entire final level.
fn valid_pattern(pattern: &str) -> bool {
    let mut levels = pattern.split('/').peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') && (level != "#" || levels.peek().is_some()) {
            return false;
        }
    }
    true
}

// =============================================================================
// Tests
// =============================================================================
