//! Routing-key pattern matching.
//!
//! Keys are dot-separated segments. Consumer patterns may use `*` to match
//! exactly one segment; segment counts must match, so `match.*` matches
//! `match.created` but not `match.mutual.created`.

/// Whether `routing_key` matches `pattern`.
pub fn matches_pattern(routing_key: &str, pattern: &str) -> bool {
    let mut key_segments = routing_key.split('.');
    let mut pattern_segments = pattern.split('.');

    loop {
        match (key_segments.next(), pattern_segments.next()) {
            (None, None) => return true,
            (Some(key), Some(pat)) if pat == "*" || pat == key => continue,
            _ => return false,
        }
    }
}
