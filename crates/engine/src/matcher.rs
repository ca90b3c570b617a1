//! Status attribute matching.

/// Case-insensitive substring test of a member's observed status text
/// against a rule's target.
///
/// An absent status is a valid non-match, not an error.
pub fn matches(observed: Option<&str>, target: &str) -> bool {
    match observed {
        Some(text) => text.to_lowercase().contains(&target.to_lowercase()),
        None => false,
    }
}
