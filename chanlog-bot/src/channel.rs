//! Channel-name canonicalization and hostmask matching.

/// Lower-case `name` and make it start with exactly one `#`.
///
/// Idempotent: `canonicalize(&canonicalize(x)) == canonicalize(x)`.
pub fn canonicalize(name: &str) -> String {
    let bare = name.trim().trim_start_matches('#');
    format!("#{}", bare.to_lowercase())
}

/// Channel names the bot refuses to be invited into: `_`-prefixed names
/// and names with a second leading `#`.
pub fn is_disallowed(raw: &str) -> bool {
    let bare = raw.trim().strip_prefix('#').unwrap_or(raw.trim());
    bare.is_empty() || bare.starts_with('_') || bare.starts_with('#')
}

/// True if `target` names a channel rather than a nick.
pub fn is_channel(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}

/// Case-insensitive wildcard match: `*` matches any run, `?` one character.
pub fn mask_matches(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let text: Vec<char> = text.to_lowercase().chars().collect();
    wildcard_match_inner(&pattern, &text)
}

fn wildcard_match_inner(pattern: &[char], text: &[char]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some('*'), _) => {
            wildcard_match_inner(&pattern[1..], text)
                || (!text.is_empty() && wildcard_match_inner(pattern, &text[1..]))
        }
        (Some('?'), Some(_)) => wildcard_match_inner(&pattern[1..], &text[1..]),
        (Some(a), Some(b)) if a == b => wildcard_match_inner(&pattern[1..], &text[1..]),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms() {
        assert_eq!(canonicalize("#Rust"), "#rust");
        assert_eq!(canonicalize("rust"), "#rust");
        assert_eq!(canonicalize("##Rust"), "#rust");
        assert_eq!(canonicalize(" #rust "), "#rust");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        for raw in ["#Rust", "rust", "###a-B", "#", "", "#ÄÖ", "#_x"] {
            let once = canonicalize(raw);
            assert_eq!(canonicalize(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn disallowed_shapes() {
        assert!(is_disallowed("#_private"));
        assert!(is_disallowed("##offtopic"));
        assert!(is_disallowed("#"));
        assert!(!is_disallowed("#rust"));
        assert!(!is_disallowed("#rust_lang"));
    }

    #[test]
    fn masks() {
        assert!(mask_matches("*!*@badhost", "evil!user@badhost"));
        assert!(mask_matches("*!*@BADHOST", "Evil!User@badhost"));
        assert!(!mask_matches("*!*@badhost", "good!user@goodhost"));
        assert!(mask_matches("n?ck!*@*", "nick!u@h"));
        assert!(!mask_matches("n?ck!*@*", "nck!u@h"));
        assert!(mask_matches("*", ""));
    }
}
