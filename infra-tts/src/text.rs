use std::sync::OnceLock;

use regex::Regex;

/// Inline markers the synthesis backend can actually voice. Anything else
/// in brackets is stage direction and gets stripped.
const SUPPORTED_MARKERS: [&str; 16] = [
    "[breath]",
    "<strong>",
    "</strong>",
    "[noise]",
    "[laughter]",
    "[cough]",
    "[clucking]",
    "[accent]",
    "[quick_breath]",
    "<laughter>",
    "</laughter>",
    "[hissing]",
    "[sigh]",
    "[vocalized-noise]",
    "[lipsmack]",
    "[mn]",
];

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[[^\]]*\]|<[^>]*>").expect("literal pattern"))
}

fn aside_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\([^)]*\)").expect("literal pattern"))
}

/// Strips unsupported bracket/angle markers and parenthesised stage
/// directions, then collapses the leftover whitespace.
pub fn prepare_text(text: &str) -> String {
    let without_tags = tag_pattern().replace_all(text, |caps: &regex::Captures<'_>| {
        let tag = &caps[0];
        if SUPPORTED_MARKERS.contains(&tag) {
            tag.to_string()
        } else {
            String::new()
        }
    });
    let without_asides = aside_pattern().replace_all(&without_tags, "");
    without_asides.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::prepare_text;

    #[test]
    fn supported_markers_survive_cleanup() {
        assert_eq!(
            prepare_text("Oh [laughter] stop it [breath] please"),
            "Oh [laughter] stop it [breath] please"
        );
    }

    #[test]
    fn unsupported_markers_and_asides_are_removed() {
        assert_eq!(
            prepare_text("Sure [rolls eyes] fine (storms off) whatever <em>really</em>"),
            "Sure fine whatever really"
        );
    }

    #[test]
    fn whitespace_is_collapsed_after_removal() {
        assert_eq!(prepare_text("  a   [shrug]   b  "), "a b");
    }
}
