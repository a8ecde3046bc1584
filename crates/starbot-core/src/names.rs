//! Star-count suffix codec for member display names (`"name ⭐12"`).

use once_cell::sync::Lazy;
use regex::Regex;

pub const STAR: char = '⭐';

/// Platform-imposed nickname length, in characters.
pub const NICKNAME_MAX_CHARS: usize = 32;

// A trailing star, optional emoji variation selector, then digits or `?`.
static SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+)⭐\x{FE0F}?\s*(?:([0-9]+)|\?)$").expect("suffix pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameParts {
    pub base: String,
    /// `None` when there is no suffix or the suffix is the `?` placeholder.
    pub stars: Option<u32>,
}

/// Split a display name into its base and star count. Never fails: names
/// without a recognisable suffix come back whole.
pub fn decompose(display_name: &str) -> NameParts {
    let whole = || NameParts {
        base: display_name.to_string(),
        stars: None,
    };

    let Some(caps) = SUFFIX_RE.captures(display_name) else {
        return whole();
    };
    let base = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    if base.is_empty() {
        return whole();
    }
    NameParts {
        base: base.to_string(),
        stars: caps.get(2).and_then(|m| m.as_str().parse().ok()),
    }
}

/// Inverse of [`decompose`] for trimmed, non-empty bases. Zero or missing
/// stars leave the base untouched. A blank base yields a bare suffix, which
/// [`decompose`] reads back as a plain name.
pub fn compose(base: &str, stars: Option<u32>) -> String {
    match stars {
        Some(n) if n > 0 => format!("{base} {STAR}{n}"),
        _ => base.to_string(),
    }
}

/// Like [`compose`], but shortens the base so the result fits in
/// `max_chars`. Decomposing the output yields the shortened base, so
/// repeated application is stable.
pub fn compose_within(base: &str, stars: Option<u32>, max_chars: usize) -> String {
    let full = compose(base, stars);
    if full.chars().count() <= max_chars {
        return full;
    }

    let suffix_len = full.chars().count() - base.chars().count();
    let budget = max_chars.saturating_sub(suffix_len);
    let shortened = base.chars().take(budget).collect::<String>();
    let shortened = shortened.trim_end();
    if shortened.is_empty() {
        return base.chars().take(max_chars).collect();
    }
    compose(shortened, stars)
}

/// Whether `base` is what [`compose_within`] leaves of `full` once a
/// suffix of any star count forced it shorter.
pub fn is_shortened_form(base: &str, full: &str, max_chars: usize) -> bool {
    if base.is_empty() || base == full || !full.starts_with(base) {
        return false;
    }
    // " ⭐" plus one to ten digits of a u32.
    (1..=10).any(|digits| {
        let budget = max_chars.saturating_sub(2 + digits);
        full.chars().take(budget).collect::<String>().trim_end() == base
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decompose_recognises_numeric_suffix() {
        assert_eq!(
            decompose("Duck Keeper ⭐14"),
            NameParts {
                base: "Duck Keeper".into(),
                stars: Some(14)
            }
        );
        assert_eq!(decompose("quackers⭐ 3").stars, Some(3));
        assert_eq!(decompose("quackers⭐\u{FE0F}3").base, "quackers");
    }

    #[test]
    fn decompose_treats_question_mark_as_unknown() {
        assert_eq!(
            decompose("mallard ⭐?"),
            NameParts {
                base: "mallard".into(),
                stars: None
            }
        );
    }

    #[test]
    fn decompose_leaves_plain_names_alone() {
        for name in ["mallard", "⭐12", "star ⭐ struck", "a ⭐12b", "  "] {
            assert_eq!(decompose(name).base, name);
            assert_eq!(decompose(name).stars, None);
        }
    }

    #[test]
    fn compose_omits_zero_and_missing_counts() {
        assert_eq!(compose("mallard", None), "mallard");
        assert_eq!(compose("mallard", Some(0)), "mallard");
        assert_eq!(compose("mallard", Some(7)), "mallard ⭐7");
    }

    #[test]
    fn compose_within_shortens_base_and_stays_stable() {
        let base = "A Very Long Display Name That Overflows";
        let nick = compose_within(base, Some(42), NICKNAME_MAX_CHARS);
        assert!(nick.chars().count() <= NICKNAME_MAX_CHARS);
        assert!(nick.ends_with(" ⭐42"));

        let again = compose_within(&decompose(&nick).base, Some(42), NICKNAME_MAX_CHARS);
        assert_eq!(nick, again);
    }

    #[test]
    fn blank_base_reads_back_as_plain_name() {
        let nick = compose("", Some(3));
        assert_eq!(nick, " ⭐3");
        assert_eq!(decompose(&nick).base, nick);
        assert_eq!(decompose(&nick).stars, None);
    }

    #[test]
    fn shortened_form_is_recognised_for_any_suffix_width() {
        let full = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdef";
        for stars in [7, 12, 450] {
            let nick = compose_within(full, Some(stars), NICKNAME_MAX_CHARS);
            let base = decompose(&nick).base;
            assert!(is_shortened_form(&base, full, NICKNAME_MAX_CHARS), "{nick}");
        }
        assert!(!is_shortened_form(full, full, NICKNAME_MAX_CHARS));
        assert!(!is_shortened_form("ABC", full, NICKNAME_MAX_CHARS));
        assert!(!is_shortened_form("Duck", "Duck Keeper", NICKNAME_MAX_CHARS));
    }

    fn base_strategy() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_.][A-Za-z0-9_. -]{0,20}[A-Za-z0-9_.]|[A-Za-z0-9_.]"
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_decompose_inverts_compose(base in base_strategy(), stars in 0u32..10_000) {
            let parts = decompose(&compose(&base, Some(stars)));
            prop_assert_eq!(parts.base, base);
            prop_assert_eq!(parts.stars, Some(stars).filter(|n| *n > 0));
        }

        #[test]
        fn prop_recompose_is_idempotent(base in base_strategy(), stars in 0u32..10_000) {
            let first = compose_within(&base, Some(stars), NICKNAME_MAX_CHARS);
            let second = compose_within(&decompose(&first).base, Some(stars), NICKNAME_MAX_CHARS);
            prop_assert_eq!(first, second);
        }
    }
}
