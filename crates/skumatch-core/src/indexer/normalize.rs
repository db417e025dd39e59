//! Canonicalisation of free-text codes and product names.
//!
//! Everything here is lookup-only: normalised values feed the candidate
//! index and the scorer, never the identifier that gets written back.

use std::sync::LazyLock;

use regex::Regex;

/// Cyrillic letters that render identically to a Latin capital.
///
/// Both cases map to the Latin upper-case form because codes are compared
/// upper-cased anyway. Extend this table rather than adding ad-hoc rules.
pub const CONFUSABLE_PAIRS: &[(char, char)] = &[
    ('А', 'A'),
    ('В', 'B'),
    ('Е', 'E'),
    ('К', 'K'),
    ('М', 'M'),
    ('Н', 'H'),
    ('О', 'O'),
    ('Р', 'P'),
    ('С', 'S'),
    ('Т', 'T'),
    ('У', 'Y'),
    ('Х', 'X'),
    ('а', 'A'),
    ('в', 'B'),
    ('е', 'E'),
    ('к', 'K'),
    ('м', 'M'),
    ('н', 'H'),
    ('о', 'O'),
    ('р', 'P'),
    ('с', 'S'),
    ('т', 'T'),
    ('у', 'Y'),
    ('х', 'X'),
];

static PAREN_SPAN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\([^()]*\)").unwrap());

static HEAD_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-zА-Яа-я0-9\-]+)").unwrap());

// `х` in the separator class is the Cyrillic letter.
static DIMENSIONS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s*[*xх]\s*(\d+)(?:\s*[*xх]\s*(\d{3,4}))?").unwrap()
});

fn transliterate(c: char) -> Option<char> {
    CONFUSABLE_PAIRS
        .iter()
        .find(|(from, _)| *from == c)
        .map(|(_, to)| *to)
}

/// Canonical form of a code: confusables mapped to Latin, upper-cased, and
/// reduced to ASCII letters and digits.
pub fn normalize_code(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match transliterate(c) {
            Some(latin) => out.push(latin),
            None => out.extend(c.to_uppercase()),
        }
    }
    out.retain(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    out
}

/// Remove balanced `( ... )` spans innermost first until none remain, then
/// collapse whitespace.
pub fn strip_parentheticals(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = PAREN_SPAN_RE.replace_all(&current, "").into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    current.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalised leading code token of a name, or an empty string.
pub fn extract_head_code(text: &str) -> String {
    HEAD_TOKEN_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| normalize_code(m.as_str()))
        .unwrap_or_default()
}

/// Size tokens such as `120x60x800`, first occurrence only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dimensions(Vec<String>);

impl Dimensions {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// True when both tuples are present and have at least one value in common.
    pub fn shares_any(&self, other: &Dimensions) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.0.iter().any(|value| other.0.contains(value))
    }
}

pub fn extract_dimensions(text: &str) -> Dimensions {
    let Some(caps) = DIMENSIONS_RE.captures(text) else {
        return Dimensions::default();
    };
    Dimensions(
        caps.iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str().to_string())
            .collect(),
    )
}

/// Head code with every letter removed (`004G60` -> `00460`).
pub fn digits_only(head: &str) -> String {
    head.chars().filter(|c| c.is_ascii_digit()).collect()
}
