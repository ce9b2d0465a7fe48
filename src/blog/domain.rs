// Domain rules - pure, no side effects
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_SLUG_LEN: usize = 3;
pub const CONTENT_MIN: usize = 10;
pub const CONTENT_MAX: usize = 20_000;
pub const SUMMARY_MIN: usize = 100;
pub const SUMMARY_MAX: usize = 580;
pub const DISPLAY_NAME_MAX: usize = 50;

pub const DEFAULT_CONTENT: &str = "# Hello World";
pub const DEFAULT_SUMMARY: &str = "Lorem Ipsum is simply dummy text of the printing and typesetting industry. \
Lorem Ipsum has been the industry's standard dummy text ever since the 1500s, when an unknown printer \
took a galley of type and scrambled it to make a type specimen book. It has survived not only five \
centuries, but also the leap into electronic typesetting, remaining essentially unchanged.";

pub const SLUG_TAKEN: &str =
    "You have already created a post of similar title, please use a diffrent title";

static USERNAME_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9._]{3,15}$").expect("username pattern is a valid regex")
});

// encodeURI leaves these untouched
const URI_RESERVED: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsernameError {
    #[error("Username must be at least 3 characters")]
    TooShort,
    #[error("Username must be at most 15 characters")]
    TooLong,
    #[error("Username may only contain letters, numbers, '.' and '_'")]
    InvalidCharacters,
    #[error("Username cannot contain consecutive '.' or '_'")]
    RepeatedSeparator,
    #[error("Username cannot start or end with '.' or '_'")]
    EdgeSeparator,
}

impl Username {
    /// Lowercases and validates user input.
    pub fn parse(input: &str) -> Result<Self, UsernameError> {
        let value = input.trim().to_lowercase();
        let len = value.chars().count();
        if len < 3 {
            return Err(UsernameError::TooShort);
        }
        if len > 15 {
            return Err(UsernameError::TooLong);
        }
        if !USERNAME_CHARS.is_match(&value) {
            return Err(UsernameError::InvalidCharacters);
        }
        let bytes = value.as_bytes();
        if bytes
            .windows(2)
            .any(|w| is_separator(w[0]) && is_separator(w[1]))
        {
            return Err(UsernameError::RepeatedSeparator);
        }
        if is_separator(bytes[0]) || is_separator(bytes[bytes.len() - 1]) {
            return Err(UsernameError::EdgeSeparator);
        }
        Ok(Self(value))
    }

    /// Username derived from an email address for a first login without one.
    ///
    /// `suffix` is the current millisecond (0-999), which keeps collisions
    /// between same-named accounts unlikely without a lookup.
    pub fn generate(email: &str, suffix: u32) -> Self {
        let local = email.split('@').next().unwrap_or_default();
        let mut base: String = local
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .take(12)
            .collect();
        if base.len() < 3 {
            base = format!("user{base}");
            base.truncate(12);
        }
        Self(format!("{}{}", base, suffix % 1000))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn is_separator(b: u8) -> bool {
    b == b'.' || b == b'_'
}

/// Display name for a fresh account: the email local part with separators
/// turned into spaces.
pub fn display_name_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let name = local.replace(['.', '-', '_'], " ");
    let name = name.trim();
    if name.is_empty() {
        "Anonymous".to_string()
    } else {
        name.to_string()
    }
}

pub fn default_photo_url(uid: &str) -> String {
    format!("https://avatars.dicebear.com/api/adventurer/{uid}.svg")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Lower,
    Upper,
    Digit,
    Other,
}

fn classify(c: char) -> CharClass {
    if c.is_numeric() {
        CharClass::Digit
    } else if c.is_uppercase() {
        CharClass::Upper
    } else if c.is_alphabetic() {
        CharClass::Lower
    } else {
        CharClass::Other
    }
}

/// Split a title into words the way lodash's `words` does: runs of
/// alphanumerics, broken at lower->upper, letter<->digit and
/// `ACRONYMWord` boundaries.
fn words(title: &str) -> Vec<String> {
    let chars: Vec<char> = title.chars().collect();
    let mut out = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        let class = classify(c);
        if class == CharClass::Other {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            continue;
        }

        if let Some(prev) = current.chars().last() {
            let prev_class = classify(prev);
            let next_class = chars.get(i + 1).map(|&n| classify(n));
            let boundary = match (prev_class, class) {
                (CharClass::Lower, CharClass::Upper) => true,
                (CharClass::Digit, CharClass::Lower | CharClass::Upper) => true,
                (CharClass::Lower | CharClass::Upper, CharClass::Digit) => true,
                (CharClass::Upper, CharClass::Upper) => next_class == Some(CharClass::Lower),
                _ => false,
            };
            if boundary {
                out.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }

    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Kebab-case a post title into a URL-safe slug.
pub fn slugify(title: &str) -> String {
    let kebab = words(title)
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-");
    utf8_percent_encode(&kebab, URI_RESERVED).to_string()
}

pub fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.len() < MIN_SLUG_LEN {
        return Err("The title must produce a slug of at least 3 characters".to_string());
    }
    Ok(())
}

pub fn validate_content(content: &str) -> Result<(), String> {
    let len = content.chars().count();
    if len < CONTENT_MIN {
        return Err("Post content must be at least 10 characters".to_string());
    }
    if len > CONTENT_MAX {
        return Err("Post content must be less than 20000 characters".to_string());
    }
    Ok(())
}

pub fn validate_summary(summary: &str) -> Result<(), String> {
    let len = summary.chars().count();
    if len < SUMMARY_MIN {
        return Err("The summary must be greater than 50 words".to_string());
    }
    if len > SUMMARY_MAX {
        return Err("Summary must not be greater than 100 words".to_string());
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> Result<String, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Display name is required".to_string());
    }
    if name.chars().count() > DISPLAY_NAME_MAX {
        return Err("Display name must be at most 50 characters".to_string());
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_usernames_are_rejected() {
        assert_eq!(Username::parse(""), Err(UsernameError::TooShort));
        assert_eq!(Username::parse("a"), Err(UsernameError::TooShort));
        assert_eq!(Username::parse("ab"), Err(UsernameError::TooShort));
        assert!(Username::parse("abc").is_ok());
    }

    #[test]
    fn usernames_are_lowercased() {
        assert_eq!(Username::parse("Alice.B").unwrap().as_str(), "alice.b");
    }

    #[test]
    fn username_separator_rules() {
        assert_eq!(
            Username::parse("al..ice"),
            Err(UsernameError::RepeatedSeparator)
        );
        assert_eq!(
            Username::parse("al._ice"),
            Err(UsernameError::RepeatedSeparator)
        );
        assert_eq!(Username::parse("_alice"), Err(UsernameError::EdgeSeparator));
        assert_eq!(Username::parse("alice."), Err(UsernameError::EdgeSeparator));
        assert!(Username::parse("al_ic.e").is_ok());
    }

    #[test]
    fn username_rejects_bad_characters_and_length() {
        assert_eq!(
            Username::parse("al-ice"),
            Err(UsernameError::InvalidCharacters)
        );
        assert_eq!(
            Username::parse("abcdefghijklmnop"),
            Err(UsernameError::TooLong)
        );
    }

    #[test]
    fn generated_usernames_pass_validation() {
        for (email, suffix) in [
            ("john.doe@example.com", 7),
            ("x@example.com", 999),
            ("a.very.long.local.part@example.com", 123),
            ("@example.com", 0),
        ] {
            let generated = Username::generate(email, suffix);
            assert!(
                Username::parse(generated.as_str()).is_ok(),
                "{generated} should be valid"
            );
        }
        assert_eq!(
            Username::generate("john.doe@example.com", 42).as_str(),
            "johndoe42"
        );
    }

    #[test]
    fn display_name_strips_separators() {
        assert_eq!(display_name_from_email("john.doe_x@example.com"), "john doe x");
        assert_eq!(display_name_from_email("@example.com"), "Anonymous");
    }

    #[test]
    fn slugify_kebab_cases_titles() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("Hello   World!!"), "hello-world");
        assert_eq!(slugify("  --Rust_is fun--  "), "rust-is-fun");
        assert_eq!(slugify("helloWorld"), "hello-world");
        assert_eq!(slugify("XMLHttpRequest"), "xml-http-request");
        assert_eq!(slugify("Top 10 tips"), "top-10-tips");
        assert_eq!(slugify("abc123"), "abc-123");
    }

    #[test]
    fn slugify_percent_encodes_non_ascii() {
        assert_eq!(slugify("Café au lait"), "caf%C3%A9-au-lait");
    }

    #[test]
    fn short_slugs_are_invalid() {
        assert!(validate_slug(&slugify("Hi")).is_err());
        assert!(validate_slug(&slugify("!!!")).is_err());
        assert!(validate_slug(&slugify("Hey")).is_ok());
    }

    #[test]
    fn content_and_summary_bounds() {
        assert!(validate_content("too short").is_err());
        assert!(validate_content("long enough content").is_ok());
        assert!(validate_content(&"x".repeat(CONTENT_MAX + 1)).is_err());
        assert!(validate_summary(&"s".repeat(99)).is_err());
        assert!(validate_summary(&"s".repeat(100)).is_ok());
        assert!(validate_summary(&"s".repeat(581)).is_err());
        assert!(validate_summary(DEFAULT_SUMMARY).is_ok());
    }

    #[test]
    fn display_name_is_trimmed() {
        assert_eq!(validate_display_name("  Ada  ").unwrap(), "Ada");
        assert!(validate_display_name("   ").is_err());
    }
}
