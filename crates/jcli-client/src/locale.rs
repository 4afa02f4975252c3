//! Locale and character encoding reported to the server.
//!
//! Derived from the POSIX locale variables: `LC_ALL`, then `LC_MESSAGES`,
//! then `LANG`. A value like `de_DE.ISO-8859-1@euro` yields locale
//! `de_DE` and encoding `ISO-8859-1`.

pub const DEFAULT_LOCALE: &str = "en";
pub const DEFAULT_ENCODING: &str = "UTF-8";

const VARIABLES: [&str; 3] = ["LC_ALL", "LC_MESSAGES", "LANG"];

fn posix_locale(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    VARIABLES
        .iter()
        .filter_map(|name| lookup(name))
        .find(|v| !v.is_empty())
        .filter(|v| v != "C" && v != "POSIX")
}

pub fn locale_from(lookup: impl Fn(&str) -> Option<String>) -> String {
    posix_locale(lookup)
        .map(|v| {
            let v = v.split('@').next().unwrap_or_default();
            v.split('.').next().unwrap_or_default().to_string()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
}

pub fn encoding_from(lookup: impl Fn(&str) -> Option<String>) -> String {
    let codeset = posix_locale(lookup).and_then(|v| {
        let v = v.split('@').next().unwrap_or_default().to_string();
        v.split_once('.').map(|(_, c)| c.to_string())
    });
    match codeset {
        Some(c) if c.eq_ignore_ascii_case("utf8") || c.eq_ignore_ascii_case("utf-8") => {
            DEFAULT_ENCODING.to_string()
        }
        Some(c) if !c.is_empty() => c,
        _ => DEFAULT_ENCODING.to_string(),
    }
}

pub fn current_locale() -> String {
    locale_from(|k| std::env::var(k).ok())
}

pub fn current_encoding() -> String {
    encoding_from(|k| std::env::var(k).ok())
}
