//! Output file naming.
//!
//! A pattern is a suffix template appended to a file's stem, before its
//! extension. Tokens: `$(YYYY)`, `$(YY)`, `$(MM)`, `$(DD)`, `$(n)` and `$(nn)`,
//! where `n` is the 1-based position of the file within its request. Any other
//! `$(...)` token is kept verbatim.

use regex::{Captures, Regex};
use std::sync::LazyLock;
use time::{Date, OffsetDateTime};

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\(([^()]*)\)").expect("valid token regex"));

/// Pattern plus the date frozen for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingContext {
    pattern: Option<String>,
    date: Date,
}

impl NamingContext {
    pub fn new(pattern: Option<&str>, date: Date) -> Self {
        Self {
            pattern: pattern.filter(|p| !p.is_empty()).map(str::to_string),
            date,
        }
    }

    pub fn today(pattern: Option<&str>) -> Self {
        Self::new(pattern, today())
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub fn date(&self) -> Date {
        self.date
    }

    /// Names a file the request has just produced. Each output goes through
    /// here exactly once, so the suffix is always appended, even when the stem
    /// happens to end with it already (`batch_part1.pdf` + `$(n)` at 1 gives
    /// `batch_part11.pdf`).
    pub fn apply(&self, base_name: &str, index: usize) -> String {
        append_suffix(base_name, self.pattern(), index, self.date)
    }
}

/// Local calendar date, or the UTC one when the local offset is unknown.
pub fn today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

pub fn apply_pattern(base_name: &str, pattern: Option<&str>, index: usize) -> String {
    apply_pattern_on(base_name, pattern, index, today())
}

/// Applies `pattern` to a name that may already carry it: a stem ending with
/// the expanded suffix is left alone, so reapplying to its own output with the
/// same index is a no-op.
pub fn apply_pattern_on(base_name: &str, pattern: Option<&str>, index: usize, date: Date) -> String {
    let Some(pattern) = pattern.filter(|p| !p.is_empty()) else {
        return base_name.to_string();
    };

    let suffix = expand(pattern, index, date);
    let (stem, _) = split_extension(base_name);
    if !suffix.is_empty() && stem.ends_with(&suffix) {
        return base_name.to_string();
    }
    append_suffix(base_name, Some(pattern), index, date)
}

/// Inserts the expanded suffix before the extension, unconditionally.
pub fn append_suffix(base_name: &str, pattern: Option<&str>, index: usize, date: Date) -> String {
    let Some(pattern) = pattern.filter(|p| !p.is_empty()) else {
        return base_name.to_string();
    };
    let suffix = expand(pattern, index, date);
    let (stem, ext) = split_extension(base_name);
    format!("{stem}{suffix}{ext}")
}

/// Substitutes every recognized token of `pattern`.
pub fn expand(pattern: &str, index: usize, date: Date) -> String {
    let year = date.year().to_string();
    TOKEN
        .replace_all(pattern, |caps: &Captures<'_>| match &caps[1] {
            "YYYY" => year.clone(),
            "YY" => year[year.len().saturating_sub(2)..].to_string(),
            "MM" => format!("{:02}", u8::from(date.month())),
            "DD" => format!("{:02}", date.day()),
            "n" => index.to_string(),
            "nn" => format!("{index:02}"),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

/// Splits `name` into stem and extension (with its dot). A leading dot does not
/// start an extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => name.split_at(idx),
        _ => (name, ""),
    }
}
