//! Printed page numbers: arabic vs roman, decided deterministically.
//!
//! The extractor model reports whatever page number it can read, as a JSON
//! integer, a string or `null`. This module turns that into a
//! [`PageNumber`] or `None` with one fixed rule:
//!
//! 1. `null` → `None`.
//! 2. Integer ≥ 1 → `Arabic(n)`; integer ≤ 0 → `None`.
//! 3. String, trimmed:
//!    - empty → `None`
//!    - only ASCII digits, value ≥ 1 → `Arabic(n)`
//!    - a canonical roman numeral written in a single case (`xiv`, `XIV`,
//!      value 1–3999) → `Roman`
//!    - anything else → `None`
//!
//! Digit strings can never be roman, so the only real ambiguity is a run of
//! `ivxlcdm` letters. Those count as roman only in canonical form
//! (`iv`, not `iiii`); everything else yields `None` rather than a guess.
//! Any other JSON type (float, bool, array, object) is not a page number at
//! all and is rejected by the caller as a schema violation.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A printed page number as it appears on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageNumber {
    Arabic(u32),
    /// `label` is always lowercase.
    Roman { label: String, value: u32 },
}

impl PageNumber {
    /// Parse a canonical roman numeral (single case, 1–3999).
    pub fn roman(s: &str) -> Option<Self> {
        static RE_ROMAN: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^(?:[ivxlcdm]+|[IVXLCDM]+)$").unwrap());

        if !RE_ROMAN.is_match(s) {
            return None;
        }
        let label = s.to_ascii_lowercase();
        let value = roman_value(&label)?;
        // Canonical form only: the value must render back to the same letters.
        (to_roman(value) == label).then_some(PageNumber::Roman { label, value })
    }

    /// The label written to the export (`"12"`, `"xiv"`).
    pub fn label(&self) -> String {
        match self {
            PageNumber::Arabic(n) => n.to_string(),
            PageNumber::Roman { label, .. } => label.clone(),
        }
    }

    /// Numeric value regardless of numbering system.
    pub fn value(&self) -> u32 {
        match self {
            PageNumber::Arabic(n) => *n,
            PageNumber::Roman { value, .. } => *value,
        }
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Outcome of reading the `page_number` field of a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageNumberField {
    /// A well-typed value: a page number, or `None` when unreadable.
    Value(Option<PageNumber>),
    /// Not a number, string or null.
    WrongType,
}

/// Apply the page-number rule to a raw JSON value.
pub fn interpret(value: &Value) -> PageNumberField {
    match value {
        Value::Null => PageNumberField::Value(None),
        Value::Number(n) => match (n.as_u64(), n.as_i64()) {
            (Some(u), _) if u >= 1 => {
                PageNumberField::Value(u32::try_from(u).ok().map(PageNumber::Arabic))
            }
            (Some(_), _) | (None, Some(_)) => PageNumberField::Value(None),
            // Floats are not page numbers.
            (None, None) => PageNumberField::WrongType,
        },
        Value::String(s) => PageNumberField::Value(interpret_str(s)),
        _ => PageNumberField::WrongType,
    }
}

/// Apply the string branch of the rule.
pub fn interpret_str(raw: &str) -> Option<PageNumber> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse::<u32>()
            .ok()
            .filter(|&n| n >= 1)
            .map(PageNumber::Arabic);
    }
    PageNumber::roman(s)
}

fn roman_value(s: &str) -> Option<u32> {
    let digit = |c: char| match c {
        'i' => Some(1),
        'v' => Some(5),
        'x' => Some(10),
        'l' => Some(50),
        'c' => Some(100),
        'd' => Some(500),
        'm' => Some(1000),
        _ => None,
    };

    let values: Vec<i64> = s.chars().map(digit).collect::<Option<_>>()?;
    // A letter smaller than its right neighbour is subtracted ("iv" = 5 - 1).
    let mut total = 0i64;
    for (i, &v) in values.iter().enumerate() {
        match values.get(i + 1) {
            Some(&next) if next > v => total -= v,
            _ => total += v,
        }
    }
    u32::try_from(total).ok().filter(|&n| (1..=3999).contains(&n))
}

fn to_roman(mut n: u32) -> String {
    const TABLE: [(u32, &str); 13] = [
        (1000, "m"),
        (900, "cm"),
        (500, "d"),
        (400, "cd"),
        (100, "c"),
        (90, "xc"),
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];

    let mut out = String::new();
    for (value, letters) in TABLE {
        while n >= value {
            out.push_str(letters);
            n -= value;
        }
    }
    out
}
