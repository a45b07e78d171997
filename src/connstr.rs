//! Connection string parsing and canonical re-serialization.

use bitflags::bitflags;

use crate::error::{DriverError, Result};

pub const DEFAULT_PORT: u16 = 3306;

/// Keys written back by `SQLDriverConnect`, in this order.
const OUTPUT_KEYS: [&str; 7] = ["DSN", "UID", "PWD", "DATABASE", "SOCKET", "PORT", "CHARSET"];

bitflags! {
    /// Client behaviour bits carried by the `OPTION` key.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptionFlags: u32 {
        const FOUND_ROWS = 1 << 1;
        const DYNAMIC_CURSOR = 1 << 5;
        const NO_CACHE = 1 << 20;
        const FORWARD_CURSOR = 1 << 21;
        const MULTI_STATEMENTS = 1 << 26;

        const _ = !0;
    }
}

/// Normalized `KEY=VALUE` pairs. Keys are upper-cased with aliases folded,
/// values keep their original text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionAttributes {
    pairs: Vec<(String, String)>,
}

fn canonical_key(key: &str) -> String {
    let upper = key.trim().to_ascii_uppercase();
    match upper.as_str() {
        "PASSWORD" => "PWD".to_string(),
        "CURRENT_CATALOG" => "DATABASE".to_string(),
        _ => upper,
    }
}

impl ConnectionAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let key = canonical_key(key);
        self.pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Inserts or replaces; a replaced key keeps its original position.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let key = canonical_key(key);
        let value = value.into();
        match self.pairs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.pairs.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let key = canonical_key(key);
        let idx = self.pairs.iter().position(|(k, _)| *k == key)?;
        Some(self.pairs.remove(idx).1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Fills in keys this mapping does not have from DSN-stored defaults.
    pub fn merge_defaults(&mut self, defaults: &ConnectionAttributes) {
        for (key, value) in defaults.iter() {
            if !self.contains(key) {
                self.pairs.push((key.to_string(), value.to_string()));
            }
        }
    }

    pub fn option_flags(&self) -> OptionFlags {
        self.get("OPTION")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .map(OptionFlags::from_bits_retain)
            .unwrap_or_default()
    }

    pub fn port(&self) -> Result<u16> {
        match self.get("PORT") {
            None => Ok(DEFAULT_PORT),
            Some(v) if v.trim().is_empty() => Ok(DEFAULT_PORT),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| DriverError::InvalidAttributeValue(format!("PORT={v}"))),
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(
            self.get(key).map(|v| v.trim().to_ascii_lowercase()).as_deref(),
            Some("1" | "yes" | "true" | "on")
        )
    }

    /// `DSN;UID;[PWD;]DATABASE;[SOCKET;]PORT;CHARSET`, skipping absent keys.
    pub fn to_output_string(&self) -> String {
        let mut out = String::new();
        for key in OUTPUT_KEYS {
            let Some(value) = self.get(key) else { continue };
            if key == "PWD" && value.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push(';');
            }
            out.push_str(key);
            out.push('=');
            out.push_str(&quote_value(value));
        }
        out
    }
}

fn quote_value(value: &str) -> String {
    // A leading quote would be read back as a quoted value.
    let needs_braces = value.contains([';', '{', '}', '='])
        || value.starts_with('\'')
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace);
    if needs_braces {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}

/// Splits `KEY=VALUE;...` into normalized attributes.
///
/// Only an unterminated `{...}` or `'...'` value is an error; segments
/// without `=` and empty keys are skipped.
pub fn parse(raw: &str) -> Result<ConnectionAttributes> {
    let mut attrs = ConnectionAttributes::new();
    let mut chars = raw.chars().peekable();

    loop {
        let mut key = String::new();
        let mut saw_eq = false;
        while let Some(c) = chars.next() {
            match c {
                '=' => {
                    saw_eq = true;
                    break;
                }
                ';' => break,
                _ => key.push(c),
            }
        }
        if !saw_eq {
            if chars.peek().is_none() {
                break;
            }
            continue;
        }

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let value = match chars.peek() {
            Some('{') => {
                chars.next();
                let value = read_delimited(&mut chars, '}').ok_or_else(|| {
                    DriverError::MalformedConnectionString(format!(
                        "unbalanced brace in value of {}",
                        key.trim()
                    ))
                })?;
                skip_to_separator(&mut chars);
                value
            }
            Some('\'') => {
                chars.next();
                let value = read_delimited(&mut chars, '\'').ok_or_else(|| {
                    DriverError::MalformedConnectionString(format!(
                        "unbalanced quote in value of {}",
                        key.trim()
                    ))
                })?;
                skip_to_separator(&mut chars);
                value
            }
            _ => {
                let mut value = String::new();
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                    value.push(c);
                }
                value.trim().to_string()
            }
        };

        if !key.trim().is_empty() {
            attrs.set(&key, value);
        }
        if chars.peek().is_none() {
            break;
        }
    }

    Ok(attrs)
}

/// Reads up to the closing delimiter; a doubled delimiter is a literal one.
fn read_delimited(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    close: char,
) -> Option<String> {
    let mut value = String::new();
    while let Some(c) = chars.next() {
        if c == close {
            if chars.peek() == Some(&close) {
                chars.next();
                value.push(close);
                continue;
            }
            return Some(value);
        }
        value.push(c);
    }
    None
}

fn skip_to_separator(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    let mut dropped = String::new();
    for c in chars.by_ref() {
        if c == ';' {
            break;
        }
        if !c.is_whitespace() {
            dropped.push(c);
        }
    }
    if !dropped.is_empty() {
        tracing::warn!(dropped = %dropped, "ignoring text after quoted connection string value");
    }
}

/// Result of copying the output connection string into a caller buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputWrite {
    pub required_len: usize,
    pub truncated: bool,
}

pub unsafe fn write_output(
    out: &str,
    dst: *mut u8,
    capacity: usize,
) -> OutputWrite {
    let truncated = crate::buffer::write_bytes(out.as_bytes(), dst, capacity);
    OutputWrite {
        required_len: out.len(),
        truncated,
    }
}
