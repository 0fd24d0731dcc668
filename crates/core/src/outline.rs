use serde::{Deserialize, Serialize};

use crate::normalization::{comparison_form, folded_form, normalize_number, split_leading_number};

/// One entry of the upstream outline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderDescriptor {
    #[serde(default)]
    pub order: usize,
    #[serde(default, alias = "title")]
    pub text: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default = "default_level")]
    pub level: i64,
}

fn default_level() -> i64 {
    1
}

impl HeaderDescriptor {
    pub fn new(order: usize, text: impl Into<String>, number: Option<&str>, level: i64) -> Self {
        Self {
            order,
            text: text.into(),
            number: number.map(str::to_string),
            level,
        }
    }

    /// Reason this entry cannot be located, if any.
    pub fn invalid_reason(&self) -> Option<&'static str> {
        if self.text.trim().is_empty() {
            Some("missing_text")
        } else if self.level < 1 {
            Some("non_positive_level")
        } else {
            None
        }
    }

    /// `"1.1 Scope of Work"` style label used in traces and embeddings.
    pub fn label(&self) -> String {
        match self.number.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(number) if !self.text.trim_start().starts_with(number) => {
                format!("{} {}", number, self.text.trim())
            }
            _ => self.text.trim().to_string(),
        }
    }
}

/// Comparison-ready view of a valid descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedHeader {
    pub order: usize,
    pub level: u32,
    pub label: String,
    /// Outline text as given, trimmed.
    pub text: String,
    /// Title in comparison form with any numbering the upstream left in it removed.
    pub title: String,
    pub number: Option<String>,
}

impl PreparedHeader {
    pub fn prepare(descriptor: &HeaderDescriptor, confusables: bool) -> Option<Self> {
        if descriptor.invalid_reason().is_some() {
            return None;
        }
        let compare = if confusables {
            folded_form(&descriptor.text)
        } else {
            comparison_form(&descriptor.text)
        };
        let (embedded_number, rest) = split_leading_number(&compare);
        let number = descriptor
            .number
            .as_deref()
            .and_then(|n| normalize_number(n, confusables))
            .or(embedded_number);
        let title = if rest.is_empty() { compare.clone() } else { rest.to_string() };
        Some(Self {
            order: descriptor.order,
            level: descriptor.level.clamp(1, u32::MAX as i64) as u32,
            label: descriptor.label(),
            text: descriptor.text.trim().to_string(),
            title,
            number,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    Numeric,
    Alpha,
}

/// One piece of a dotted outline number (`"A"`, `"3"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberComponent {
    pub raw: String,
    pub kind: ComponentKind,
    pub value: u32,
}

impl NumberComponent {
    pub fn numeric(value: u32, width: usize) -> Self {
        Self {
            raw: format!("{value:0width$}"),
            kind: ComponentKind::Numeric,
            value,
        }
    }

    pub fn alpha(value: u32, lowercase: bool) -> Self {
        let letters = int_to_alpha(value);
        Self {
            raw: if lowercase { letters.to_lowercase() } else { letters },
            kind: ComponentKind::Alpha,
            value,
        }
    }

    pub fn normalized(&self) -> String {
        match self.kind {
            ComponentKind::Numeric => self.value.to_string(),
            ComponentKind::Alpha => int_to_alpha(self.value),
        }
    }
}

/// Splits `"A.3"`, `"2.1.4"`, `"IV-2"` into alpha/numeric components.
pub fn number_components(number: &str) -> Vec<NumberComponent> {
    let mut components = Vec::new();
    let mut current = String::new();
    let flush = |current: &mut String, components: &mut Vec<NumberComponent>| {
        if current.is_empty() {
            return;
        }
        let component = if current.chars().all(|c| c.is_ascii_digit()) {
            NumberComponent {
                raw: current.clone(),
                kind: ComponentKind::Numeric,
                value: current.parse().unwrap_or(u32::MAX),
            }
        } else {
            NumberComponent {
                raw: current.clone(),
                kind: ComponentKind::Alpha,
                value: alpha_to_int(current),
            }
        };
        components.push(component);
        current.clear();
    };
    for ch in number.chars() {
        let same_class = current
            .chars()
            .last()
            .map(|prev| prev.is_ascii_digit() == ch.is_ascii_digit())
            .unwrap_or(true);
        if ch.is_ascii_alphanumeric() && same_class {
            current.push(ch);
        } else {
            flush(&mut current, &mut components);
            if ch.is_ascii_alphanumeric() {
                current.push(ch);
            }
        }
    }
    flush(&mut current, &mut components);
    components
}

pub fn alpha_to_int(value: &str) -> u32 {
    value
        .chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(char::is_ascii_uppercase)
        .fold(0u32, |total, c| {
            total.saturating_mul(26).saturating_add(c as u32 - 'A' as u32 + 1)
        })
}

pub fn int_to_alpha(value: u32) -> String {
    if value == 0 {
        return "A".to_string();
    }
    let mut chars = Vec::new();
    let mut remaining = value;
    while remaining > 0 {
        remaining -= 1;
        chars.push((b'A' + (remaining % 26) as u8) as char);
        remaining /= 26;
    }
    chars.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_malformed_entries() {
        assert_eq!(
            HeaderDescriptor::new(0, "  ", None, 1).invalid_reason(),
            Some("missing_text")
        );
        assert_eq!(
            HeaderDescriptor::new(0, "Scope", None, 0).invalid_reason(),
            Some("non_positive_level")
        );
        assert_eq!(HeaderDescriptor::new(0, "Scope", None, 2).invalid_reason(), None);
    }

    #[test]
    fn deserializes_title_alias_and_missing_level() {
        let parsed: HeaderDescriptor =
            serde_json::from_str(r#"{"order": 3, "title": "Purpose", "number": "1.2"}"#).unwrap();
        assert_eq!(parsed.text, "Purpose");
        assert_eq!(parsed.level, 1);
        assert_eq!(parsed.label(), "1.2 Purpose");
    }

    #[test]
    fn prepared_header_strips_embedded_number() {
        let descriptor = HeaderDescriptor::new(1, "1.1 Scope of Work", None, 2);
        let prepared = PreparedHeader::prepare(&descriptor, true).unwrap();
        assert_eq!(prepared.title, "scope of work");
        assert_eq!(prepared.number.as_deref(), Some("1.1"));
        assert_eq!(prepared.label, "1.1 Scope of Work");
    }

    #[test]
    fn splits_number_components() {
        let parts = number_components("A.3");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].kind, ComponentKind::Alpha);
        assert_eq!(parts[0].value, 1);
        assert_eq!(parts[1].value, 3);
        assert_eq!(number_components("2.1.04").last().unwrap().raw, "04");
        assert!(number_components("").is_empty());
    }

    #[test]
    fn alpha_roundtrip_matches_spreadsheet_columns() {
        assert_eq!(int_to_alpha(1), "A");
        assert_eq!(int_to_alpha(27), "AA");
        assert_eq!(alpha_to_int("ab"), 28);
    }
}
