use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static LEADING_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\(\[]?((?:\d+(?:[.\-]\d+)*)|(?:[a-z](?:[.\-]\d+)+))[\.\):\]]?$")
        .expect("valid regex")
});
static NUMBER_SEP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-–—]+").expect("valid regex"));
static NUMBER_JUNK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9a-z.]+").expect("valid regex"));
static DOT_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.+").expect("valid regex"));

/// NFKC, control characters removed, whitespace runs collapsed to one space.
pub fn normalize_line(line: &str) -> String {
    let trimmed = line.trim_matches(|c: char| c.is_control() || c.is_whitespace());
    let nfkc = trimmed.nfkc().collect::<String>();
    let mut result = String::with_capacity(nfkc.len());
    let mut prev_space = false;
    for ch in nfkc.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                result.push(' ');
                prev_space = true;
            }
        } else if ch.is_control() {
            continue;
        } else {
            result.push(ch);
            prev_space = false;
        }
    }
    result.trim().to_string()
}

/// Case-folded comparison form used by every matcher.
pub fn comparison_form(line: &str) -> String {
    normalize_line(line).to_lowercase()
}

/// Comparison form with visually confusable numerals canonicalised.
pub fn folded_form(line: &str) -> String {
    comparison_form(&fold_confusables(line))
}

/// Replaces digit lookalikes inside numeric-looking tokens.
///
/// Roman numeral code points always map to their value. `I`, `l` and `|` become `1`
/// when the token already holds a digit (`l.2`), or when it is the leading token and
/// made only of such lookalikes (`II General`). `O`/`o` become `0` only next to real
/// digits (`1O` → `10`).
pub fn fold_confusables(text: &str) -> String {
    let mut expanded = String::with_capacity(text.len());
    for ch in text.chars() {
        match roman_value(ch) {
            Some(value) => expanded.push_str(value),
            None => expanded.push(ch),
        }
    }
    let mut out = String::with_capacity(expanded.len());
    let mut token = String::new();
    let mut leading = true;
    for ch in expanded.chars() {
        if ch.is_whitespace() {
            if !token.is_empty() {
                out.push_str(&fold_token(&token, leading));
                leading = false;
                token.clear();
            }
            out.push(ch);
        } else {
            token.push(ch);
        }
    }
    out.push_str(&fold_token(&token, leading));
    out
}

fn fold_token(token: &str, leading: bool) -> String {
    if token.is_empty() {
        return String::new();
    }
    let has_digit = token.chars().any(|c| c.is_ascii_digit());
    let core = token.trim_matches(|c: char| matches!(c, '(' | ')' | '[' | ']' | ':' | ','));
    let only_lookalikes = leading
        && !core.is_empty()
        && core
            .chars()
            .all(|c| matches!(c, 'I' | 'l' | '|' | '.') || c.is_ascii_digit())
        && core.chars().any(|c| matches!(c, 'I' | 'l' | '|'));
    if !has_digit && !only_lookalikes {
        return token.to_string();
    }
    token
        .chars()
        .map(|c| match c {
            'I' | 'l' | '|' => '1',
            'O' | 'o' if has_digit => '0',
            other => other,
        })
        .collect()
}

fn roman_value(ch: char) -> Option<&'static str> {
    const VALUES: [&str; 12] = ["1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12"];
    match ch {
        '\u{2160}'..='\u{216B}' => Some(VALUES[(ch as u32 - 0x2160) as usize]),
        '\u{2170}'..='\u{217B}' => Some(VALUES[(ch as u32 - 0x2170) as usize]),
        _ => None,
    }
}

/// Splits a leading numbering token (`1.2`, `(3)`, `a.1`) off comparison-form text.
pub fn split_leading_number(text: &str) -> (Option<String>, &str) {
    let trimmed = text.trim_start();
    let (first, rest) = match trimmed.split_once(' ') {
        Some((first, rest)) => (first, rest.trim_start()),
        None => (trimmed, ""),
    };
    match LEADING_NUMBER_RE.captures(first) {
        Some(caps) => {
            let number = caps
                .get(1)
                .and_then(|m| canonical_number(m.as_str()))
                .filter(|n| !n.is_empty());
            match number {
                Some(number) => (Some(number), rest),
                None => (None, trimmed),
            }
        }
        None => (None, trimmed),
    }
}

/// Canonical dotted form of an outline number (`"1-2 "` → `"1.2"`).
pub fn normalize_number(value: &str, confusables: bool) -> Option<String> {
    let text = value.trim();
    if text.is_empty() {
        return None;
    }
    let text = if confusables {
        fold_confusables(text)
    } else {
        text.to_string()
    };
    canonical_number(&text.to_lowercase().replace('·', "."))
}

fn canonical_number(text: &str) -> Option<String> {
    let text = NUMBER_SEP_RE.replace_all(text, ".");
    let text = NUMBER_JUNK_RE.replace_all(&text, ".");
    let text = DOT_RUN_RE.replace_all(&text, ".");
    let text = text.trim_matches('.');
    if text.is_empty() {
        return None;
    }
    let parts = text
        .split('.')
        .map(|part| {
            if part.chars().all(|c| c.is_ascii_digit()) {
                let stripped = part.trim_start_matches('0');
                if stripped.is_empty() {
                    "0".to_string()
                } else {
                    stripped.to_string()
                }
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>();
    Some(parts.join("."))
}
