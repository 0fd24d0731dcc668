#![allow(dead_code)]

use secmap_core::{HeaderDescriptor, LineIndex, ParsedLine, ParsedPage};

const DIGITS: [&str; 10] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
];

/// Body text that never resembles a heading and never repeats.
pub fn filler(i: usize) -> String {
    let spelled = i
        .to_string()
        .bytes()
        .map(|b| DIGITS[(b - b'0') as usize])
        .collect::<Vec<_>>()
        .join(" ");
    format!("the contractor shall provide item {spelled} as directed")
}

/// Pages as `(page_index, first_global, last_global)`; `overrides` replaces filler lines.
pub fn document(pages: &[(u32, usize, usize)], overrides: &[(usize, &str)]) -> LineIndex {
    let parsed = pages
        .iter()
        .map(|(index, first, last)| ParsedPage {
            index: *index,
            lines: (*first..=*last)
                .map(|global| {
                    let text = overrides
                        .iter()
                        .find(|(at, _)| *at == global)
                        .map(|(_, text)| text.to_string())
                        .unwrap_or_else(|| filler(global));
                    ParsedLine::from(text.as_str())
                })
                .collect(),
        })
        .collect();
    LineIndex::from_pages("doc", parsed)
}

pub fn header(order: usize, text: &str, number: Option<&str>, level: i64) -> HeaderDescriptor {
    HeaderDescriptor::new(order, text, number, level)
}
