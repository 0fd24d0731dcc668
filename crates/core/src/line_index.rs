use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::noise::{NoiseProfile, NoiseSettings};
use crate::normalization::{comparison_form, folded_form};

/// One addressable line of the parsed document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Line {
    pub global_index: usize,
    pub page_index: u32,
    pub line_in_page: u32,
    pub raw_text: String,
    pub normalized_text: String,
    pub folded_text: String,
    #[serde(default)]
    pub font_size: Option<f32>,
    #[serde(default)]
    pub vertical_pos: Option<f32>,
}

impl Line {
    /// Comparison text, with or without confusable folding.
    pub fn compare_text(&self, confusables: bool) -> &str {
        if confusables {
            &self.folded_text
        } else {
            &self.normalized_text
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedLine {
    pub text: String,
    #[serde(default)]
    pub font_size: Option<f32>,
    #[serde(default)]
    pub vertical_pos: Option<f32>,
}

impl From<&str> for ParsedLine {
    fn from(text: &str) -> Self {
        Self {
            text: text.to_string(),
            font_size: None,
            vertical_pos: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedPage {
    pub index: u32,
    pub lines: Vec<ParsedLine>,
}

/// Flat line record as produced by the page parser (`global_idx` may have gaps).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineRecord {
    pub text: String,
    pub page: u32,
    #[serde(default)]
    pub line_idx: Option<u32>,
    #[serde(default)]
    pub global_idx: Option<u64>,
    #[serde(default)]
    pub font_size: Option<f32>,
    #[serde(default)]
    pub vertical_pos: Option<f32>,
}

/// Immutable, globally indexed view over a parsed document.
#[derive(Debug)]
pub struct LineIndex {
    doc_id: String,
    lines: Vec<Line>,
    page_lengths: Vec<(u32, u32)>,
    noise: OnceCell<(NoiseSettings, Arc<NoiseProfile>)>,
}

impl LineIndex {
    pub fn from_pages(doc_id: impl Into<String>, pages: Vec<ParsedPage>) -> Self {
        let mut lines = Vec::new();
        let mut page_lengths = Vec::with_capacity(pages.len());
        for page in pages {
            page_lengths.push((page.index, clamp_usize_to_u32(page.lines.len())));
            for (line_in_page, parsed) in page.lines.into_iter().enumerate() {
                let normalized_text = comparison_form(&parsed.text);
                let folded_text = folded_form(&parsed.text);
                lines.push(Line {
                    global_index: lines.len(),
                    page_index: page.index,
                    line_in_page: clamp_usize_to_u32(line_in_page),
                    raw_text: parsed.text,
                    normalized_text,
                    folded_text,
                    font_size: parsed.font_size,
                    vertical_pos: parsed.vertical_pos,
                });
            }
        }
        Self {
            doc_id: doc_id.into(),
            lines,
            page_lengths,
            noise: OnceCell::new(),
        }
    }

    /// Plain text with form feeds separating pages.
    pub fn from_text(doc_id: impl Into<String>, text: &str) -> Self {
        let pages = text
            .split('\u{c}')
            .enumerate()
            .map(|(idx, chunk)| ParsedPage {
                index: idx as u32,
                lines: chunk.lines().map(ParsedLine::from).collect(),
            })
            .collect();
        Self::from_pages(doc_id, pages)
    }

    /// Re-indexes flat parser records contiguously, keeping their reading order.
    pub fn from_records(doc_id: impl Into<String>, mut records: Vec<LineRecord>) -> Self {
        records.sort_by_key(|r| (r.global_idx.unwrap_or(u64::MAX), r.page, r.line_idx));
        let mut pages: Vec<ParsedPage> = Vec::new();
        for record in records {
            let line = ParsedLine {
                text: record.text,
                font_size: record.font_size,
                vertical_pos: record.vertical_pos,
            };
            match pages.last_mut() {
                Some(page) if page.index == record.page => page.lines.push(line),
                _ => pages.push(ParsedPage {
                    index: record.page,
                    lines: vec![line],
                }),
            }
        }
        Self::from_pages(doc_id, pages)
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn get(&self, global_index: usize) -> Option<&Line> {
        self.lines.get(global_index)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn last_index(&self) -> Option<usize> {
        self.lines.len().checked_sub(1)
    }

    /// `(page_index, line_count)` in reading order.
    pub fn pages(&self) -> &[(u32, u32)] {
        &self.page_lengths
    }

    pub fn page_of(&self, global_index: usize) -> Option<u32> {
        self.lines.get(global_index).map(|l| l.page_index)
    }

    pub fn page_len(&self, page_index: u32) -> u32 {
        self.page_lengths
            .iter()
            .find(|(idx, _)| *idx == page_index)
            .map(|(_, len)| *len)
            .unwrap_or(0)
    }

    /// Noise profile for `settings`, computed once per index.
    ///
    /// Returns `false` in the second slot when the cached profile was built with
    /// different settings and a fresh, uncached profile had to be computed.
    pub fn noise_profile(&self, settings: &NoiseSettings) -> (Arc<NoiseProfile>, bool) {
        let (cached_settings, cached) = self
            .noise
            .get_or_init(|| (settings.clone(), Arc::new(NoiseProfile::detect(self, settings))));
        if cached_settings == settings {
            (Arc::clone(cached), true)
        } else {
            (Arc::new(NoiseProfile::detect(self, settings)), false)
        }
    }

    /// Raw text of `global_index` and up to `extra` following lines.
    pub fn context(&self, global_index: usize, extra: usize) -> String {
        let end = (global_index + extra + 1).min(self.lines.len());
        self.lines
            .get(global_index..end)
            .unwrap_or_default()
            .iter()
            .map(|l| l.raw_text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn clamp_usize_to_u32(value: usize) -> u32 {
    value.min(u32::MAX as usize) as u32
}
