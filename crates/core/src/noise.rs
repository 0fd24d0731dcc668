use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::line_index::LineIndex;

static DOT_LEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\.{3,}|…+|(?:\.\s){3,}|_{4,})[\.\s]*\(?[0-9ivxlc]{1,6}\)?\s*$")
        .expect("valid regex")
});
static CONTENTS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:table of contents|contents|list of (?:figures|tables))\.?$")
        .expect("valid regex")
});
static TRAILING_PAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^.*[a-z].*\s(\d{1,4})$").expect("valid regex"));
static PAGE_REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,4})\)?\s*$").expect("valid regex"));
static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SuppressedReason {
    TableOfContents,
    RunningHeader,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSettings {
    pub suppress_toc: bool,
    pub suppress_running: bool,
    /// Minimum number of page-reference lines forming a contents run.
    pub toc_min_run: usize,
    /// Non-TOC lines tolerated between two members of one run.
    pub toc_max_gap: usize,
    pub running_band_lines: u32,
    pub running_min_fraction: f32,
    pub running_min_pages: usize,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            suppress_toc: true,
            suppress_running: true,
            toc_min_run: 3,
            toc_max_gap: 2,
            running_band_lines: 5,
            running_min_fraction: 0.5,
            running_min_pages: 3,
        }
    }
}

/// Per-line suppression flags for one document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NoiseProfile {
    reasons: Vec<Option<SuppressedReason>>,
    boilerplate: Vec<String>,
}

impl NoiseProfile {
    pub fn detect(index: &LineIndex, settings: &NoiseSettings) -> Self {
        let mut reasons = vec![None; index.len()];
        if settings.suppress_toc {
            for idx in detect_toc_lines(index, settings) {
                reasons[idx] = Some(SuppressedReason::TableOfContents);
            }
        }
        let mut boilerplate = Vec::new();
        if settings.suppress_running {
            let (lines, keys) = detect_running_lines(index, settings);
            for idx in lines {
                reasons[idx].get_or_insert(SuppressedReason::RunningHeader);
            }
            boilerplate = keys;
        }
        Self {
            reasons,
            boilerplate,
        }
    }

    pub fn reason(&self, global_index: usize) -> Option<SuppressedReason> {
        self.reasons.get(global_index).copied().flatten()
    }

    pub fn is_suppressed(&self, global_index: usize) -> bool {
        self.reason(global_index).is_some()
    }

    pub fn count(&self, reason: SuppressedReason) -> usize {
        self.reasons.iter().filter(|r| **r == Some(reason)).count()
    }

    /// Digit-masked texts recognised as running headers or footers.
    pub fn boilerplate(&self) -> &[String] {
        &self.boilerplate
    }

    pub fn suppressed(&self) -> impl Iterator<Item = (usize, SuppressedReason)> + '_ {
        self.reasons
            .iter()
            .enumerate()
            .filter_map(|(idx, r)| r.map(|reason| (idx, reason)))
    }
}

fn detect_toc_lines(index: &LineIndex, settings: &NoiseSettings) -> Vec<usize> {
    let mut flagged = Vec::new();
    // (global index, page reference) of lines that look like contents entries
    let mut entries: Vec<(usize, Option<u32>)> = Vec::new();
    for line in index.lines() {
        let text = line.normalized_text.as_str();
        if text.is_empty() {
            continue;
        }
        if CONTENTS_RE.is_match(text) || DOT_LEADER_RE.is_match(text) {
            flagged.push(line.global_index);
            entries.push((line.global_index, page_reference(text)));
        } else if let Some(caps) = TRAILING_PAGE_RE.captures(text) {
            let page = caps.get(1).and_then(|m| m.as_str().parse().ok());
            entries.push((line.global_index, page));
        }
    }

    let mut run: Vec<(usize, Option<u32>)> = Vec::new();
    for entry in entries {
        let contiguous = run
            .last()
            .map(|(prev, _)| entry.0 - prev <= settings.toc_max_gap + 1)
            .unwrap_or(true);
        if !contiguous {
            flush_run(&run, settings, &mut flagged);
            run.clear();
        }
        run.push(entry);
    }
    flush_run(&run, settings, &mut flagged);

    flagged.sort_unstable();
    flagged.dedup();
    flagged
}

fn flush_run(run: &[(usize, Option<u32>)], settings: &NoiseSettings, flagged: &mut Vec<usize>) {
    if run.len() < settings.toc_min_run.max(1) {
        return;
    }
    let pages = run.iter().filter_map(|(_, page)| *page).collect::<Vec<_>>();
    if pages.windows(2).all(|w| w[0] <= w[1]) {
        flagged.extend(run.iter().map(|(idx, _)| *idx));
    }
}

fn page_reference(text: &str) -> Option<u32> {
    PAGE_REF_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn detect_running_lines(index: &LineIndex, settings: &NoiseSettings) -> (Vec<usize>, Vec<String>) {
    let page_count = index.pages().len();
    if page_count < settings.running_min_pages.max(2) {
        return (Vec::new(), Vec::new());
    }
    let mut banded: Vec<(usize, String)> = Vec::new();
    let mut pages_by_key: FxHashMap<String, Vec<u32>> = FxHashMap::default();
    for line in index.lines() {
        let page_len = index.page_len(line.page_index);
        let band = settings.running_band_lines;
        let in_band = line.line_in_page < band || line.line_in_page + band >= page_len;
        if !in_band {
            continue;
        }
        let key = band_key(&line.normalized_text);
        if key.is_empty() {
            continue;
        }
        let pages = pages_by_key.entry(key.clone()).or_default();
        if pages.last() != Some(&line.page_index) {
            pages.push(line.page_index);
        }
        banded.push((line.global_index, key));
    }

    let threshold = settings.running_min_fraction.clamp(0.0, 1.0) * page_count as f32;
    let mut keys = pages_by_key
        .into_iter()
        .filter(|(_, pages)| pages.len() >= 2 && pages.len() as f32 >= threshold)
        .map(|(key, _)| key)
        .collect::<Vec<_>>();
    keys.sort();
    let lines = banded
        .into_iter()
        .filter(|(_, key)| keys.binary_search(key).is_ok())
        .map(|(idx, _)| idx)
        .collect();
    (lines, keys)
}

/// Drops a dot leader and trailing page reference from a contents entry.
pub fn strip_page_reference(text: &str) -> &str {
    let text = match DOT_LEADER_RE.find(text) {
        Some(m) => &text[..m.start()],
        None => match TRAILING_PAGE_RE.captures(text).and_then(|caps| caps.get(1)) {
            Some(page) => &text[..page.start()],
            None => text,
        },
    };
    text.trim_end()
}

fn band_key(text: &str) -> String {
    DIGITS_RE.replace_all(text.trim(), "#").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_index::{ParsedLine, ParsedPage};

    fn page(index: u32, lines: &[&str]) -> ParsedPage {
        ParsedPage {
            index,
            lines: lines.iter().map(|l| ParsedLine::from(*l)).collect(),
        }
    }

    #[test]
    fn flags_dot_leaders_and_contents_runs() {
        let index = LineIndex::from_text(
            "doc",
            "Table of Contents\n1 Introduction ........ 3\n2 Scope 5\n3 Quality 9\n4 Testing 12\n\nBody text here",
        );
        let profile = NoiseProfile::detect(&index, &NoiseSettings::default());
        for idx in 0..5 {
            assert_eq!(profile.reason(idx), Some(SuppressedReason::TableOfContents));
        }
        assert_eq!(profile.reason(6), None);
    }

    #[test]
    fn isolated_trailing_number_is_not_toc() {
        let index = LineIndex::from_text("doc", "Pump capacity shall be 40\nOther text\nMore text");
        let profile = NoiseProfile::detect(&index, &NoiseSettings::default());
        assert!(!profile.is_suppressed(0));
    }

    #[test]
    fn decreasing_page_refs_do_not_form_a_run() {
        let index = LineIndex::from_text("doc", "Pipe size 12\nValve size 8\nFlange size 4");
        let profile = NoiseProfile::detect(&index, &NoiseSettings::default());
        assert_eq!(profile.count(SuppressedReason::TableOfContents), 0);
    }

    #[test]
    fn flags_repeated_band_text() {
        let pages = (0..4)
            .map(|p| {
                let mut lines = vec!["ACME Corp Specification"];
                lines.extend(["Body a", "Body b", "Body c", "Body d", "Body e", "Body f"]);
                lines.extend(["Body g", "Body h", "Body i", "Body j", "Body k"]);
                lines.push("Page 1 of 4");
                let mut built = page(p, &lines);
                built.lines[12].text = format!("Page {} of 4", p + 1);
                built
            })
            .collect::<Vec<_>>();
        let index = LineIndex::from_pages("doc", pages);
        let profile = NoiseProfile::detect(&index, &NoiseSettings::default());
        assert_eq!(profile.reason(0), Some(SuppressedReason::RunningHeader));
        assert_eq!(profile.reason(12), Some(SuppressedReason::RunningHeader));
        assert_eq!(profile.reason(6), None);
        assert!(profile
            .boilerplate()
            .contains(&"page # of #".to_string()));
    }

    #[test]
    fn strips_contents_tails() {
        assert_eq!(strip_page_reference("1 introduction ........ 3"), "1 introduction");
        assert_eq!(strip_page_reference("2 scope 5"), "2 scope");
        assert_eq!(strip_page_reference("scope of work"), "scope of work");
    }

    #[test]
    fn disabled_filters_flag_nothing() {
        let index = LineIndex::from_text("doc", "Contents\n1 Intro ....... 2");
        let settings = NoiseSettings {
            suppress_toc: false,
            suppress_running: false,
            ..NoiseSettings::default()
        };
        let profile = NoiseProfile::detect(&index, &settings);
        assert_eq!(profile.suppressed().count(), 0);
    }
}
