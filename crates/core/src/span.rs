use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::config::SpanMode;
use crate::line_index::LineIndex;
use crate::outline::PreparedHeader;
use crate::resolver::{Anchor, ResolutionMethod};
use crate::trace::{TraceEventKind, TraceSink};

/// Line span of one outline entry. Span fields are `None` for fallbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub section_key: String,
    pub header_order: usize,
    pub title: String,
    pub number: Option<String>,
    pub level: u32,
    pub parent_key: Option<String>,
    pub start_global_idx: Option<usize>,
    pub end_global_idx: Option<usize>,
    pub start_page: Option<u32>,
    pub end_page: Option<u32>,
    pub resolution_method: ResolutionMethod,
    pub confidence: f32,
    /// Set when a reanchor conflict touched this entry.
    pub low_confidence: bool,
}

impl Section {
    pub fn is_located(&self) -> bool {
        self.start_global_idx.is_some()
    }

    pub fn contains(&self, other: &Section) -> bool {
        match (
            self.start_global_idx,
            self.end_global_idx,
            other.start_global_idx,
            other.end_global_idx,
        ) {
            (Some(s), Some(e), Some(os), Some(oe)) => s <= os && oe <= e,
            _ => false,
        }
    }
}

/// `(start, end)` per entry, inclusive; `None` for unresolved entries.
pub fn span_bounds(
    headers: &[PreparedHeader],
    anchors: &[Anchor],
    last_line: usize,
    mode: SpanMode,
) -> Vec<Option<(usize, usize)>> {
    anchors
        .iter()
        .enumerate()
        .map(|(pos, anchor)| {
            let start = anchor.global_index?;
            let level = headers.get(pos).map_or(u32::MAX, |h| h.level);
            let next = anchors
                .iter()
                .zip(headers)
                .skip(pos + 1)
                .filter(|(_, header)| mode == SpanMode::Flat || header.level <= level)
                .find_map(|(a, _)| a.global_index.filter(|idx| *idx > start));
            let end = next.map_or(last_line, |idx| idx - 1).max(start);
            Some((start, end))
        })
        .collect()
}

/// Turns anchors into section records in outline order.
pub fn build_sections(
    headers: &[PreparedHeader],
    anchors: &[Anchor],
    index: &LineIndex,
    mode: SpanMode,
    conflicted_orders: &BTreeSet<usize>,
    sink: &mut dyn TraceSink,
) -> Vec<Section> {
    let bounds = match index.last_index() {
        Some(last_line) => span_bounds(headers, anchors, last_line, mode),
        None => vec![None; anchors.len()],
    };
    let keys = section_keys(headers);
    let mut sections = Vec::with_capacity(headers.len());
    for (pos, (header, anchor)) in headers.iter().zip(anchors).enumerate() {
        let span = bounds.get(pos).copied().flatten();
        let parent_key = headers[..pos]
            .iter()
            .rposition(|h| h.level < header.level)
            .map(|p| keys[p].clone());
        let section = Section {
            section_key: keys[pos].clone(),
            header_order: header.order,
            title: header.text.clone(),
            number: header.number.clone(),
            level: header.level,
            parent_key,
            start_global_idx: span.map(|(s, _)| s),
            end_global_idx: span.map(|(_, e)| e),
            start_page: span.and_then(|(s, _)| index.page_of(s)),
            end_page: span.and_then(|(_, e)| index.page_of(e)),
            resolution_method: anchor.resolution_method,
            confidence: anchor.confidence,
            low_confidence: conflicted_orders.contains(&header.order),
        };
        sink.record(TraceEventKind::SectionBuilt {
            section_key: section.section_key.clone(),
            start: section.start_global_idx,
            end: section.end_global_idx,
        });
        sections.push(section);
    }
    sections
}

/// `number:order` or `_:order`, suffixed `~n` on repeats.
fn section_keys(headers: &[PreparedHeader]) -> Vec<String> {
    let mut seen: FxHashMap<String, usize> = FxHashMap::default();
    headers
        .iter()
        .map(|header| {
            let base = format!("{}:{}", header.number.as_deref().unwrap_or("_"), header.order);
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{base}~{count}")
            }
        })
        .collect()
}
