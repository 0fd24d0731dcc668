use std::collections::BTreeSet;

use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::config::{LocatorConfig, SpanMode};
use crate::line_index::LineIndex;
use crate::noise::NoiseProfile;
use crate::normalization::{comparison_form, fold_confusables, normalize_line};
use crate::outline::{number_components, ComponentKind, NumberComponent, PreparedHeader};
use crate::resolver::{Anchor, ResolutionMethod};
use crate::span::span_bounds;
use crate::trace::{TraceEventKind, TraceSink};

/// Larger jumps are treated as renumbering, not as missing headers.
const MAX_MISSING_PER_JUMP: u32 = 10;

/// A sibling number absent from the outline (`3.2` between `3.1` and `3.3`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberingGap {
    /// Position of the preceding sibling in the outline.
    pub after: usize,
    pub components: Vec<NumberComponent>,
    pub level: u32,
}

impl NumberingGap {
    pub fn number(&self) -> String {
        self.components
            .iter()
            .map(NumberComponent::normalized)
            .collect::<Vec<_>>()
            .join(".")
            .to_lowercase()
    }
}

type SiblingKey = (Vec<(ComponentKind, u32)>, ComponentKind);

/// Missing sibling numbers, in outline order.
pub fn identify_gaps(headers: &[PreparedHeader]) -> Vec<NumberingGap> {
    let mut gaps = Vec::new();
    let mut expected: FxHashMap<SiblingKey, u32> = FxHashMap::default();
    let mut last_seen: FxHashMap<SiblingKey, usize> = FxHashMap::default();
    for (pos, header) in headers.iter().enumerate() {
        let Some(number) = header.number.as_deref() else {
            continue;
        };
        let components = number_components(number);
        let Some((last, prefix)) = components.split_last() else {
            continue;
        };
        let key: SiblingKey = (
            prefix.iter().map(|c| (c.kind, c.value)).collect(),
            last.kind,
        );
        if let (Some(&want), Some(&after)) = (expected.get(&key), last_seen.get(&key)) {
            if last.value > want && last.value - want <= MAX_MISSING_PER_JUMP {
                let level = headers[after].level;
                for missing in want..last.value {
                    let mut built = prefix.to_vec();
                    built.push(match last.kind {
                        ComponentKind::Numeric => NumberComponent::numeric(missing, 0),
                        ComponentKind::Alpha => NumberComponent::alpha(missing, false),
                    });
                    gaps.push(NumberingGap {
                        after,
                        components: built,
                        level,
                    });
                }
            }
        }
        expected.insert(key.clone(), last.value.saturating_add(1));
        last_seen.insert(key, pos);
    }
    gaps
}

/// Pattern for a line starting with the given numbering, zero padding and loose
/// separators allowed (`3.2`, `03-2`, `(3.2)`).
pub fn numbering_pattern(components: &[NumberComponent]) -> Option<Regex> {
    if components.is_empty() {
        return None;
    }
    let joined = components
        .iter()
        .map(|c| match c.kind {
            ComponentKind::Numeric => format!("0*{}", c.value),
            ComponentKind::Alpha => regex::escape(&c.raw),
        })
        .collect::<Vec<_>>()
        .join(r"[\s.\-)(]+");
    Regex::new(&format!(r"(?i)^[\(\[]?\s*{joined}(?:\b|[.)\-\s:])")).ok()
}

/// First unclaimed line in `start..=end` that opens with the numbering.
fn find_numbered_line(
    index: &LineIndex,
    profile: &NoiseProfile,
    start: usize,
    end: usize,
    pattern: &Regex,
    confusables: bool,
    taken: &BTreeSet<usize>,
) -> Option<(usize, String)> {
    (start..=end.min(index.len().saturating_sub(1)))
        .filter(|idx| !taken.contains(idx) && !profile.is_suppressed(*idx))
        .filter_map(|idx| index.get(idx))
        .find_map(|line| {
            let text = if confusables {
                normalize_line(&fold_confusables(&line.raw_text))
            } else {
                normalize_line(&line.raw_text)
            };
            let found = pattern.find(&text)?;
            let rest = text[found.end()..]
                .trim_start_matches(|c: char| matches!(c, ' ' | '-' | '.' | ')' | ':' | '\t'));
            let starts_with_digit = rest.chars().next().is_some_and(|c| c.is_ascii_digit());
            if starts_with_digit || !rest.chars().any(char::is_alphabetic) {
                return None;
            }
            Some((line.global_index, rest.to_string()))
        })
}

/// Inserts anchors for numbering gaps found inside the preceding sibling's span.
///
/// Repeats until a pass inserts nothing. Returns the number of inserted entries.
pub fn fill_gaps(
    headers: &mut Vec<PreparedHeader>,
    anchors: &mut Vec<Anchor>,
    index: &LineIndex,
    profile: &NoiseProfile,
    config: &LocatorConfig,
    sink: &mut dyn TraceSink,
) -> usize {
    let Some(last_line) = index.last_index() else {
        return 0;
    };
    let mut next_order = headers.iter().map(|h| h.order + 1).max().unwrap_or(0);
    let mut inserted = 0;
    loop {
        let gaps = identify_gaps(headers);
        if gaps.is_empty() {
            break;
        }
        let bounds = span_bounds(headers, anchors, last_line, SpanMode::Nested);
        let taken = anchors
            .iter()
            .filter_map(|a| a.global_index)
            .collect::<BTreeSet<_>>();
        let found = gaps.iter().find_map(|gap| {
            let (start, end) = bounds.get(gap.after).copied().flatten()?;
            let pattern = numbering_pattern(&gap.components)?;
            let (line, title) = find_numbered_line(
                index,
                profile,
                start + 1,
                end,
                &pattern,
                config.normalize_confusables,
                &taken,
            )?;
            Some((gap, line, title))
        });

        let Some((gap, line, title)) = found else {
            for gap in &gaps {
                warn!(number = %gap.number(), "numbering gap left unresolved");
                sink.record(TraceEventKind::FallbackTriggered {
                    header_order: None,
                    number: Some(gap.number()),
                    reason: "unresolved_gap".to_string(),
                    method: ResolutionMethod::GapFill,
                    retries: 0,
                });
            }
            break;
        };

        let number = gap.number();
        debug!(number = %number, line, "filled numbering gap");
        sink.record(TraceEventKind::AnchorResolved {
            header_order: next_order,
            global_index: line,
            page: index.page_of(line).unwrap_or_default(),
            confidence: 1.0,
            method: ResolutionMethod::GapFill,
            retries: 0,
        });
        let position = (gap.after..anchors.len())
            .rev()
            .find(|&p| anchors[p].global_index.is_some_and(|idx| idx < line))
            .map_or(gap.after + 1, |p| p + 1);
        headers.insert(
            position,
            PreparedHeader {
                order: next_order,
                level: gap.level,
                label: format!("{number} {title}"),
                text: title.clone(),
                title: comparison_form(&title),
                number: Some(number),
            },
        );
        anchors.insert(
            position,
            Anchor {
                header_order: next_order,
                global_index: Some(line),
                confidence: 1.0,
                resolution_method: ResolutionMethod::GapFill,
                retries: 0,
            },
        );
        next_order += 1;
        inserted += 1;
    }
    inserted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::HeaderDescriptor;
    use crate::trace::TraceRecorder;

    fn headers(entries: &[(&str, &str, i64)]) -> Vec<PreparedHeader> {
        entries
            .iter()
            .enumerate()
            .map(|(order, (text, number, level))| {
                PreparedHeader::prepare(&HeaderDescriptor::new(order, *text, Some(*number), *level), true)
                    .unwrap()
            })
            .collect()
    }

    fn resolved(order: usize, idx: usize) -> Anchor {
        Anchor {
            header_order: order,
            global_index: Some(idx),
            confidence: 1.0,
            resolution_method: ResolutionMethod::Sequential,
            retries: 0,
        }
    }

    #[test]
    fn detects_numeric_and_alpha_gaps() {
        let outline = headers(&[
            ("General", "3", 1),
            ("Alpha", "3.1", 2),
            ("Gamma", "3.4", 2),
            ("Annex", "A", 1),
            ("Annex", "C", 1),
        ]);
        let gaps = identify_gaps(&outline);
        let numbers = gaps.iter().map(NumberingGap::number).collect::<Vec<_>>();
        assert_eq!(numbers, vec!["3.2", "3.3", "b"]);
        assert_eq!(gaps[0].after, 1);
        assert_eq!(gaps[0].level, 2);
        assert_eq!(gaps[2].after, 3);
    }

    #[test]
    fn pattern_tolerates_padding_and_separators() {
        let pattern = numbering_pattern(&number_components("3.2")).unwrap();
        assert!(pattern.is_match("3.2 Beta"));
        assert!(pattern.is_match("03-2 Beta"));
        assert!(pattern.is_match("(3.2) Beta"));
        assert!(!pattern.is_match("32 Beta"));
        assert!(!pattern.is_match("3.25 Beta"));
    }

    #[test]
    fn fills_gap_inside_sibling_span() {
        let mut outline = headers(&[("General", "3", 1), ("Alpha", "3.1", 2), ("Gamma", "3.3", 2)]);
        let mut anchors = vec![resolved(0, 0), resolved(1, 1), resolved(2, 5)];
        let index = LineIndex::from_text("doc", "3 General\n3.1 Alpha\nbody\n3.2 Beta\nbody\n3.3 Gamma");
        let profile = NoiseProfile::detect(&index, &Default::default());
        let mut recorder = TraceRecorder::new();
        let added = fill_gaps(
            &mut outline,
            &mut anchors,
            &index,
            &profile,
            &LocatorConfig::default(),
            &mut recorder,
        );
        assert_eq!(added, 1);
        assert_eq!(outline[2].number.as_deref(), Some("3.2"));
        assert_eq!(outline[2].text, "Beta");
        assert_eq!(outline[2].order, 3);
        assert_eq!(anchors[2].global_index, Some(3));
        assert_eq!(anchors[2].resolution_method, ResolutionMethod::GapFill);
        assert!(identify_gaps(&outline).is_empty());
    }

    #[test]
    fn unresolved_gap_is_traced() {
        let mut outline = headers(&[("Alpha", "1", 1), ("Gamma", "3", 1)]);
        let mut anchors = vec![resolved(0, 0), resolved(1, 2)];
        let index = LineIndex::from_text("doc", "1 Alpha\nbody\n3 Gamma");
        let profile = NoiseProfile::detect(&index, &Default::default());
        let mut recorder = TraceRecorder::new();
        let added = fill_gaps(
            &mut outline,
            &mut anchors,
            &index,
            &profile,
            &LocatorConfig::default(),
            &mut recorder,
        );
        assert_eq!(added, 0);
        assert_eq!(outline.len(), 2);
        assert_eq!(recorder.summary().count("fallback_triggered"), 1);
    }
}
