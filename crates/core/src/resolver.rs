use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::candidate::{Candidate, CandidateFinder, SearchRequest, SearchWindow};
use crate::config::LocatorConfig;
use crate::line_index::LineIndex;
use crate::outline::PreparedHeader;
use crate::trace::{TraceEventKind, TraceSink};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Sequential,
    VectorFused,
    Fallback,
    GapFill,
}

/// Final position of one header. `global_index` is `None` for fallbacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anchor {
    pub header_order: usize,
    pub global_index: Option<usize>,
    pub confidence: f32,
    pub resolution_method: ResolutionMethod,
    pub retries: u32,
}

impl Anchor {
    pub fn fallback(header_order: usize, retries: u32) -> Self {
        Self {
            header_order,
            global_index: None,
            confidence: 0.0,
            resolution_method: ResolutionMethod::Fallback,
            retries,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.global_index.is_some()
    }
}

/// Forward-only placement of an outline, one header at a time.
pub struct SequentialResolver<'a> {
    finder: &'a CandidateFinder<'a>,
    index: &'a LineIndex,
    config: &'a LocatorConfig,
}

impl<'a> SequentialResolver<'a> {
    pub fn new(finder: &'a CandidateFinder<'a>, index: &'a LineIndex, config: &'a LocatorConfig) -> Self {
        Self {
            finder,
            index,
            config,
        }
    }

    /// Anchors in outline order; resolved indices are strictly increasing.
    pub fn resolve_all(&self, headers: &[PreparedHeader], sink: &mut dyn TraceSink) -> Vec<Anchor> {
        let mut last = None;
        let mut anchors = Vec::with_capacity(headers.len());
        for (pos, header) in headers.iter().enumerate() {
            let child = headers.get(pos + 1).filter(|next| next.level > header.level);
            let anchor = self.resolve_one(header, child, last, sink);
            if let Some(idx) = anchor.global_index {
                last = Some(idx);
            }
            anchors.push(anchor);
        }
        anchors
    }

    pub fn resolve_one(
        &self,
        header: &PreparedHeader,
        child: Option<&PreparedHeader>,
        last: Option<usize>,
        sink: &mut dyn TraceSink,
    ) -> Anchor {
        let Some(last_line) = self.index.last_index() else {
            return self.fall_back(header, "no_candidate", 0, sink);
        };
        let mut violated = false;
        let mut attempt = 0;
        loop {
            let window = self.window(last, attempt, last_line);
            let request = SearchRequest {
                header,
                child,
                window,
                exclude_through: if violated && self.config.strict_monotonic {
                    last
                } else {
                    None
                },
                expected_start: last.map_or(0, |idx| idx + 1),
                title_only: false,
                attempt,
            };
            let candidates = self.finder.find(&request, sink);
            if let Some(chosen) = self.choose(header, &candidates, last, violated, attempt, sink) {
                sink.record(TraceEventKind::AnchorResolved {
                    header_order: header.order,
                    global_index: chosen.line_ref,
                    page: self.index.page_of(chosen.line_ref).unwrap_or_default(),
                    confidence: chosen.score(),
                    method: self.finder.strategy().method(),
                    retries: attempt,
                });
                return Anchor {
                    header_order: header.order,
                    global_index: Some(chosen.line_ref),
                    confidence: chosen.score().clamp(0.0, 1.0),
                    resolution_method: self.finder.strategy().method(),
                    retries: attempt,
                };
            }
            // A violation already known on entry means this pass searched forward only.
            let searched_forward = violated;
            if let Some(best) = candidates.first() {
                if last.is_some_and(|prev| best.line_ref <= prev) {
                    violated = true;
                }
            }
            let exhausted =
                window.end >= last_line && (candidates.is_empty() || searched_forward);
            if attempt >= self.config.max_retries || exhausted {
                let reason = if violated {
                    "monotonic_violation"
                } else {
                    "no_candidate"
                };
                return self.fall_back(header, reason, attempt, sink);
            }
            attempt += 1;
            debug!(header = %header.label, attempt, "widening search window");
        }
    }

    fn choose<'c>(
        &self,
        header: &PreparedHeader,
        candidates: &'c [Candidate],
        last: Option<usize>,
        violated: bool,
        attempt: u32,
        sink: &mut dyn TraceSink,
    ) -> Option<&'c Candidate> {
        let best = candidates.first()?;
        let Some(prev) = last else {
            return Some(best);
        };
        if best.line_ref > prev {
            return Some(best);
        }
        let forward = if violated {
            candidates.iter().find(|c| c.line_ref > prev)
        } else {
            None
        };
        if forward.is_none() {
            sink.record(TraceEventKind::MonotonicViolation {
                header_order: header.order,
                candidate_index: best.line_ref,
                last_anchor: prev,
                attempt,
            });
        }
        forward
    }

    /// `[last + 1 - pad, last + 1 + span * 2^attempt + pad]`; the last attempt runs to the end.
    fn window(&self, last: Option<usize>, attempt: u32, last_line: usize) -> SearchWindow {
        let base = last.map_or(0, |idx| idx + 1);
        let start = base.saturating_sub(self.config.window_pad);
        let end = if attempt >= self.config.max_retries {
            last_line
        } else {
            let span = self
                .config
                .search_span
                .saturating_mul(1usize << attempt.min(20));
            base.saturating_add(span)
                .saturating_add(self.config.window_pad)
                .min(last_line)
        };
        SearchWindow::new(start, end)
    }

    fn fall_back(
        &self,
        header: &PreparedHeader,
        reason: &str,
        retries: u32,
        sink: &mut dyn TraceSink,
    ) -> Anchor {
        sink.record(TraceEventKind::FallbackTriggered {
            header_order: Some(header.order),
            number: header.number.clone(),
            reason: reason.to_string(),
            method: ResolutionMethod::Fallback,
            retries,
        });
        Anchor::fallback(header.order, retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::NoiseProfile;
    use crate::outline::HeaderDescriptor;
    use crate::strategy::SequentialStrategy;
    use crate::trace::TraceRecorder;

    fn prepared(entries: &[(&str, Option<&str>, i64)]) -> Vec<PreparedHeader> {
        entries
            .iter()
            .enumerate()
            .map(|(order, (text, number, level))| {
                PreparedHeader::prepare(&HeaderDescriptor::new(order, *text, *number, *level), true)
                    .unwrap()
            })
            .collect()
    }

    fn run(text: &str, headers: &[PreparedHeader], config: &LocatorConfig) -> (Vec<Anchor>, TraceRecorder) {
        let index = LineIndex::from_text("doc", text);
        let profile = NoiseProfile::detect(&index, &config.noise);
        let strategy = SequentialStrategy::new(config);
        let finder = CandidateFinder::new(&index, &profile, config, &strategy);
        let resolver = SequentialResolver::new(&finder, &index, config);
        let mut recorder = TraceRecorder::new();
        let anchors = resolver.resolve_all(headers, &mut recorder);
        (anchors, recorder)
    }

    #[test]
    fn resolves_in_outline_order() {
        let headers = prepared(&[
            ("Introduction", Some("1"), 1),
            ("Scope of Work", Some("1.1"), 2),
            ("Quality", Some("2"), 1),
        ]);
        let text = "cover\n1 Introduction\nbody\n1.1 Scope of Work\nbody\n2 Quality\nbody";
        let (anchors, recorder) = run(text, &headers, &LocatorConfig::default());
        let positions = anchors.iter().map(|a| a.global_index).collect::<Vec<_>>();
        assert_eq!(positions, vec![Some(1), Some(3), Some(5)]);
        assert!(anchors
            .iter()
            .all(|a| a.resolution_method == ResolutionMethod::Sequential && a.retries == 0));
        assert_eq!(recorder.summary().count("anchor_resolved"), 3);
    }

    #[test]
    fn backward_match_triggers_violation_then_forward_retry() {
        let headers = prepared(&[("Testing", None, 1), ("Closeout", None, 1), ("Testing", None, 1)]);
        let text = "Testing\nfiller\nCloseout\nfiller\nTesting.";
        for strict in [true, false] {
            let config = LocatorConfig {
                strict_monotonic: strict,
                ..LocatorConfig::default()
            };
            let (anchors, recorder) = run(text, &headers, &config);
            assert_eq!(anchors[0].global_index, Some(0));
            assert_eq!(anchors[1].global_index, Some(2));
            assert_eq!(anchors[2].global_index, Some(4));
            assert_eq!(anchors[2].retries, 1);
            let summary = recorder.summary();
            assert_eq!(summary.count("monotonic_violation"), 1);
            assert_eq!(summary.count("fallback_triggered"), 0);
        }
    }

    #[test]
    fn lone_backward_match_falls_back() {
        let headers = prepared(&[("Closeout", None, 1), ("Testing", None, 1)]);
        let text = "Testing\nfiller\nCloseout\nfiller";
        for strict in [true, false] {
            let config = LocatorConfig {
                strict_monotonic: strict,
                ..LocatorConfig::default()
            };
            let (anchors, recorder) = run(text, &headers, &config);
            assert_eq!(anchors[0].global_index, Some(2));
            assert_eq!(anchors[1].global_index, None);
            assert_eq!(anchors[1].resolution_method, ResolutionMethod::Fallback);
            let summary = recorder.summary();
            assert!(summary.count("monotonic_violation") >= 1);
            assert_eq!(summary.count("fallback_triggered"), 1);
        }
    }

    #[test]
    fn lenient_mode_stops_once_whole_document_was_searched() {
        let headers = prepared(&[("Closeout", None, 1), ("Testing", None, 1)]);
        let config = LocatorConfig {
            strict_monotonic: false,
            max_retries: 50,
            ..LocatorConfig::default()
        };
        let (anchors, recorder) = run("Testing\nfiller\nCloseout\nfiller", &headers, &config);
        assert_eq!(anchors[1], Anchor::fallback(1, 1));
        assert_eq!(recorder.summary().count("monotonic_violation"), 2);
    }

    #[test]
    fn missing_header_falls_back_without_error() {
        let headers = prepared(&[("Warranty Provisions", Some("9"), 1)]);
        let (anchors, recorder) = run("1 Introduction\nbody", &headers, &LocatorConfig::default());
        assert_eq!(anchors[0], Anchor::fallback(0, 0));
        assert_eq!(recorder.summary().count("fallback_triggered"), 1);
    }

    #[test]
    fn empty_index_falls_back_every_header() {
        let headers = prepared(&[("Introduction", Some("1"), 1), ("Scope", Some("2"), 1)]);
        let (anchors, _) = run("", &headers, &LocatorConfig::default());
        assert!(anchors.iter().all(|a| !a.is_resolved()));
    }

    #[test]
    fn far_header_found_by_widened_window() {
        let mut text = String::from("1 Introduction\n");
        for i in 0..60 {
            text.push_str(&format!("paragraph {}\n", "x".repeat(i % 7 + 1)));
        }
        text.push_str("2 Execution\n");
        let headers = prepared(&[("Introduction", Some("1"), 1), ("Execution", Some("2"), 1)]);
        let config = LocatorConfig {
            search_span: 5,
            window_pad: 2,
            max_retries: 2,
            ..LocatorConfig::default()
        };
        let (anchors, _) = run(&text, &headers, &config);
        assert_eq!(anchors[1].global_index, Some(61));
        assert_eq!(anchors[1].retries, 2);
    }
}
