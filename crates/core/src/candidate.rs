use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::config::LocatorConfig;
use crate::line_index::{Line, LineIndex};
use crate::noise::{strip_page_reference, NoiseProfile, SuppressedReason};
use crate::normalization::split_leading_number;
use crate::outline::PreparedHeader;
use crate::similarity::{header_similarity, LexicalScore};
use crate::strategy::LocatorStrategy;
use crate::trace::{TraceEventKind, TraceSink};

const TIE_EPSILON: f32 = 1e-6;

/// One line considered as the position of a header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub line_ref: usize,
    /// Token-set score; admission is decided on this.
    pub lexical_score: f32,
    pub sort_score: f32,
    pub cosine_score: Option<f32>,
    pub font_rank: Option<f32>,
    pub vertical_bonus: Option<f32>,
    pub fused_score: Option<f32>,
    pub suppressed_reason: Option<SuppressedReason>,
    pub number_match: bool,
    pub child_hint: bool,
    /// Score used for ranking, child-hint bonus included.
    pub rank_score: f32,
}

impl Candidate {
    pub fn lexical(
        line_ref: usize,
        lexical: LexicalScore,
        suppressed_reason: Option<SuppressedReason>,
        number_match: bool,
    ) -> Self {
        Self {
            line_ref,
            lexical_score: lexical.set,
            sort_score: lexical.sort,
            cosine_score: None,
            font_rank: None,
            vertical_bonus: None,
            fused_score: None,
            suppressed_reason,
            number_match,
            child_hint: false,
            rank_score: lexical.ranking(),
        }
    }

    /// Fused score when present, lexical score otherwise.
    pub fn score(&self) -> f32 {
        self.fused_score.unwrap_or(self.lexical_score)
    }

    /// [`Candidate::score`] averaged with the token-sort term, before any child hint.
    pub fn base_rank(&self) -> f32 {
        (self.score() + self.sort_score) / 2.0
    }
}

/// Inclusive range of global indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchWindow {
    pub start: usize,
    pub end: usize,
}

impl SearchWindow {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, global_index: usize) -> bool {
        (self.start..=self.end).contains(&global_index)
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest<'h> {
    pub header: &'h PreparedHeader,
    /// Immediate child in the outline, used for lookahead hinting.
    pub child: Option<&'h PreparedHeader>,
    pub window: SearchWindow,
    /// Lines at or before this index are not scored at all.
    pub exclude_through: Option<usize>,
    pub expected_start: usize,
    /// Compare titles only: no number conflicts, no numeric-prefix gating.
    pub title_only: bool,
    pub attempt: u32,
}

/// Lexical similarity of `header` against one line, with the line's leading number
/// split off. `None` when the numbers conflict.
pub fn lexical_match(
    header: &PreparedHeader,
    line: &Line,
    confusables: bool,
    reason: Option<SuppressedReason>,
    title_only: bool,
) -> Option<(LexicalScore, bool)> {
    let mut text = line.compare_text(confusables);
    if reason == Some(SuppressedReason::TableOfContents) {
        text = strip_page_reference(text);
    }
    let (line_number, rest) = split_leading_number(text);
    let number_match = match (header.number.as_deref(), line_number.as_deref()) {
        (Some(want), Some(got)) if want == got => true,
        (Some(_), Some(_)) if !title_only => return None,
        _ => false,
    };
    Some((header_similarity(&header.title, rest), number_match))
}

/// Scores lines of one window for one header.
pub struct CandidateFinder<'a> {
    index: &'a LineIndex,
    profile: &'a NoiseProfile,
    config: &'a LocatorConfig,
    strategy: &'a dyn LocatorStrategy,
}

impl<'a> CandidateFinder<'a> {
    pub fn new(
        index: &'a LineIndex,
        profile: &'a NoiseProfile,
        config: &'a LocatorConfig,
        strategy: &'a dyn LocatorStrategy,
    ) -> Self {
        Self {
            index,
            profile,
            config,
            strategy,
        }
    }

    pub fn strategy(&self) -> &dyn LocatorStrategy {
        self.strategy
    }

    /// Ranked candidates for `request`, best first.
    pub fn find(&self, request: &SearchRequest<'_>, sink: &mut dyn TraceSink) -> Vec<Candidate> {
        let Some(last) = self.index.last_index() else {
            return Vec::new();
        };
        if request.window.is_empty() || request.window.start > last {
            return Vec::new();
        }
        let start = match request.exclude_through {
            Some(through) => request.window.start.max(through + 1),
            None => request.window.start,
        };
        let end = request.window.end.min(last);

        let mut clean = Vec::new();
        let mut contents = Vec::new();
        for idx in start..=end {
            let reason = self.profile.reason(idx);
            if reason == Some(SuppressedReason::RunningHeader) {
                continue;
            }
            let Some(candidate) = self.score_line(request.header, idx, reason, request.title_only)
            else {
                continue;
            };
            if reason.is_some() {
                contents.push(candidate);
            } else {
                clean.push(candidate);
            }
        }
        let mut candidates = if clean.is_empty()
            && !contents.is_empty()
            && !self.clean_match_anywhere(request.header, request.title_only)
        {
            contents
        } else {
            clean
        };

        if !request.title_only
            && self.numeric_gate_applies(request.header)
            && candidates.iter().any(|c| c.number_match)
        {
            candidates.retain(|c| c.number_match);
        }

        if let Some(child) = request.child {
            for candidate in &mut candidates {
                if self.child_follows(child, candidate.line_ref) {
                    candidate.child_hint = true;
                }
            }
        }
        for candidate in &mut candidates {
            candidate.rank_score = candidate.base_rank()
                + if candidate.child_hint {
                    self.config.child_hint_bonus
                } else {
                    0.0
                };
        }

        let expected = request.expected_start;
        let prefer_last = self.config.prefer_last_match;
        candidates.sort_by(|a, b| rank(a, b, expected, prefer_last));

        if let Some(top) = candidates.first() {
            let tied = candidates
                .iter()
                .take_while(|c| (top.rank_score - c.rank_score).abs() <= TIE_EPSILON)
                .map(|c| c.line_ref)
                .collect::<Vec<_>>();
            if tied.len() > 1 {
                sink.record(TraceEventKind::AmbiguousMatch {
                    header_order: request.header.order,
                    score: top.rank_score,
                    global_indices: tied,
                });
            }
        }
        for candidate in &candidates {
            sink.record(TraceEventKind::CandidateFound {
                header_order: request.header.order,
                global_index: candidate.line_ref,
                page: self.index.page_of(candidate.line_ref).unwrap_or_default(),
                lexical_score: candidate.lexical_score,
                cosine_score: candidate.cosine_score,
                fused_score: candidate.fused_score,
                rank_score: candidate.rank_score,
                child_hint: candidate.child_hint,
                attempt: request.attempt,
            });
        }
        candidates
    }

    fn score_line(
        &self,
        header: &PreparedHeader,
        idx: usize,
        reason: Option<SuppressedReason>,
        title_only: bool,
    ) -> Option<Candidate> {
        let line = self.index.get(idx)?;
        let (lexical, number_match) = lexical_match(
            header,
            line,
            self.config.normalize_confusables,
            reason,
            title_only,
        )?;
        if lexical.set < self.strategy.lexical_floor() {
            return None;
        }
        self.strategy
            .enrich(header, Candidate::lexical(idx, lexical, reason, number_match))
    }

    /// Whether any unflagged line in the whole document would qualify.
    fn clean_match_anywhere(&self, header: &PreparedHeader, title_only: bool) -> bool {
        (0..self.index.len())
            .filter(|idx| !self.profile.is_suppressed(*idx))
            .any(|idx| self.score_line(header, idx, None, title_only).is_some())
    }

    fn numeric_gate_applies(&self, header: &PreparedHeader) -> bool {
        self.config.require_numeric_prefix && header.level == 1 && header.number.is_some()
    }

    fn child_follows(&self, child: &PreparedHeader, from: usize) -> bool {
        let end = from
            .saturating_add(self.config.child_lookahead_lines)
            .min(self.index.len().saturating_sub(1));
        ((from + 1)..=end)
            .filter(|idx| !self.profile.is_suppressed(*idx))
            .filter_map(|idx| self.index.get(idx))
            .any(|line| {
                lexical_match(child, line, self.config.normalize_confusables, None, false)
                    .map(|(score, number_match)| {
                        score.set >= self.config.fuzzy_threshold || (number_match && score.set >= 0.5)
                    })
                    .unwrap_or(false)
            })
    }
}

fn rank(a: &Candidate, b: &Candidate, expected: usize, prefer_last: bool) -> Ordering {
    b.rank_score
        .total_cmp(&a.rank_score)
        .then_with(|| {
            a.line_ref
                .abs_diff(expected)
                .cmp(&b.line_ref.abs_diff(expected))
        })
        .then_with(|| {
            if prefer_last {
                b.line_ref.cmp(&a.line_ref)
            } else {
                a.line_ref.cmp(&b.line_ref)
            }
        })
}
