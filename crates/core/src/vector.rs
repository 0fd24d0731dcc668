use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::candidate::{lexical_match, Candidate};
use crate::config::{LocatorConfig, StrategyKind, VectorSettings};
use crate::embedding::{cosine_similarity, EmbeddingCache, EmbeddingKey, EmbeddingProvider};
use crate::error::{LocatorError, Result};
use crate::line_index::LineIndex;
use crate::noise::{NoiseProfile, SuppressedReason};
use crate::outline::PreparedHeader;
use crate::resolver::ResolutionMethod;
use crate::strategy::LocatorStrategy;
use crate::trace::{TraceEventKind, TraceSink};

/// Fused lexical, semantic and layout scoring.
///
/// Cosine scores are computed up front by [`VectorFusedStrategy::prepare`] for the
/// most promising lines of each header; the resolver itself stays synchronous.
#[derive(Debug, Clone)]
pub struct VectorFusedStrategy {
    settings: VectorSettings,
    cosine: FxHashMap<(usize, usize), f32>,
    font_rank: Vec<Option<f32>>,
    vertical_bonus: Vec<Option<f32>>,
}

impl VectorFusedStrategy {
    /// Layout-aware fusion with no semantic term.
    pub fn without_embeddings(config: &LocatorConfig, index: &LineIndex) -> Self {
        Self {
            settings: config.vector.clone(),
            cosine: FxHashMap::default(),
            font_rank: font_ranks(index),
            vertical_bonus: vertical_bonuses(index),
        }
    }

    /// Embeds each header and its top lexical lines, then builds the cosine table.
    ///
    /// A failed or timed-out call only leaves the affected header or line without a
    /// cosine term. `max_embedding_failures` stops calling the provider once reached.
    pub async fn prepare(
        config: &LocatorConfig,
        headers: &[PreparedHeader],
        index: &LineIndex,
        profile: &NoiseProfile,
        provider: &dyn EmbeddingProvider,
        cache: &dyn EmbeddingCache,
        sink: &mut dyn TraceSink,
    ) -> Self {
        let mut strategy = Self::without_embeddings(config, index);
        let embedder = CachedEmbedder {
            doc_id: index.doc_id(),
            provider,
            cache,
            timeout: Duration::from_millis(config.vector.embedding_timeout_ms),
        };
        let mut failures = 0usize;
        let budget_spent =
            |failures: usize| config.vector.max_embedding_failures.is_some_and(|max| failures >= max);

        'headers: for header in headers {
            let lines = top_lexical_lines(config, header, index, profile);
            if lines.is_empty() {
                continue;
            }
            let header_vector = match embedder.embed(&header.label).await {
                Ok(vector) => vector,
                Err(err) => {
                    failures += 1;
                    record_failure(sink, provider, header, &err);
                    if budget_spent(failures) {
                        break 'headers;
                    }
                    continue;
                }
            };
            let mut scored = 0;
            for line in lines {
                let context = index.context(line, config.vector.context_lines);
                match embedder.embed(&context).await {
                    Ok(vector) => {
                        if let Some(score) = cosine_similarity(&header_vector, &vector) {
                            strategy.cosine.insert((header.order, line), score);
                            scored += 1;
                        }
                    }
                    Err(err) => {
                        failures += 1;
                        record_failure(sink, provider, header, &err);
                        if budget_spent(failures) {
                            break 'headers;
                        }
                    }
                }
            }
            debug!(header = %header.label, scored, "cosine scores ready");
        }
        if budget_spent(failures) {
            warn!(failures, "embedding failure budget reached, remaining candidates stay lexical");
        }
        strategy
    }

    pub fn cosine(&self, header_order: usize, line: usize) -> Option<f32> {
        self.cosine.get(&(header_order, line)).copied()
    }
}

impl LocatorStrategy for VectorFusedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::VectorFused
    }

    fn method(&self) -> ResolutionMethod {
        ResolutionMethod::VectorFused
    }

    fn lexical_floor(&self) -> f32 {
        self.settings.min_lexical
    }

    fn enrich(&self, header: &PreparedHeader, mut candidate: Candidate) -> Option<Candidate> {
        let cosine = self.cosine(header.order, candidate.line_ref);
        if cosine.is_some_and(|c| c < self.settings.min_cosine) {
            return None;
        }
        candidate.cosine_score = cosine;
        candidate.font_rank = self.font_rank.get(candidate.line_ref).copied().flatten();
        candidate.vertical_bonus = self.vertical_bonus.get(candidate.line_ref).copied().flatten();
        let weights = &self.settings.weights;
        candidate.fused_score = Some(fuse(&[
            (weights.lexical, Some(candidate.lexical_score)),
            (weights.cosine, candidate.cosine_score),
            (weights.font, candidate.font_rank),
            (weights.vertical, candidate.vertical_bonus),
        ])
        .unwrap_or(candidate.lexical_score));
        candidate.rank_score = candidate.base_rank();
        Some(candidate)
    }
}

/// Weighted mean over the terms that are present.
pub fn fuse(terms: &[(f32, Option<f32>)]) -> Option<f32> {
    let (total, weight) = terms
        .iter()
        .filter(|(w, _)| *w > 0.0)
        .filter_map(|(w, value)| value.map(|v| (w * v, *w)))
        .fold((0.0f32, 0.0f32), |(total, weight), (t, w)| (total + t, weight + w));
    (weight > 0.0).then(|| total / weight)
}

struct CachedEmbedder<'a> {
    doc_id: &'a str,
    provider: &'a dyn EmbeddingProvider,
    cache: &'a dyn EmbeddingCache,
    timeout: Duration,
}

impl CachedEmbedder<'_> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = EmbeddingKey::new(self.doc_id, text);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let vector = tokio::time::timeout(self.timeout, self.provider.embed(text))
            .await
            .map_err(|_| {
                LocatorError::Embedding(format!("timed out after {} ms", self.timeout.as_millis()))
            })??;
        self.cache.put(key, vector.clone());
        Ok(vector)
    }
}

fn record_failure(
    sink: &mut dyn TraceSink,
    provider: &dyn EmbeddingProvider,
    header: &PreparedHeader,
    err: &LocatorError,
) {
    warn!(provider = provider.name(), header = %header.label, error = %err, "embedding failed");
    sink.record(TraceEventKind::EmbeddingFailure {
        header_order: Some(header.order),
        error: err.to_string(),
    });
    sink.record(TraceEventKind::CacheBypassed {
        cache: "embedding".to_string(),
        reason: failure_reason(err).to_string(),
    });
}

fn failure_reason(err: &LocatorError) -> &'static str {
    match err {
        LocatorError::Embedding(message) if message.starts_with("timed out") => "timeout",
        _ => "provider_error",
    }
}

fn top_lexical_lines(
    config: &LocatorConfig,
    header: &PreparedHeader,
    index: &LineIndex,
    profile: &NoiseProfile,
) -> Vec<usize> {
    let mut scored = index
        .lines()
        .iter()
        .filter(|line| profile.reason(line.global_index) != Some(SuppressedReason::RunningHeader))
        .filter_map(|line| {
            let reason = profile.reason(line.global_index);
            lexical_match(header, line, config.normalize_confusables, reason, false)
                .map(|(score, _)| (line.global_index, score.set))
        })
        .filter(|(_, score)| *score >= config.vector.min_lexical)
        .collect::<Vec<_>>();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(config.vector.max_candidates);
    scored.into_iter().map(|(idx, _)| idx).collect()
}

/// Rank of each line's font size among the document's distinct sizes; largest is 1.
fn font_ranks(index: &LineIndex) -> Vec<Option<f32>> {
    let mut sizes = index
        .lines()
        .iter()
        .filter_map(|l| l.font_size)
        .filter(|s| s.is_finite())
        .collect::<Vec<_>>();
    sizes.sort_by(f32::total_cmp);
    sizes.dedup();
    index
        .lines()
        .iter()
        .map(|line| {
            let size = line.font_size.filter(|s| s.is_finite())?;
            let rank = sizes.iter().position(|s| *s == size)?;
            Some(if sizes.len() == 1 {
                1.0
            } else {
                rank as f32 / (sizes.len() - 1) as f32
            })
        })
        .collect()
}

/// `1 - pos / max_pos_on_page`, so the top of a page scores 1.
fn vertical_bonuses(index: &LineIndex) -> Vec<Option<f32>> {
    let mut page_max: FxHashMap<u32, f32> = FxHashMap::default();
    for line in index.lines() {
        if let Some(pos) = line.vertical_pos.filter(|p| p.is_finite() && *p >= 0.0) {
            let max = page_max.entry(line.page_index).or_insert(0.0);
            *max = max.max(pos);
        }
    }
    index
        .lines()
        .iter()
        .map(|line| {
            let pos = line.vertical_pos.filter(|p| p.is_finite() && *p >= 0.0)?;
            let max = page_max.get(&line.page_index).copied()?;
            (max > 0.0).then(|| (1.0 - pos / max).clamp(0.0, 1.0))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line_index::{ParsedLine, ParsedPage};
    use crate::similarity::LexicalScore;

    #[test]
    fn fuse_renormalizes_over_present_terms() {
        let full = fuse(&[(0.5, Some(1.0)), (0.5, Some(0.0))]).unwrap();
        assert!((full - 0.5).abs() < 1e-6);
        let lexical_only = fuse(&[(0.55, Some(0.9)), (0.30, None), (0.10, None), (0.05, None)]).unwrap();
        assert!((lexical_only - 0.9).abs() < 1e-6);
        assert_eq!(fuse(&[(0.0, Some(1.0))]), None);
    }

    #[test]
    fn layout_signals_are_scaled_to_unit_range() {
        let line = |text: &str, size: f32, pos: f32| ParsedLine {
            text: text.to_string(),
            font_size: Some(size),
            vertical_pos: Some(pos),
        };
        let index = LineIndex::from_pages(
            "doc",
            vec![ParsedPage {
                index: 0,
                lines: vec![line("Title", 18.0, 0.0), line("Body", 10.0, 50.0), line("Sub", 12.0, 100.0)],
            }],
        );
        let fonts = font_ranks(&index);
        assert_eq!(fonts, vec![Some(1.0), Some(0.0), Some(0.5)]);
        let vertical = vertical_bonuses(&index);
        assert_eq!(vertical, vec![Some(1.0), Some(0.5), Some(0.0)]);
    }

    #[test]
    fn low_cosine_vetoes_candidate() {
        let config = LocatorConfig::default();
        let index = LineIndex::from_text("doc", "Scope");
        let mut strategy = VectorFusedStrategy::without_embeddings(&config, &index);
        strategy.cosine.insert((0, 0), 0.1);
        let header = PreparedHeader::prepare(
            &crate::outline::HeaderDescriptor::new(0, "Scope", None, 1),
            true,
        )
        .unwrap();
        assert!(strategy
            .enrich(&header, Candidate::lexical(0, LexicalScore { set: 1.0, sort: 1.0 }, None, false))
            .is_none());
        strategy.cosine.insert((0, 0), 0.9);
        let enriched = strategy
            .enrich(&header, Candidate::lexical(0, LexicalScore { set: 1.0, sort: 1.0 }, None, false))
            .unwrap();
        let expected = (0.55 * 1.0 + 0.30 * 0.9) / 0.85;
        assert!((enriched.fused_score.unwrap() - expected).abs() < 1e-5);
    }
}
