use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::candidate::CandidateFinder;
use crate::coherence::reanchor;
use crate::config::{LocatorConfig, StrategyKind};
use crate::embedding::{EmbeddingCache, EmbeddingProvider};
use crate::error::Result;
use crate::gap_fill::fill_gaps;
use crate::line_index::LineIndex;
use crate::noise::{NoiseProfile, SuppressedReason};
use crate::outline::{HeaderDescriptor, PreparedHeader};
use crate::resolver::{Anchor, SequentialResolver};
use crate::span::{build_sections, Section};
use crate::strategy::{LocatorStrategy, SequentialStrategy};
use crate::trace::{TraceEvent, TraceEventKind, TraceRecorder, TraceSink, TraceSummary};
use crate::vector::VectorFusedStrategy;

/// Output of one run, ready to persist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resolution {
    pub doc_id: String,
    pub strategy: StrategyKind,
    pub anchors: Vec<Anchor>,
    pub sections: Vec<Section>,
    pub trace: Vec<TraceEvent>,
}

impl Resolution {
    pub fn summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.trace)
    }

    pub fn section(&self, key: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.section_key == key)
    }
}

/// Anchors and sections without the trace, for callers that bring their own sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub anchors: Vec<Anchor>,
    pub sections: Vec<Section>,
}

/// Maps an outline onto a line index.
#[derive(Debug, Clone)]
pub struct Locator {
    config: LocatorConfig,
}

impl Locator {
    pub fn new(config: LocatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Synchronous run. The vector strategy fuses layout signals only here.
    pub fn resolve(&self, outline: &[HeaderDescriptor], index: &LineIndex) -> Result<Resolution> {
        let mut recorder = TraceRecorder::new();
        let placement = self.resolve_traced(outline, index, &mut recorder)?;
        Ok(self.finish(index, placement, recorder))
    }

    pub fn resolve_traced(
        &self,
        outline: &[HeaderDescriptor],
        index: &LineIndex,
        sink: &mut dyn TraceSink,
    ) -> Result<Placement> {
        let (headers, profile) = self.begin(outline, index, sink);
        let strategy: Box<dyn LocatorStrategy> = match self.config.strategy {
            StrategyKind::Sequential => Box::new(SequentialStrategy::new(&self.config)),
            StrategyKind::VectorFused => {
                sink.record(TraceEventKind::CacheBypassed {
                    cache: "embedding".to_string(),
                    reason: "no_provider".to_string(),
                });
                Box::new(VectorFusedStrategy::without_embeddings(&self.config, index))
            }
        };
        Ok(self.place(headers, index, &profile, strategy.as_ref(), sink))
    }

    /// Run with an embedding provider; the sequential strategy ignores it.
    pub async fn resolve_with_embeddings(
        &self,
        outline: &[HeaderDescriptor],
        index: &LineIndex,
        provider: &dyn EmbeddingProvider,
        cache: &dyn EmbeddingCache,
    ) -> Result<Resolution> {
        let mut recorder = TraceRecorder::new();
        let (headers, profile) = self.begin(outline, index, &mut recorder);
        let strategy: Box<dyn LocatorStrategy> = match self.config.strategy {
            StrategyKind::Sequential => Box::new(SequentialStrategy::new(&self.config)),
            StrategyKind::VectorFused => Box::new(
                VectorFusedStrategy::prepare(
                    &self.config,
                    &headers,
                    index,
                    &profile,
                    provider,
                    cache,
                    &mut recorder,
                )
                .await,
            ),
        };
        let placement = self.place(headers, index, &profile, strategy.as_ref(), &mut recorder);
        Ok(self.finish(index, placement, recorder))
    }

    fn begin(
        &self,
        outline: &[HeaderDescriptor],
        index: &LineIndex,
        sink: &mut dyn TraceSink,
    ) -> (Vec<PreparedHeader>, Arc<NoiseProfile>) {
        info!(
            doc_id = index.doc_id(),
            headers = outline.len(),
            lines = index.len(),
            strategy = ?self.config.strategy,
            "locating outline"
        );
        sink.record(TraceEventKind::RunStarted {
            doc_id: index.doc_id().to_string(),
            strategy: self.config.strategy,
            headers: outline.len(),
            lines: index.len(),
        });

        let mut ordered = outline.iter().collect::<Vec<_>>();
        ordered.sort_by_key(|descriptor| descriptor.order);
        let mut headers = Vec::with_capacity(ordered.len());
        for descriptor in ordered {
            if let Some(reason) = descriptor.invalid_reason() {
                debug!(order = descriptor.order, reason, "skipping outline entry");
                sink.record(TraceEventKind::InvalidOutlineEntry {
                    header_order: descriptor.order,
                    reason: reason.to_string(),
                });
                continue;
            }
            if let Some(header) = PreparedHeader::prepare(descriptor, self.config.normalize_confusables) {
                headers.push(header);
            }
        }

        let (profile, cached) = index.noise_profile(&self.config.noise);
        if !cached {
            sink.record(TraceEventKind::CacheBypassed {
                cache: "noise_profile".to_string(),
                reason: "settings_mismatch".to_string(),
            });
        }
        sink.record(TraceEventKind::NoiseProfileBuilt {
            toc_lines: profile.count(SuppressedReason::TableOfContents),
            running_lines: profile.count(SuppressedReason::RunningHeader),
            boilerplate: profile.boilerplate().to_vec(),
        });
        (headers, profile)
    }

    fn place(
        &self,
        mut headers: Vec<PreparedHeader>,
        index: &LineIndex,
        profile: &NoiseProfile,
        strategy: &dyn LocatorStrategy,
        sink: &mut dyn TraceSink,
    ) -> Placement {
        let finder = CandidateFinder::new(index, profile, &self.config, strategy);
        let resolver = SequentialResolver::new(&finder, index, &self.config);
        let mut anchors = resolver.resolve_all(&headers, sink);

        let mut conflicted = BTreeSet::new();
        if self.config.reanchor {
            conflicted = reanchor(&headers, &mut anchors, &finder, sink)
                .into_iter()
                .map(|pos| headers[pos].order)
                .collect();
        }
        if self.config.fill_numbering_gaps {
            fill_gaps(&mut headers, &mut anchors, index, profile, &self.config, sink);
        }

        let sections = build_sections(
            &headers,
            &anchors,
            index,
            self.config.span_mode,
            &conflicted,
            sink,
        );
        let resolved = anchors.iter().filter(|a| a.is_resolved()).count();
        sink.record(TraceEventKind::RunFinished {
            resolved,
            fallback: anchors.len() - resolved,
            sections: sections.len(),
        });
        info!(resolved, fallback = anchors.len() - resolved, "outline located");
        Placement { anchors, sections }
    }

    fn finish(&self, index: &LineIndex, placement: Placement, recorder: TraceRecorder) -> Resolution {
        Resolution {
            doc_id: index.doc_id().to_string(),
            strategy: self.config.strategy,
            anchors: placement.anchors,
            sections: placement.sections,
            trace: recorder.into_events(),
        }
    }
}

/// Stable key over document content and outline, for caller-side run caching.
pub fn outline_key(index: &LineIndex, outline: &[HeaderDescriptor]) -> String {
    let mut hasher = Sha256::new();
    for line in index.lines() {
        hasher.update(line.page_index.to_le_bytes());
        hasher.update(line.raw_text.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([0xffu8]);
    for descriptor in outline {
        hasher.update((descriptor.order as u64).to_le_bytes());
        hasher.update(descriptor.text.as_bytes());
        hasher.update([0u8]);
        hasher.update(descriptor.number.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0u8]);
        hasher.update(descriptor.level.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}
