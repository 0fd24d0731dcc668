use std::collections::BTreeMap;
use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StrategyKind;
use crate::error::Result;
use crate::resolver::ResolutionMethod;

/// Decision payload of one trace event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEventKind {
    RunStarted {
        doc_id: String,
        strategy: StrategyKind,
        headers: usize,
        lines: usize,
    },
    InvalidOutlineEntry {
        header_order: usize,
        reason: String,
    },
    NoiseProfileBuilt {
        toc_lines: usize,
        running_lines: usize,
        boilerplate: Vec<String>,
    },
    CandidateFound {
        header_order: usize,
        global_index: usize,
        page: u32,
        lexical_score: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        cosine_score: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        fused_score: Option<f32>,
        rank_score: f32,
        child_hint: bool,
        attempt: u32,
    },
    AmbiguousMatch {
        header_order: usize,
        score: f32,
        global_indices: Vec<usize>,
    },
    AnchorResolved {
        header_order: usize,
        global_index: usize,
        page: u32,
        confidence: f32,
        method: ResolutionMethod,
        retries: u32,
    },
    MonotonicViolation {
        header_order: usize,
        candidate_index: usize,
        last_anchor: usize,
        attempt: u32,
    },
    FallbackTriggered {
        #[serde(skip_serializing_if = "Option::is_none")]
        header_order: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        number: Option<String>,
        reason: String,
        method: ResolutionMethod,
        retries: u32,
    },
    AnchorReanchored {
        header_order: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<usize>,
        to: usize,
        child_order: usize,
    },
    ReanchorConflict {
        header_order: usize,
        parent_index: usize,
        child_order: usize,
        child_index: usize,
    },
    EmbeddingFailure {
        #[serde(skip_serializing_if = "Option::is_none")]
        header_order: Option<usize>,
        error: String,
    },
    CacheBypassed {
        cache: String,
        reason: String,
    },
    SectionBuilt {
        section_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        start: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end: Option<usize>,
    },
    RunFinished {
        resolved: usize,
        fallback: usize,
        sections: usize,
    },
}

impl TraceEventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::InvalidOutlineEntry { .. } => "invalid_outline_entry",
            Self::NoiseProfileBuilt { .. } => "noise_profile_built",
            Self::CandidateFound { .. } => "candidate_found",
            Self::AmbiguousMatch { .. } => "ambiguous_match",
            Self::AnchorResolved { .. } => "anchor_resolved",
            Self::MonotonicViolation { .. } => "monotonic_violation",
            Self::FallbackTriggered { .. } => "fallback_triggered",
            Self::AnchorReanchored { .. } => "anchor_reanchored",
            Self::ReanchorConflict { .. } => "reanchor_conflict",
            Self::EmbeddingFailure { .. } => "embedding_failure",
            Self::CacheBypassed { .. } => "cache_bypassed",
            Self::SectionBuilt { .. } => "section_built",
            Self::RunFinished { .. } => "run_finished",
        }
    }

    /// Events that explain where an anchor ended up.
    pub fn is_decision(&self) -> bool {
        matches!(
            self,
            Self::CandidateFound { .. }
                | Self::AmbiguousMatch { .. }
                | Self::AnchorResolved { .. }
                | Self::MonotonicViolation { .. }
                | Self::FallbackTriggered { .. }
                | Self::AnchorReanchored { .. }
                | Self::ReanchorConflict { .. }
                | Self::CacheBypassed { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEvent {
    /// Wall-clock seconds since the Unix epoch.
    pub timestamp: f64,
    #[serde(flatten)]
    pub kind: TraceEventKind,
}

/// Append-only destination for decision events.
pub trait TraceSink: Send {
    fn record(&mut self, kind: TraceEventKind);
}

/// In-memory sink that keeps every event of one run in order.
#[derive(Debug, Default, Clone)]
pub struct TraceRecorder {
    events: Vec<TraceEvent>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.events)
    }
}

impl TraceSink for TraceRecorder {
    fn record(&mut self, kind: TraceEventKind) {
        debug!(event = kind.type_name(), "trace");
        self.events.push(TraceEvent {
            timestamp: now_seconds(),
            kind,
        });
    }
}

fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Writes one JSON object per line.
pub fn write_jsonl<W: Write>(events: &[TraceEvent], mut writer: W) -> Result<()> {
    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Aggregate view over a finished trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TraceSummary {
    pub counts: BTreeMap<String, usize>,
    pub resolved: usize,
    pub fallback: usize,
    pub reanchored: usize,
    pub conflicts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_s: Option<f64>,
    pub decisions: Vec<TraceEvent>,
}

impl TraceSummary {
    pub fn from_events(events: &[TraceEvent]) -> Self {
        let mut summary = Self::default();
        let mut started = None;
        for event in events {
            *summary
                .counts
                .entry(event.kind.type_name().to_string())
                .or_default() += 1;
            match &event.kind {
                TraceEventKind::RunStarted { .. } => started = Some(event.timestamp),
                TraceEventKind::RunFinished {
                    resolved, fallback, ..
                } => {
                    summary.resolved = *resolved;
                    summary.fallback = *fallback;
                    summary.elapsed_s = started.map(|t| (event.timestamp - t).max(0.0));
                }
                TraceEventKind::AnchorReanchored { .. } => summary.reanchored += 1,
                TraceEventKind::ReanchorConflict { .. } => summary.conflicts += 1,
                _ => {}
            }
            if event.kind.is_decision() {
                summary.decisions.push(event.clone());
            }
        }
        summary
    }

    pub fn count(&self, type_name: &str) -> usize {
        self.counts.get(type_name).copied().unwrap_or(0)
    }
}
