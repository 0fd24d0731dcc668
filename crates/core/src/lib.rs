mod candidate;
mod coherence;
mod config;
mod embedding;
mod error;
mod gap_fill;
mod line_index;
mod locator;
mod noise;
mod normalization;
mod outline;
mod resolver;
mod similarity;
mod span;
mod strategy;
mod trace;
mod vector;

pub use candidate::{lexical_match, Candidate, CandidateFinder, SearchRequest, SearchWindow};
pub use coherence::{first_child, reanchor};
pub use config::{FusionWeights, LocatorConfig, SpanMode, StrategyKind, VectorSettings};
pub use embedding::{
    cosine_similarity, EmbeddingCache, EmbeddingKey, EmbeddingProvider, HashEmbedder,
    HashEmbedderConfig, InMemoryEmbeddingCache, NoopEmbeddingCache,
};
pub use error::{LocatorError, Result};
pub use gap_fill::{fill_gaps, identify_gaps, numbering_pattern, NumberingGap};
pub use line_index::{Line, LineIndex, LineRecord, ParsedLine, ParsedPage};
pub use locator::{outline_key, Locator, Placement, Resolution};
pub use noise::{strip_page_reference, NoiseProfile, NoiseSettings, SuppressedReason};
pub use normalization::{
    comparison_form, fold_confusables, folded_form, normalize_line, normalize_number,
    split_leading_number,
};
pub use outline::{
    alpha_to_int, int_to_alpha, number_components, ComponentKind, HeaderDescriptor,
    NumberComponent, PreparedHeader,
};
pub use resolver::{Anchor, ResolutionMethod, SequentialResolver};
pub use similarity::{header_similarity, token_set_ratio, token_sort_ratio, LexicalScore};
pub use span::{build_sections, span_bounds, Section};
pub use strategy::{LocatorStrategy, SequentialStrategy};
pub use trace::{write_jsonl, TraceEvent, TraceEventKind, TraceRecorder, TraceSink, TraceSummary};
pub use vector::{fuse, VectorFusedStrategy};
