use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LocatorError, Result};
use crate::noise::NoiseSettings;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Sequential,
    VectorFused,
}

impl FromStr for StrategyKind {
    type Err = LocatorError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "sequential" | "fuzzy" => Ok(Self::Sequential),
            "vector" | "vector_fused" | "vector-fused" => Ok(Self::VectorFused),
            other => Err(LocatorError::config(format!("unknown strategy: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpanMode {
    /// A section runs until the next header at the same or a shallower level.
    #[default]
    Nested,
    /// A section runs until the next header of any level.
    Flat,
}

impl FromStr for SpanMode {
    type Err = LocatorError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "nested" => Ok(Self::Nested),
            "flat" => Ok(Self::Flat),
            other => Err(LocatorError::config(format!("unknown span mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FusionWeights {
    pub lexical: f32,
    pub cosine: f32,
    pub font: f32,
    pub vertical: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            lexical: 0.55,
            cosine: 0.30,
            font: 0.10,
            vertical: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VectorSettings {
    pub weights: FusionWeights,
    pub min_lexical: f32,
    pub min_cosine: f32,
    /// Lines after the candidate folded into its embedding context.
    pub context_lines: usize,
    /// Highest-lexical lines embedded per header.
    pub max_candidates: usize,
    pub embedding_timeout_ms: u64,
    /// Stop calling the provider after this many failed calls in one run.
    /// `None` keeps trying every remaining line.
    pub max_embedding_failures: Option<usize>,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
            min_lexical: 0.30,
            min_cosine: 0.25,
            context_lines: 2,
            max_candidates: 25,
            embedding_timeout_ms: 5_000,
            max_embedding_failures: None,
        }
    }
}

/// Every tunable of a resolution run. Built once at the boundary, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocatorConfig {
    pub strategy: StrategyKind,
    pub span_mode: SpanMode,
    pub fuzzy_threshold: f32,
    pub window_pad: usize,
    pub search_span: usize,
    pub max_retries: u32,
    pub require_numeric_prefix: bool,
    pub strict_monotonic: bool,
    pub prefer_last_match: bool,
    pub normalize_confusables: bool,
    pub child_lookahead_lines: usize,
    pub child_hint_bonus: f32,
    pub reanchor: bool,
    pub fill_numbering_gaps: bool,
    pub noise: NoiseSettings,
    pub vector: VectorSettings,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Sequential,
            span_mode: SpanMode::Nested,
            fuzzy_threshold: 0.80,
            window_pad: 40,
            search_span: 400,
            max_retries: 2,
            require_numeric_prefix: true,
            strict_monotonic: true,
            prefer_last_match: true,
            normalize_confusables: true,
            child_lookahead_lines: 30,
            child_hint_bonus: 0.05,
            reanchor: true,
            fill_numbering_gaps: false,
            noise: NoiseSettings::default(),
            vector: VectorSettings::default(),
        }
    }
}

impl LocatorConfig {
    pub fn validate(&self) -> Result<()> {
        unit_interval("fuzzy_threshold", self.fuzzy_threshold)?;
        unit_interval("child_hint_bonus", self.child_hint_bonus)?;
        unit_interval("noise.running_min_fraction", self.noise.running_min_fraction)?;
        unit_interval("vector.min_lexical", self.vector.min_lexical)?;
        unit_interval("vector.min_cosine", self.vector.min_cosine)?;
        if self.search_span == 0 {
            return Err(LocatorError::config("search_span must be positive"));
        }
        if self.noise.toc_min_run == 0 {
            return Err(LocatorError::config("noise.toc_min_run must be positive"));
        }
        let w = &self.vector.weights;
        for (name, value) in [
            ("lexical", w.lexical),
            ("cosine", w.cosine),
            ("font", w.font),
            ("vertical", w.vertical),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(LocatorError::config(format!(
                    "fusion weight {name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.strategy == StrategyKind::VectorFused {
            if w.lexical + w.cosine <= 0.0 {
                return Err(LocatorError::config(
                    "vector mode needs a positive lexical or cosine weight",
                ));
            }
            if self.vector.embedding_timeout_ms == 0 {
                return Err(LocatorError::config("vector.embedding_timeout_ms must be positive"));
            }
            if self.vector.max_embedding_failures == Some(0) {
                return Err(LocatorError::config("vector.max_embedding_failures must be positive"));
            }
        }
        Ok(())
    }

    /// Lexical floor candidates must clear for the active strategy.
    pub fn lexical_floor(&self) -> f32 {
        match self.strategy {
            StrategyKind::Sequential => self.fuzzy_threshold,
            StrategyKind::VectorFused => self.vector.min_lexical,
        }
    }
}

fn unit_interval(name: &str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(LocatorError::config(format!(
            "{name} must lie in [0, 1], got {value}"
        )))
    }
}
