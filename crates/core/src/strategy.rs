use crate::candidate::Candidate;
use crate::config::{LocatorConfig, StrategyKind};
use crate::outline::PreparedHeader;
use crate::resolver::ResolutionMethod;

/// Scoring policy plugged into the candidate finder.
///
/// The finder produces lexical candidates; a strategy decides the lexical floor and
/// may attach further signals or veto a candidate.
pub trait LocatorStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn method(&self) -> ResolutionMethod;

    fn lexical_floor(&self) -> f32;

    fn enrich(&self, header: &PreparedHeader, candidate: Candidate) -> Option<Candidate>;
}

/// Lexical-only scoring against `fuzzy_threshold`.
#[derive(Debug, Clone)]
pub struct SequentialStrategy {
    threshold: f32,
}

impl SequentialStrategy {
    pub fn new(config: &LocatorConfig) -> Self {
        Self {
            threshold: config.fuzzy_threshold,
        }
    }
}

impl LocatorStrategy for SequentialStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sequential
    }

    fn method(&self) -> ResolutionMethod {
        ResolutionMethod::Sequential
    }

    fn lexical_floor(&self) -> f32 {
        self.threshold
    }

    fn enrich(&self, _header: &PreparedHeader, candidate: Candidate) -> Option<Candidate> {
        Some(candidate)
    }
}
