//! Nearest-neighbour matching of a probe signature against enrolled signatures.

use crate::types::{DistanceMetric, Signature};

/// Recommended default threshold. Lower is stricter.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.4;

/// Outcome of comparing a probe against the enrolled set.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched {
        /// Index of the nearest enrolled signature.
        index: usize,
        distance: f32,
    },
    NoMatch {
        /// Distance to the nearest candidate, if there was one.
        closest: Option<f32>,
    },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}

/// Strategy for comparing a probe signature against enrolled candidates.
pub trait Matcher {
    fn best_match(&self, probe: &Signature, candidates: &[Signature], threshold: f32) -> MatchOutcome;
}

/// Minimum-distance matcher.
///
/// Always walks every candidate, no early exit, so timing does not depend on
/// where in the store the match sits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestMatcher {
    pub metric: DistanceMetric,
}

impl NearestMatcher {
    pub fn new(metric: DistanceMetric) -> Self {
        Self { metric }
    }
}

impl Matcher for NearestMatcher {
    fn best_match(&self, probe: &Signature, candidates: &[Signature], threshold: f32) -> MatchOutcome {
        let mut best: Option<(usize, f32)> = None;

        for (i, candidate) in candidates.iter().enumerate() {
            let d = self.metric.distance(probe, candidate);
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((i, d)),
            }
        }

        match best {
            Some((index, distance)) if distance < threshold => MatchOutcome::Matched { index, distance },
            Some((_, distance)) => MatchOutcome::NoMatch { closest: Some(distance) },
            None => MatchOutcome::NoMatch { closest: None },
        }
    }
}
