use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Face signature vector (512-dimensional for ArcFace).
///
/// Immutable once produced by an [`Embedder`](crate::Embedder); compared only
/// through a [`DistanceMetric`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    values: Vec<f32>,
}

impl Signature {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean (L2) distance. Non-negative, zero for identical vectors.
    pub fn euclidean_distance(&self, other: &Signature) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine distance `1 - cos(a, b)`, clamped to [0, 2].
    ///
    /// A zero vector is treated as maximally distant from everything.
    pub fn cosine_distance(&self, other: &Signature) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        let similarity = if denom > 0.0 { dot / denom } else { -1.0 };
        (1.0 - similarity).clamp(0.0, 2.0)
    }
}

/// Distance function used by the matcher. Lower means more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Cosine,
}

impl DistanceMetric {
    pub fn distance(&self, a: &Signature, b: &Signature) -> f32 {
        match self {
            DistanceMetric::Euclidean => a.euclidean_distance(b),
            DistanceMetric::Cosine => a.cosine_distance(b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::Cosine => "cosine",
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(format!("unknown distance metric '{other}' (expected euclidean or cosine)")),
        }
    }
}

/// Decision shown to viewers and consulted by the door actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateResult {
    Ready,
    Authorized,
    Unauthorized,
}

impl GateResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateResult::Ready => "READY",
            GateResult::Authorized => "AUTHORIZED",
            GateResult::Unauthorized => "UNAUTHORIZED",
        }
    }
}

impl fmt::Display for GateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_identical_is_zero() {
        let a = Signature::new(vec![0.3, -0.2, 0.9]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_euclidean_symmetric() {
        let a = Signature::new(vec![1.0, 0.0]);
        let b = Signature::new(vec![0.0, 1.0]);
        assert!((a.euclidean_distance(&b) - 2f32.sqrt()).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&b), b.euclidean_distance(&a));
    }

    #[test]
    fn test_cosine_distance_identical_and_opposite() {
        let a = Signature::new(vec![1.0, 0.0]);
        let b = Signature::new(vec![-1.0, 0.0]);
        assert!(a.cosine_distance(&a.clone()).abs() < 1e-6);
        assert!((a.cosine_distance(&b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_zero_vector() {
        let a = Signature::new(vec![0.0, 0.0]);
        let b = Signature::new(vec![1.0, 0.0]);
        assert_eq!(a.cosine_distance(&b), 2.0);
    }

    #[test]
    fn test_metric_from_str() {
        assert_eq!("Euclidean".parse::<DistanceMetric>(), Ok(DistanceMetric::Euclidean));
        assert_eq!(" cosine ".parse::<DistanceMetric>(), Ok(DistanceMetric::Cosine));
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }

    #[test]
    fn test_gate_result_display() {
        assert_eq!(GateResult::Ready.to_string(), "READY");
        assert_eq!(GateResult::Unauthorized.as_str(), "UNAUTHORIZED");
    }
}
