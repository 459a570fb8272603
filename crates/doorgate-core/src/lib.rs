//! doorgate-core — face-gated access control session engine.
//!
//! Enrolls reference faces into a durable store and arbitrates one-shot
//! detection attempts against them. The embedding model sits behind the
//! [`Embedder`] trait; [`OnnxEmbedder`] is the SCRFD + ArcFace backend.

pub mod capture;
pub mod embedder;
pub mod matcher;
pub mod session;
pub mod store;
pub mod types;

pub use capture::{CaptureError, CaptureGate, EmbedError, Embedder};
pub use embedder::OnnxEmbedder;
pub use matcher::{MatchOutcome, Matcher, NearestMatcher, DEFAULT_MATCH_THRESHOLD};
pub use session::{
    EnrollError, EnrollOutcome, SessionConfig, SessionController, SessionView, SubmitOutcome,
    DEFAULT_EXPIRY_WINDOW,
};
pub use store::{FaceStore, StoreError};
pub use types::{DistanceMetric, GateResult, Signature};

/// Per-user data directory: `$XDG_DATA_HOME/doorgate`, falling back to `~/.local/share`.
pub fn default_data_dir() -> std::path::PathBuf {
    let data = std::env::var("XDG_DATA_HOME").map(std::path::PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        std::path::PathBuf::from(home).join(".local/share")
    });
    data.join("doorgate")
}

/// Default model directory: `<data dir>/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    default_data_dir().join("models")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_dir_lives_under_data_dir() {
        let data = default_data_dir();
        assert!(data.ends_with("doorgate"));
        assert_eq!(default_model_dir(), data.join("models"));
    }
}
