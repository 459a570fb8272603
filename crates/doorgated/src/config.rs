use doorgate_core::{DistanceMetric, SessionConfig, DEFAULT_MATCH_THRESHOLD};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the SCRFD and ArcFace ONNX files.
    pub model_dir: PathBuf,
    /// Path to the SQLite face store.
    pub db_path: PathBuf,
    /// Distance below which a probe counts as a match.
    pub match_threshold: f32,
    pub distance_metric: DistanceMetric,
    /// Seconds an AUTHORIZED/UNAUTHORIZED result stays visible.
    pub result_expiry_secs: u64,
    /// Upper bound on any single arm/submit/enroll request.
    pub capture_timeout_secs: u64,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `DOORGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("DOORGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| doorgate_core::default_model_dir());

        let db_path = std::env::var("DOORGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| doorgate_core::default_data_dir().join("faces.db"));

        let distance_metric = match std::env::var("DOORGATE_DISTANCE") {
            Ok(v) => v.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ignoring DOORGATE_DISTANCE");
                DistanceMetric::default()
            }),
            Err(_) => DistanceMetric::default(),
        };

        Self {
            model_dir,
            db_path,
            match_threshold: env_parse("DOORGATE_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            distance_metric,
            result_expiry_secs: env_parse("DOORGATE_RESULT_EXPIRY_SECS", 3),
            capture_timeout_secs: env_parse("DOORGATE_CAPTURE_TIMEOUT_SECS", 10),
            session_bus: std::env::var("DOORGATE_SESSION_BUS")
                .map(|v| v != "0")
                .unwrap_or(false),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            threshold: self.match_threshold,
            metric: self.distance_metric,
            expiry_window: Duration::from_secs(self.result_expiry_secs),
        }
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs.max(1))
    }
}

/// Parse `key` as `T`, falling back to `default` when unset or malformed.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable value");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parsers_fall_back_on_garbage() {
        std::env::set_var("DOORGATE_TEST_F32", "not-a-number");
        std::env::set_var("DOORGATE_TEST_U64", " 42 ");
        assert_eq!(env_parse("DOORGATE_TEST_F32", 0.4_f32), 0.4);
        assert_eq!(env_parse("DOORGATE_TEST_U64", 3_u64), 42);
        assert_eq!(env_parse("DOORGATE_TEST_UNSET", 7_u64), 7);
        std::env::remove_var("DOORGATE_TEST_F32");
        std::env::remove_var("DOORGATE_TEST_U64");
    }

    #[test]
    fn test_session_config_mapping() {
        let config = Config {
            model_dir: PathBuf::from("/models"),
            db_path: PathBuf::from("/faces.db"),
            match_threshold: 0.35,
            distance_metric: DistanceMetric::Cosine,
            result_expiry_secs: 5,
            capture_timeout_secs: 0,
            session_bus: true,
        };
        let session = config.session_config();
        assert_eq!(session.threshold, 0.35);
        assert_eq!(session.metric, DistanceMetric::Cosine);
        assert_eq!(session.expiry_window, Duration::from_secs(5));
        assert_eq!(config.capture_timeout(), Duration::from_secs(1));
    }
}
