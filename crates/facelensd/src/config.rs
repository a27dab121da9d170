use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind (default: 127.0.0.1).
    pub host: String,
    /// TCP port (default: 5001).
    pub port: u16,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Root of the identity gallery.
    pub gallery_dir: PathBuf,
    /// Number of engine threads; each loads its own model sessions.
    pub workers: usize,
    /// Upper bound on one analyze/recognize request, queueing included.
    pub inference_timeout_secs: u64,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// Font used for face labels. Without one only boxes are drawn.
    pub font_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `FACELENS_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed_with<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }

        Self {
            host: lookup("FACELENS_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            // HTTP_PLATFORM_PORT is set when running behind IIS HttpPlatformHandler.
            port: parsed_with(&lookup, "FACELENS_PORT")
                .or_else(|| parsed_with(&lookup, "HTTP_PLATFORM_PORT"))
                .unwrap_or(5001),
            model_dir: lookup("FACELENS_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(facelens_core::default_model_dir),
            gallery_dir: lookup("FACELENS_GALLERY_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("known_faces_db")),
            workers: parsed_with(&lookup, "FACELENS_WORKERS").filter(|&n: &usize| n > 0).unwrap_or(4),
            inference_timeout_secs: parsed_with(&lookup, "FACELENS_INFERENCE_TIMEOUT_SECS")
                .filter(|&n: &u64| n > 0)
                .unwrap_or(30),
            max_body_bytes: parsed_with(&lookup, "FACELENS_MAX_BODY_BYTES").unwrap_or(32 * 1024 * 1024),
            font_path: lookup("FACELENS_FONT_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }
}
