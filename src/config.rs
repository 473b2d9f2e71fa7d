use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_MAX_CONCURRENCY: usize = 8;
const DEFAULT_LOW_CONFIDENCE_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on simultaneously running diagnoses in a batch.
    pub max_concurrency: usize,
    /// Host-imposed limit per diagnosis; `None` disables it.
    pub diagnosis_timeout: Option<Duration>,
    /// Results whose aggregate confidence falls below this are flagged.
    pub low_confidence_threshold: f64,
    pub catalog_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            diagnosis_timeout: None,
            low_confidence_threshold: DEFAULT_LOW_CONFIDENCE_THRESHOLD,
            catalog_path: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(value) = std::env::var("DIAGNOSTIC_MAX_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            config.max_concurrency = value.max(1);
        }

        config.diagnosis_timeout = std::env::var("DIAGNOSTIC_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        if let Some(value) = std::env::var("DIAGNOSTIC_LOW_CONFIDENCE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
        {
            config.low_confidence_threshold = value.clamp(0.0, 1.0);
        }

        config.catalog_path = std::env::var("DIAGNOSTIC_CATALOG_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        config
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.diagnosis_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_level: String,
    pub file_logs: bool,
    pub log_dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            file_logs: false,
            log_dir: PathBuf::from("./logs"),
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let file_logs = std::env::var("ENABLE_FILE_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let log_dir = std::env::var("LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./logs"));

        Self {
            log_level,
            file_logs,
            log_dir,
        }
    }
}
