use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory receiving headshot JPEG crops.
    pub headshot_dir: PathBuf,
    /// Public base URL under which the headshot directory is served.
    pub headshot_base_url: String,
    /// Cosine similarity threshold for a positive identity match.
    pub match_threshold: f32,
    /// Timeout in seconds for a single store round-trip in the matcher.
    pub store_timeout_secs: u64,
    /// Minimum seconds between agent notifications for the same identity.
    pub notify_interval_secs: u64,
    /// Detection frame queue depth; frames beyond this are dropped.
    pub frame_queue_depth: usize,
}

impl Config {
    /// Load configuration from `LOOKOUT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("lookout");

        let db_path = std::env::var("LOOKOUT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("lookout.db"));

        let headshot_dir = std::env::var("LOOKOUT_HEADSHOT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("headshots"));

        Self {
            db_path,
            headshot_dir,
            headshot_base_url: std::env::var("LOOKOUT_HEADSHOT_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080/headshots".to_string()),
            match_threshold: env_f32(
                "LOOKOUT_MATCH_THRESHOLD",
                lookout_core::DEFAULT_MATCH_THRESHOLD,
            ),
            store_timeout_secs: env_u64("LOOKOUT_STORE_TIMEOUT_SECS", 5),
            notify_interval_secs: env_u64("LOOKOUT_NOTIFY_INTERVAL_SECS", 30),
            frame_queue_depth: env_usize("LOOKOUT_FRAME_QUEUE_DEPTH", 4),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
