//! Runtime configuration

use std::path::PathBuf;
use std::time::Duration;

/// Default simulated thinking delay of the discovery dialogue
pub const DEFAULT_THINKING_MS: u64 = 1000;

/// File name of the task slot inside the data directory
const DATA_FILE_NAME: &str = "tasks.json";

/// Settings shared by the CLI and the API server
#[derive(Clone, Debug)]
pub struct Config {
    /// Where the task collection is stored
    pub data_file: PathBuf,
    /// How long the dialogue "thinks" before replying
    pub thinking_latency: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            thinking_latency: Duration::from_millis(DEFAULT_THINKING_MS),
        }
    }
}

/// `<platform data dir>/mindflow/tasks.json`, or `./mindflow/tasks.json` when
/// the platform has no data directory
pub fn default_data_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mindflow")
        .join(DATA_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.thinking_latency, Duration::from_millis(1000));
        assert!(config.data_file.ends_with("mindflow/tasks.json"));
    }
}
