use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one transfer path (uploads, downloads and deletes
/// against chunk storage nodes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Budget for establishing one chunk-server connection
    pub connect_timeout: Duration,

    /// Budget for each send call on a write connection
    pub write_timeout: Duration,

    /// Budget for each receive call on a read connection
    pub read_timeout: Duration,

    /// Minimum number of replicas that must durably accept a chunk for the
    /// position to be considered written
    pub quorum: usize,

    /// Depth of the per-replica send queue decoupling the source-read loop
    /// from the slower senders
    pub send_queue_depth: usize,

    /// Cap on candidate attempts (including fast-forward retries) while
    /// reading one chunk position
    pub max_read_attempts: usize,

    /// Width of the fan-out delete pool
    pub delete_concurrency: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            quorum: 1,
            send_queue_depth: 10,
            max_read_attempts: 4,
            delete_concurrency: 5,
        }
    }
}

impl TransferConfig {
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
