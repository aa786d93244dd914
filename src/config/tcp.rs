use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub bind_addr: String,
    pub bind_port: u16,
    /// TCP keep-alive probe interval for accepted connections
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            bind_port: 502,
            keep_alive: Duration::from_secs(60),
        }
    }
}
