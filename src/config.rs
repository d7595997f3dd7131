//! Session settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compare::DEFAULT_UNCERTAINTY;
use crate::cursor::LengthPrefix;
use crate::frame::PROTOCOL_VERSION;
use crate::merge::MergePolicy;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Relative theory uncertainty used by `SessionController::compare`.
    pub uncertainty: f64,
    pub merge_policy: MergePolicy,
    /// Length prefix for strings and JSON blobs in incoming frames.
    pub string_prefix: LengthPrefix,
    /// How often `run` wakes up to check for a close request.
    pub poll_interval_ms: u64,
    /// Version announced in the `handshake` action.
    pub handshake_version: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            uncertainty: DEFAULT_UNCERTAINTY,
            merge_policy: MergePolicy::default(),
            string_prefix: LengthPrefix::default(),
            poll_interval_ms: 100,
            handshake_version: PROTOCOL_VERSION,
        }
    }
}

impl SessionConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let config: SessionConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {}", path.display(), e))?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.uncertainty.is_finite() && self.uncertainty >= 0.0) {
            anyhow::bail!("uncertainty must be a non-negative number, got {}", self.uncertainty);
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be positive");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
