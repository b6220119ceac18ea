//! Runtime Configuration
//!
//! Tunables for a scope tree. Every field has a default, so an empty JSON
//! object is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum number of dirty digest passes before giving up.
    pub digest_ttl: usize,
    /// Delay before the digest scheduled by `eval_async` runs.
    pub eval_async_delay_ms: u64,
    /// Delay before queued `apply_async` work is flushed.
    pub apply_async_delay_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            digest_ttl: 10,
            eval_async_delay_ms: 0,
            apply_async_delay_ms: 0,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_digest_ttl(mut self, ttl: usize) -> Self {
        self.digest_ttl = ttl;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.digest_ttl == 0 {
            return Err(Error::Config("digest_ttl must be at least 1".into()));
        }
        Ok(())
    }
}
