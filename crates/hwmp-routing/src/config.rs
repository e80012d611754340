//! HWMP protocol configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{HwmpError, Result};

/// Tunables of one path selection engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HwmpConfig {
    /// Initial TTL of originated control messages and data frames
    pub max_ttl: u8,
    /// Lifetime of a resolved path, refreshed on fresher information
    pub active_path_lifetime_ms: u64,
    /// Minimum interval between two PREQ transmissions on an interface
    pub preq_min_interval_ms: u64,
    /// Minimum interval between two PERR transmissions on an interface
    pub perr_min_interval_ms: u64,
    /// PERR receivers at or above this count get one broadcast instead
    pub unicast_perr_threshold: usize,
    /// PREQs are unicast to each peer only below this many peers
    pub unicast_preq_threshold: usize,
    /// Default Destination-Only flag of originated requests
    pub destination_only: bool,
    /// Default Reply-and-Forward flag of originated requests
    pub reply_and_forward: bool,
    /// Originators remembered for broadcast and PREQ duplicate detection
    pub dedup_capacity: usize,
}

impl Default for HwmpConfig {
    fn default() -> Self {
        Self {
            max_ttl: 32,
            active_path_lifetime_ms: 5000,
            preq_min_interval_ms: 100,
            perr_min_interval_ms: 100,
            unicast_perr_threshold: 32,
            unicast_preq_threshold: 1,
            destination_only: false,
            reply_and_forward: true,
            dedup_capacity: 1024,
        }
    }
}

impl HwmpConfig {
    /// Parse a YAML document and validate it
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: HwmpConfig = serde_yaml::from_str(yaml)
            .map_err(|e| HwmpError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.max_ttl == 0, "max_ttl must be at least 1"),
            (
                self.active_path_lifetime_ms == 0,
                "active_path_lifetime_ms must be non-zero",
            ),
            (
                self.preq_min_interval_ms == 0,
                "preq_min_interval_ms must be non-zero",
            ),
            (
                self.perr_min_interval_ms == 0,
                "perr_min_interval_ms must be non-zero",
            ),
            (
                self.unicast_perr_threshold == 0,
                "unicast_perr_threshold must be at least 1",
            ),
            (
                self.unicast_preq_threshold == 0,
                "unicast_preq_threshold must be at least 1",
            ),
            (self.dedup_capacity == 0, "dedup_capacity must be at least 1"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(HwmpError::InvalidConfig(reason.to_string())),
            None => Ok(()),
        }
    }

    pub fn active_path_lifetime(&self) -> Duration {
        Duration::from_millis(self.active_path_lifetime_ms)
    }

    pub fn preq_min_interval(&self) -> Duration {
        Duration::from_millis(self.preq_min_interval_ms)
    }

    pub fn perr_min_interval(&self) -> Duration {
        Duration::from_millis(self.perr_min_interval_ms)
    }

    /// Lifetime field carried in originated PREQ/PREP elements
    pub fn lifetime_field_ms(&self) -> u32 {
        self.active_path_lifetime_ms.min(u32::MAX as u64) as u32
    }
}
