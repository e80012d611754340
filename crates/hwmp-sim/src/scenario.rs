//! Scenario files for simulation runs

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use hwmp_protocol::Metric;
use hwmp_routing::HwmpConfig;

/// Undirected link between two node indices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub a: usize,
    pub b: usize,
    #[serde(default = "default_metric")]
    pub metric: Metric,
    /// Probability in `[0, 1]` that a frame on this link is lost
    #[serde(default)]
    pub loss: f64,
}

fn default_metric() -> Metric {
    1
}

fn default_link_delay_ms() -> u64 {
    1
}

fn default_channel() -> u16 {
    1
}

/// Topology and protocol settings of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub nodes: usize,
    #[serde(default)]
    pub links: Vec<LinkConfig>,
    #[serde(default = "default_link_delay_ms")]
    pub link_delay_ms: u64,
    #[serde(default = "default_channel")]
    pub channel: u16,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub hwmp: HwmpConfig,
}

impl ScenarioConfig {
    /// `nodes` nodes in a chain with unit metrics and no loss
    pub fn line(nodes: usize) -> Self {
        let links = (1..nodes)
            .map(|b| LinkConfig {
                a: b - 1,
                b,
                metric: default_metric(),
                loss: 0.0,
            })
            .collect();
        ScenarioConfig {
            nodes,
            links,
            link_delay_ms: default_link_delay_ms(),
            channel: default_channel(),
            seed: 0,
            hwmp: HwmpConfig::default(),
        }
    }

    /// Load and validate a YAML scenario file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| format!("Invalid scenario file {}", path.display()))
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let scenario: ScenarioConfig =
            serde_yaml::from_str(yaml).context("Failed to parse scenario")?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes == 0 {
            bail!("scenario needs at least one node");
        }

        let mut seen = HashSet::new();
        for link in &self.links {
            if link.a >= self.nodes || link.b >= self.nodes {
                bail!(
                    "link {}-{} names a node outside 0..{}",
                    link.a,
                    link.b,
                    self.nodes
                );
            }
            if link.a == link.b {
                bail!("link {}-{} connects a node to itself", link.a, link.b);
            }
            if !(0.0..=1.0).contains(&link.loss) {
                bail!("link {}-{} loss {} is not a probability", link.a, link.b, link.loss);
            }
            if !seen.insert((link.a.min(link.b), link.a.max(link.b))) {
                bail!("link {}-{} is listed twice", link.a, link.b);
            }
        }

        self.hwmp.validate().context("Invalid hwmp section")?;
        Ok(())
    }
}
