use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::concurrency::SelectionStrategy;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Default step length for `step_default` and `run_until`.
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Upper bound on immediate batches within one step.
    #[serde(default = "default_max_immediate_iterations")]
    pub max_immediate_iterations: usize,
    #[serde(default)]
    pub strategy: SelectionStrategy,
    /// How many maximal sets the finder offers to the strategy.
    #[serde(default = "default_candidate_sets")]
    pub candidate_sets: usize,
    /// Seed for stochastic delays and random selection; entropy when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dt: default_dt(),
            max_immediate_iterations: default_max_immediate_iterations(),
            strategy: SelectionStrategy::default(),
            candidate_sets: default_candidate_sets(),
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: SimulationConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.dt.is_finite() && self.dt > 0.0,
            "dt must be positive, got {}",
            self.dt
        );
        ensure!(
            self.max_immediate_iterations > 0,
            "max_immediate_iterations must be at least 1"
        );
        ensure!(self.candidate_sets > 0, "candidate_sets must be at least 1");
        Ok(())
    }
}

fn default_dt() -> f64 {
    0.1
}

fn default_max_immediate_iterations() -> usize {
    1000
}

fn default_candidate_sets() -> usize {
    4
}
