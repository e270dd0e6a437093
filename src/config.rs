//! Engine configuration
//!
//! Defaults are usable as-is; a TOML file may override any subset of fields and
//! `DERIVATEX_*` environment variables override both.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// When the tree grower stops expanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppingPolicy {
    /// Stop the whole tree at the first child with an ERRONEOUS-majority branch
    FirstErroneousMajority,
    /// Keep expanding every branch until its examples share one label
    Purity,
}

impl StoppingPolicy {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "first_erroneous_majority" => Some(StoppingPolicy::FirstErroneousMajority),
            "purity" => Some(StoppingPolicy::Purity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database_path: String,
    /// Only records with an id at or below this cutoff are used for training
    pub population_id_cutoff: i64,
    /// Share of each label's examples routed to the training subset
    pub train_fraction: f64,
    /// Seed for train/test partitioning; entropy when unset
    pub rng_seed: Option<u64>,
    pub max_iterations: usize,
    /// Stop once unexplained errors fall below this share of the total
    pub residual_stop_fraction: f64,
    /// Trees explaining less than this share of all errors are discarded
    pub min_contribution: f64,
    pub max_depth: usize,
    pub stopping_policy: StoppingPolicy,
    /// Share of true positives one field/value must reach to be suggested
    pub suggestion_threshold: f64,
    /// Records traded within this many days are checked by `flags`
    pub flag_window_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: "./derivatex.db".to_string(),
            population_id_cutoff: 5000,
            train_fraction: 0.8,
            rng_seed: None,
            max_iterations: 10,
            residual_stop_fraction: 0.10,
            min_contribution: 0.05,
            max_depth: 6,
            stopping_policy: StoppingPolicy::FirstErroneousMajority,
            suggestion_threshold: 0.9,
            flag_window_days: 30,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("DERIVATEX_DATABASE_PATH") {
            self.database_path = v;
        }
        if let Some(v) = env_parse("DERIVATEX_POPULATION_ID_CUTOFF") {
            self.population_id_cutoff = v;
        }
        if let Some(v) = env_parse("DERIVATEX_TRAIN_FRACTION") {
            self.train_fraction = v;
        }
        if let Some(v) = env_parse("DERIVATEX_RNG_SEED") {
            self.rng_seed = Some(v);
        }
        if let Some(v) = env_parse("DERIVATEX_MAX_ITERATIONS") {
            self.max_iterations = v;
        }
        if let Some(v) = env_parse("DERIVATEX_MAX_DEPTH") {
            self.max_depth = v;
        }
        if let Some(v) = std::env::var("DERIVATEX_STOPPING_POLICY")
            .ok()
            .and_then(|v| StoppingPolicy::parse(&v))
        {
            self.stopping_policy = v;
        }
        if let Some(v) = env_parse("DERIVATEX_FLAG_WINDOW_DAYS") {
            self.flag_window_days = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fractions = [
            ("train_fraction", self.train_fraction),
            ("residual_stop_fraction", self.residual_stop_fraction),
            ("min_contribution", self.min_contribution),
            ("suggestion_threshold", self.suggestion_threshold),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }
        if self.max_depth == 0 {
            return Err(Error::Config("max_depth must be at least 1".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
