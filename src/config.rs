use std::{path::Path, str::FromStr};

use adjustp::{adjust, Procedure};
use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    scoring::RetryPolicy,
};

/// How per-variant posterior probabilities are obtained within a locus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbabilityMode {
    /// Softmax over `-log10(p)` of every variant in the locus
    #[default]
    RecomputeFromPvalue,
    /// Divide upstream-provided posteriors by their locus sum
    RenormalizeExisting,
}

impl FromStr for ProbabilityMode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "recompute_from_pvalue" | "recompute" => Ok(ProbabilityMode::RecomputeFromPvalue),
            "renormalize_existing" | "renormalize" => Ok(ProbabilityMode::RenormalizeExisting),
            _ => Err(Error::Config(format!(
                "unknown probability mode '{s}'; use 'recompute_from_pvalue' or 'renormalize_existing'"
            ))),
        }
    }
}

/// Multiple-testing adjustment applied to empirical p-values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PValueAdjustment {
    None,
    #[default]
    Fdr,
    Bonferroni,
}
impl PValueAdjustment {
    pub fn adjust(&self, pvalues: &[f64]) -> Vec<f64> {
        match self {
            PValueAdjustment::None => pvalues.to_vec(),
            PValueAdjustment::Fdr => adjust(pvalues, Procedure::BenjaminiHochberg),
            PValueAdjustment::Bonferroni => adjust(pvalues, Procedure::Bonferroni),
        }
    }
}

/// Options shared by every stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct PipelineConfig {
    /// Variants at or above this p-value are dropped before clustering
    #[builder(default = 5e-8)]
    pub p_value_threshold: f64,
    /// Maximum gap between consecutive variants of one locus
    #[builder(default = 500_000)]
    pub clustering_window_bp: u64,
    /// Target posterior mass of each credible set
    #[builder(default = 0.95)]
    pub credible_set_mass: f64,
    #[builder(default)]
    pub probability_mode: ProbabilityMode,
    /// Drop variants in the MHC region before clustering
    #[builder(default = false)]
    pub exclude_mhc: bool,
    /// Half-width of the sequence window sent to the scoring service
    #[builder(default = 262_144)]
    pub scoring_flank_bp: u64,
    /// Gene effects with a primary magnitude at or below this are not recorded
    #[builder(default = 0.1)]
    pub min_gene_effect: f64,
    #[builder(default)]
    pub p_value_adjustment: PValueAdjustment,
    #[builder(default)]
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.p_value_threshold > 0.0 && self.p_value_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "p_value_threshold must be in (0, 1], got {}",
                self.p_value_threshold
            )));
        }
        if !(self.credible_set_mass > 0.0 && self.credible_set_mass <= 1.0) {
            return Err(Error::Config(format!(
                "credible_set_mass must be in (0, 1], got {}",
                self.credible_set_mass
            )));
        }
        if !self.min_gene_effect.is_finite() || self.min_gene_effect < 0.0 {
            return Err(Error::Config(format!(
                "min_gene_effect must be a non-negative number, got {}",
                self.min_gene_effect
            )));
        }
        self.retry.validate()
    }
}
