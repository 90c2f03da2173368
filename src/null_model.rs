//! Empirical null calibration of gene scores.
//!
//! The background is the whole gene universe, zero-scoring genes included. Z-scores use
//! the population mean and standard deviation of that background; empirical p-values are
//! rank-based and make no distributional assumption.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use itertools::Itertools;

use crate::{
    aggregate::GeneScore,
    config::PValueAdjustment,
    effects::{Modality, ModalitySchema},
    error::{DataQualityWarning, Error, Result},
    math::{descending_ranks, z_scores},
    results::{CalibratedGeneScore, CalibratedResults},
};

/// The background gene list, deduplicated with first-seen order preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneUniverse {
    genes: Vec<String>,
}

impl GeneUniverse {
    /// Fails with [`Error::Universe`] when no gene names remain after trimming.
    pub fn new<I, S>(genes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let genes = genes
            .into_iter()
            .map(Into::into)
            .map(|g: String| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .unique()
            .collect::<Vec<_>>();
        if genes.is_empty() {
            return Err(Error::Universe("gene universe is empty".into()));
        }
        Ok(Self { genes })
    }

    /// Loads the universe from a delimited file with a resolvable gene column.
    pub fn from_path(path: &Path) -> Result<Self> {
        crate::io::read_gene_universe(path)
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn contains(&self, gene: &str) -> bool {
        self.genes.iter().any(|g| g == gene)
    }

    pub fn genes(&self) -> &[String] {
        &self.genes
    }
}

pub struct NullCalibration {
    pub results: CalibratedResults,
    /// Scored genes that were added to the background because the universe lacked them
    pub n_outside_universe: usize,
    pub warnings: Vec<DataQualityWarning>,
}

/// Builds the full background: universe genes in order, then scored genes the universe
/// lacks.
fn background(
    scores: &[GeneScore],
    universe: &GeneUniverse,
    warnings: &mut Vec<DataQualityWarning>,
) -> Vec<CalibratedGeneScore> {
    let mut by_gene = scores
        .iter()
        .map(|s| (s.gene.as_str(), s))
        .collect::<HashMap<_, _>>();
    let universe_genes = universe
        .genes()
        .iter()
        .map(String::as_str)
        .collect::<HashSet<_>>();

    let mut full = universe
        .genes()
        .iter()
        .map(|gene| {
            let score = by_gene
                .remove(gene.as_str())
                .cloned()
                .unwrap_or_else(|| GeneScore::empty(gene.as_str()));
            CalibratedGeneScore::new(score, true)
        })
        .collect::<Vec<_>>();

    for score in scores {
        if universe_genes.contains(score.gene.as_str()) || !by_gene.contains_key(score.gene.as_str()) {
            continue;
        }
        by_gene.remove(score.gene.as_str());
        warnings.push(
            DataQualityWarning::GeneOutsideUniverse {
                gene: score.gene.clone(),
            }
            .emit(),
        );
        full.push(CalibratedGeneScore::new(score.clone(), false));
    }
    full
}

/// Calibrates gene scores against the universe background.
///
/// Every universe gene appears in the output, and scored genes outside the universe are
/// kept. Z-scores are computed for the combined score and for each modality present in
/// `schema`; absent modalities get 0.0.
pub fn calibrate_against_null(
    scores: &[GeneScore],
    universe: &GeneUniverse,
    schema: &ModalitySchema,
    adjustment: PValueAdjustment,
) -> NullCalibration {
    let mut warnings = Vec::new();
    let mut full = background(scores, universe, &mut warnings);
    let n_outside_universe = full.iter().filter(|g| !g.in_universe).count();
    let total = full.len();

    let combined = full
        .iter()
        .map(|g| g.score.weighted_score)
        .collect::<Vec<_>>();
    for (gene, z) in full.iter_mut().zip(z_scores(&combined)) {
        gene.z_score = z;
    }

    for modality in schema.present() {
        let column = full
            .iter()
            .map(|g| g.score.modality_scores[modality])
            .collect::<Vec<_>>();
        for (gene, z) in full.iter_mut().zip(z_scores(&column)) {
            gene.modality_z[modality] = z;
        }
    }

    let ranks = descending_ranks(&combined);
    let empirical = ranks
        .iter()
        .map(|&rank| rank as f64 / total as f64)
        .collect::<Vec<_>>();
    let adjusted = adjustment.adjust(&empirical);
    for (i, gene) in full.iter_mut().enumerate() {
        gene.rank = ranks[i];
        gene.empirical_p_value = empirical[i];
        gene.empirical_q_value = adjusted[i];
    }

    tracing::info!(
        "calibrated {} genes ({} universe, {} outside universe, {} with nonzero score)",
        total,
        universe.len(),
        n_outside_universe,
        full.iter().filter(|g| g.score.weighted_score != 0.0).count()
    );

    NullCalibration {
        results: CalibratedResults::from_vec(full, schema.clone()),
        n_outside_universe,
        warnings,
    }
}
