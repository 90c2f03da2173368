use std::collections::{BTreeMap, HashMap};

use derive_new::new;
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    effects::{ModalityVector, VariantEffect},
    error::DataQualityWarning,
    variant::{CredibleSetEntry, LocusId},
};

/// A variant and its causal probability, as consumed by the aggregator.
#[derive(Debug, Clone, PartialEq, new)]
pub struct WeightedVariant {
    pub variant_id: String,
    pub locus_id: Option<LocusId>,
    /// `None` when the source table had no probability for this variant
    pub probability: Option<f64>,
}

impl From<&CredibleSetEntry> for WeightedVariant {
    fn from(entry: &CredibleSetEntry) -> Self {
        Self::new(
            entry.variant.id.clone(),
            Some(entry.locus_id),
            Some(entry.probability),
        )
    }
}

/// Probability-weighted regulatory burden of one gene.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneScore {
    pub gene: String,
    /// Sum of primary effect times probability
    pub weighted_score: f64,
    /// Largest unweighted primary effect seen, kept for diagnostics
    pub max_score: f64,
    /// Contributing variants with positive probability
    pub n_variants: usize,
    /// Per-modality sums of effect times probability
    pub modality_scores: ModalityVector,
}

impl GeneScore {
    /// A universe gene that no variant reached.
    pub fn empty(gene: impl Into<String>) -> Self {
        Self {
            gene: gene.into(),
            weighted_score: 0.0,
            max_score: 0.0,
            n_variants: 0,
            modality_scores: ModalityVector::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregationReport {
    /// One score per gene with a contribution, sorted by gene
    pub scores: Vec<GeneScore>,
    pub n_contributing_variants: usize,
    pub warnings: Vec<DataQualityWarning>,
}

/// One variant's effect on one gene, scaled by the variant's probability.
struct Contribution<'a> {
    variant_id: &'a str,
    locus_id: Option<LocusId>,
    probability: f64,
    primary: f64,
    modalities: &'a ModalityVector,
}

/// Replaces missing or invalid probabilities with 0.0, recording a warning for each.
fn sanitize_probabilities(
    variants: &[WeightedVariant],
    warnings: &mut Vec<DataQualityWarning>,
) -> Vec<f64> {
    variants
        .iter()
        .map(|v| match v.probability {
            Some(p) if p.is_finite() && p >= 0.0 => p,
            Some(value) => {
                warnings.push(
                    DataQualityWarning::InvalidProbability {
                        variant_id: v.variant_id.clone(),
                        value,
                    }
                    .emit(),
                );
                0.0
            }
            None => {
                warnings.push(
                    DataQualityWarning::MissingProbability {
                        variant_id: v.variant_id.clone(),
                    }
                    .emit(),
                );
                0.0
            }
        })
        .collect()
}

fn fold_gene(gene: &str, mut contributions: Vec<Contribution<'_>>) -> GeneScore {
    // Fixed summation order keeps the result independent of input order and thread count.
    contributions.sort_by(|a, b| (a.variant_id, a.locus_id).cmp(&(b.variant_id, b.locus_id)));

    let mut score = GeneScore::empty(gene);
    score.max_score = f64::NEG_INFINITY;
    for c in &contributions {
        score.weighted_score += c.primary * c.probability;
        score.modality_scores.add_scaled(c.modalities, c.probability);
        score.max_score = score.max_score.max(c.primary);
        score.n_variants += 1;
    }
    score
}

/// Accumulates probability-weighted effects into per-gene scores.
///
/// Only variants with a positive probability and an effect record contribute. For each
/// target gene of such a variant the primary effect feeds `weighted_score` and `max_score`
/// and each modality effect feeds its own accumulator.
pub fn aggregate_gene_scores(
    variants: &[WeightedVariant],
    effects: &HashMap<String, VariantEffect>,
) -> AggregationReport {
    let mut warnings = Vec::new();
    let probabilities = sanitize_probabilities(variants, &mut warnings);

    let mut contributing = Vec::new();
    for (variant, &probability) in variants.iter().zip(&probabilities) {
        if probability <= 0.0 {
            continue;
        }
        match effects.get(&variant.variant_id) {
            Some(effect) => contributing.push((variant, probability, effect)),
            None => warnings.push(
                DataQualityWarning::MissingEffect {
                    variant_id: variant.variant_id.clone(),
                }
                .emit(),
            ),
        }
    }

    let mut by_gene: BTreeMap<&str, Vec<Contribution<'_>>> = BTreeMap::new();
    for (variant, probability, effect) in &contributing {
        for target in &effect.targets {
            by_gene
                .entry(target.gene.as_str())
                .or_default()
                .push(Contribution {
                    variant_id: &variant.variant_id,
                    locus_id: variant.locus_id,
                    probability: *probability,
                    primary: target.primary,
                    modalities: &target.modalities,
                });
        }
    }

    let scores = by_gene
        .into_par_iter()
        .map(|(gene, contributions)| fold_gene(gene, contributions))
        .collect::<Vec<_>>();

    tracing::info!(
        "aggregated {} variants into {} gene scores",
        contributing.len(),
        scores.len()
    );
    AggregationReport {
        scores,
        n_contributing_variants: contributing.len(),
        warnings,
    }
}
