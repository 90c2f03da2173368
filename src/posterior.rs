use derive_new::new;
use rayon::prelude::*;

use crate::{
    config::ProbabilityMode,
    error::{DataQualityWarning, Error, Result},
    math::{normalize, softmax},
    variant::{CredibleSetEntry, Locus, LocusId},
};

/// Largest tolerated deviation of a locus probability sum from 1.0
pub const PROBABILITY_SUM_TOLERANCE: f64 = 1e-10;

/// Normalized probabilities for one locus, in member order.
#[derive(Debug, Clone, PartialEq)]
pub struct LocusProbabilities {
    pub probabilities: Vec<f64>,
    /// Sum of the weights before normalization. Always 1.0 when recomputing from p-values.
    pub raw_mass: f64,
    pub warnings: Vec<DataQualityWarning>,
}

/// A locus excluded from the output because its probability mass degenerated.
#[derive(Debug, Clone, PartialEq, new)]
pub struct FlaggedLocus {
    pub locus_id: LocusId,
    pub reason: String,
}

/// Calibrator output over all loci.
#[derive(Debug, Clone, Default)]
pub struct CalibrationReport {
    /// Credible-set entries ordered by locus id then descending probability
    pub entries: Vec<CredibleSetEntry>,
    pub flagged: Vec<FlaggedLocus>,
    pub n_loci: usize,
    /// Loci whose provided posteriors summed above 1.0 before renormalizing
    pub n_inflated_loci: usize,
    pub max_raw_mass: f64,
    pub warnings: Vec<DataQualityWarning>,
}

fn instability(locus_id: LocusId, reason: impl Into<String>) -> Error {
    Error::NumericalInstability {
        locus_id,
        reason: reason.into(),
    }
}

/// Computes normalized per-variant probabilities within a locus.
pub fn locus_probabilities(locus: &Locus, mode: ProbabilityMode) -> Result<LocusProbabilities> {
    if locus.is_empty() {
        return Err(instability(locus.id, "locus has no variants"));
    }

    let mut warnings = Vec::new();
    let provided = match mode {
        ProbabilityMode::RecomputeFromPvalue => None,
        ProbabilityMode::RenormalizeExisting => Some(provided_posteriors(locus, &mut warnings)),
    };
    let raw_mass = provided.as_ref().map_or(1.0, |p| p.iter().sum::<f64>());

    if locus.len() == 1 {
        return Ok(LocusProbabilities {
            probabilities: vec![1.0],
            raw_mass,
            warnings,
        });
    }

    let probabilities = match provided {
        None => {
            let log_weights = locus
                .members
                .iter()
                .map(|m| m.variant.log_weight())
                .collect::<Vec<_>>();
            softmax(&log_weights).ok_or_else(|| {
                instability(locus.id, "non-finite log-weights or degenerate softmax sum")
            })?
        }
        Some(provided) => normalize(&provided).ok_or_else(|| {
            instability(
                locus.id,
                format!("provided posteriors are negative, non-finite or sum to {raw_mass}"),
            )
        })?,
    };

    let deviation = (probabilities.iter().sum::<f64>() - 1.0).abs();
    if deviation > PROBABILITY_SUM_TOLERANCE {
        return Err(instability(
            locus.id,
            format!("probabilities deviate from 1.0 by {deviation:e}"),
        ));
    }

    Ok(LocusProbabilities {
        probabilities,
        raw_mass,
        warnings,
    })
}

/// Upstream posteriors in member order; missing values default to 0.0.
fn provided_posteriors(locus: &Locus, warnings: &mut Vec<DataQualityWarning>) -> Vec<f64> {
    locus
        .members
        .iter()
        .map(|m| match m.posterior {
            Some(pp) => pp,
            None => {
                warnings.push(
                    DataQualityWarning::MissingProbability {
                        variant_id: m.variant.id.clone(),
                    }
                    .emit(),
                );
                0.0
            }
        })
        .collect()
}

/// Truncates a locus to its credible set.
///
/// Members are ordered by descending probability (ties keep member order). A member is
/// retained while the cumulative mass before it is strictly below `mass`, so exactly one
/// retained member crosses the threshold.
pub fn credible_set(locus: &Locus, probabilities: &[f64], mass: f64) -> Vec<CredibleSetEntry> {
    let mut order = (0..locus.len()).collect::<Vec<_>>();
    order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));

    let mut entries = Vec::new();
    let mut cumulative = 0.0;
    for index in order {
        if cumulative >= mass {
            break;
        }
        cumulative += probabilities[index];
        entries.push(CredibleSetEntry {
            locus_id: locus.id,
            variant: locus.members[index].variant.clone(),
            probability: probabilities[index],
            cumulative_probability: cumulative,
        });
    }
    entries
}

/// Probabilities plus credible-set truncation for a single locus.
pub fn calibrate_locus(
    locus: &Locus,
    mode: ProbabilityMode,
    mass: f64,
) -> Result<(Vec<CredibleSetEntry>, LocusProbabilities)> {
    let probabilities = locus_probabilities(locus, mode)?;
    let entries = credible_set(locus, &probabilities.probabilities, mass);
    Ok((entries, probabilities))
}

/// Calibrates every locus independently and in parallel.
///
/// A locus that fails is flagged and left out; the others are unaffected.
pub fn calibrate_loci(loci: &[Locus], mode: ProbabilityMode, mass: f64) -> CalibrationReport {
    let outcomes = loci
        .par_iter()
        .map(|locus| (locus.id, calibrate_locus(locus, mode, mass)))
        .collect::<Vec<_>>();

    let mut report = CalibrationReport {
        n_loci: loci.len(),
        ..Default::default()
    };
    for (locus_id, outcome) in outcomes {
        match outcome {
            Ok((entries, probabilities)) => {
                if probabilities.raw_mass > 1.0 + PROBABILITY_SUM_TOLERANCE {
                    report.n_inflated_loci += 1;
                }
                report.max_raw_mass = report.max_raw_mass.max(probabilities.raw_mass);
                report.warnings.extend(probabilities.warnings);
                report.entries.extend(entries);
            }
            Err(err) => {
                tracing::warn!("flagging locus {locus_id}: {err}");
                let reason = match err {
                    Error::NumericalInstability { reason, .. } => reason,
                    other => other.to_string(),
                };
                report.flagged.push(FlaggedLocus::new(locus_id, reason));
            }
        }
    }

    if mode == ProbabilityMode::RenormalizeExisting && report.n_inflated_loci > 0 {
        tracing::info!(
            "renormalized {} loci whose provided posteriors summed above 1.0 (max {:.4})",
            report.n_inflated_loci,
            report.max_raw_mass
        );
    }
    tracing::info!(
        "calibrated {} loci into {} credible-set variants ({} flagged)",
        report.n_loci - report.flagged.len(),
        report.entries.len(),
        report.flagged.len()
    );
    report
}
