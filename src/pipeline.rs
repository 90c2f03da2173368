use std::{collections::HashMap, fmt};

use serde::Serialize;

use crate::{
    aggregate::{aggregate_gene_scores, GeneScore, WeightedVariant},
    clustering::{cluster_loci, exclude_regions, filter_significant, group_provided_loci, GenomicRegion},
    config::{PipelineConfig, ProbabilityMode},
    effects::{ModalitySchema, VariantEffect},
    error::{DataQualityWarning, Error, Result},
    io::EffectTable,
    null_model::{calibrate_against_null, GeneUniverse},
    posterior::{calibrate_loci, CalibrationReport, FlaggedLocus},
    results::CalibratedResults,
    scoring::{score_variants, CheckpointStore, ScoringFailure, ScoringRequest, VariantScorer},
    variant::{AssociationRecord, CredibleSetEntry, Locus},
};

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub n_input_variants: usize,
    pub n_filtered_variants: usize,
    pub n_excluded_variants: usize,
    pub n_loci: usize,
    pub n_flagged_loci: usize,
    pub n_credible_set_variants: usize,
    pub n_scored_variants: usize,
    pub n_resumed_variants: usize,
    pub n_failed_variants: usize,
    pub n_genes_scored: usize,
    pub n_universe_genes: usize,
    pub n_outside_universe: usize,
    pub n_warnings: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "input variants:           {}", self.n_input_variants)?;
        writeln!(f, "variants after filters:   {}", self.n_filtered_variants)?;
        writeln!(f, "variants in excluded regions: {}", self.n_excluded_variants)?;
        writeln!(f, "loci:                     {} ({} flagged)", self.n_loci, self.n_flagged_loci)?;
        writeln!(f, "credible-set variants:    {}", self.n_credible_set_variants)?;
        writeln!(
            f,
            "scored variants:          {} ({} resumed, {} failed)",
            self.n_scored_variants, self.n_resumed_variants, self.n_failed_variants
        )?;
        writeln!(f, "genes scored:             {}", self.n_genes_scored)?;
        writeln!(
            f,
            "universe genes:           {} (+{} outside universe)",
            self.n_universe_genes, self.n_outside_universe
        )?;
        write!(f, "data-quality warnings:    {}", self.n_warnings)
    }
}

/// Everything a run produces.
pub struct PipelineOutput {
    pub credible_sets: Vec<CredibleSetEntry>,
    pub flagged_loci: Vec<FlaggedLocus>,
    pub scoring_failures: Vec<ScoringFailure>,
    /// Failed variant ids carried over from a pre-computed effect table
    pub unsuccessful_variants: Vec<String>,
    pub gene_scores: Vec<GeneScore>,
    pub calibrated: CalibratedResults,
    pub warnings: Vec<DataQualityWarning>,
    pub summary: RunSummary,
}

/// The regulatory-burden pipeline over a fixed gene universe.
///
/// Stages run strictly in order:
/// 1. Filter and cluster variants into loci
/// 2. Calibrate per-locus probabilities and truncate to credible sets
/// 3. Obtain per-variant gene effects (scoring service or effect table)
/// 4. Aggregate effects into gene scores
/// 5. Calibrate gene scores against the universe background
pub struct Pipeline {
    config: PipelineConfig,
    universe: GeneUniverse,
}
impl Pipeline {
    pub fn new(config: PipelineConfig, universe: GeneUniverse) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, universe })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn universe(&self) -> &GeneUniverse {
        &self.universe
    }

    fn excluded_regions(&self) -> Vec<GenomicRegion> {
        if self.config.exclude_mhc {
            vec![GenomicRegion::mhc()]
        } else {
            Vec::new()
        }
    }

    /// Builds loci from the input records.
    ///
    /// Recomputing from p-values filters by significance before clustering. Renormalizing
    /// keeps every record and uses upstream locus ids when all records carry one.
    fn select_loci(
        &self,
        records: Vec<AssociationRecord>,
        summary: &mut RunSummary,
    ) -> Result<Vec<Locus>> {
        summary.n_input_variants = records.len();
        if records.is_empty() {
            return Err(Error::EmptyInput("association table has no variants".into()));
        }

        let records = match self.config.probability_mode {
            ProbabilityMode::RecomputeFromPvalue => {
                filter_significant(records, self.config.p_value_threshold)
            }
            ProbabilityMode::RenormalizeExisting => records,
        };
        let (records, n_excluded) = exclude_regions(records, &self.excluded_regions());
        summary.n_excluded_variants = n_excluded;
        summary.n_filtered_variants = records.len();
        if records.is_empty() {
            return Err(Error::EmptyInput(format!(
                "no variants left after filtering (p < {}, {} in excluded regions)",
                self.config.p_value_threshold, n_excluded
            )));
        }
        tracing::info!(
            "{} of {} variants pass filters ({} in excluded regions)",
            records.len(),
            summary.n_input_variants,
            n_excluded
        );

        let provided = self.config.probability_mode == ProbabilityMode::RenormalizeExisting
            && records.iter().all(|r| r.locus_id.is_some());
        let loci = if provided {
            group_provided_loci(records)?
        } else {
            cluster_loci(records, self.config.clustering_window_bp)
        };
        tracing::info!(
            "{} loci ({})",
            loci.len(),
            if provided { "upstream locus ids" } else { "clustered" }
        );
        summary.n_loci = loci.len();
        Ok(loci)
    }

    fn calibrate(
        &self,
        records: Vec<AssociationRecord>,
        summary: &mut RunSummary,
    ) -> Result<CalibrationReport> {
        let loci = self.select_loci(records, summary)?;
        let report = calibrate_loci(
            &loci,
            self.config.probability_mode,
            self.config.credible_set_mass,
        );
        summary.n_flagged_loci = report.flagged.len();
        summary.n_credible_set_variants = report.entries.len();
        Ok(report)
    }

    /// Runs clustering and posterior calibration only.
    pub fn credible_sets(&self, records: Vec<AssociationRecord>) -> Result<CalibrationReport> {
        self.calibrate(records, &mut RunSummary::default())
    }

    /// Runs every stage, scoring credible-set variants through `scorer`.
    ///
    /// Variants already present in `checkpoint` are not re-scored. The scoring service
    /// reports every modality, so all of them are calibrated.
    pub fn run<S, C>(
        &self,
        records: Vec<AssociationRecord>,
        scorer: &S,
        checkpoint: &mut C,
    ) -> Result<PipelineOutput>
    where
        S: VariantScorer + ?Sized,
        C: CheckpointStore + ?Sized,
    {
        let mut summary = RunSummary::default();
        let calibration = self.calibrate(records, &mut summary)?;

        let requests = calibration
            .entries
            .iter()
            .map(|e| ScoringRequest::from_variant(&e.variant, self.config.scoring_flank_bp))
            .collect::<Vec<_>>();
        let scoring = score_variants(
            &requests,
            scorer,
            checkpoint,
            &self.config.retry,
            self.config.min_gene_effect,
        )?;
        summary.n_scored_variants = scoring.n_scored;
        summary.n_resumed_variants = scoring.n_resumed;
        summary.n_failed_variants = scoring.failures.len();

        let mut output = self.finish(
            calibration,
            &scoring.effects,
            &ModalitySchema::full(),
            summary,
        );
        output.scoring_failures = scoring.failures;
        Ok(output)
    }

    /// Runs every stage against pre-computed effects keyed by variant id.
    pub fn run_with_effects(
        &self,
        records: Vec<AssociationRecord>,
        effects: &HashMap<String, VariantEffect>,
        schema: &ModalitySchema,
    ) -> Result<PipelineOutput> {
        let mut summary = RunSummary::default();
        let calibration = self.calibrate(records, &mut summary)?;
        Ok(self.finish(calibration, effects, schema, summary))
    }

    /// Aggregates and calibrates an effect table that already carries variant
    /// probabilities, skipping clustering and posterior calibration.
    pub fn run_from_effect_table(&self, table: &EffectTable) -> Result<PipelineOutput> {
        if table.weighted_variants.is_empty() {
            return Err(Error::EmptyInput(
                "effect table carries no PP or Proxy_PP probabilities".into(),
            ));
        }
        let summary = RunSummary {
            n_input_variants: table.weighted_variants.len() + table.failed.len(),
            n_filtered_variants: table.weighted_variants.len(),
            n_failed_variants: table.failed.len(),
            ..Default::default()
        };

        let mut output = self.score_genes(
            Vec::new(),
            Vec::new(),
            &table.weighted_variants,
            &table.effects,
            &table.schema,
            table.warnings.clone(),
            summary,
        );
        output.unsuccessful_variants = table.failed.clone();
        Ok(output)
    }

    fn finish(
        &self,
        calibration: CalibrationReport,
        effects: &HashMap<String, VariantEffect>,
        schema: &ModalitySchema,
        summary: RunSummary,
    ) -> PipelineOutput {
        let weighted = calibration
            .entries
            .iter()
            .map(WeightedVariant::from)
            .collect::<Vec<_>>();
        self.score_genes(
            calibration.entries,
            calibration.flagged,
            &weighted,
            effects,
            schema,
            calibration.warnings,
            summary,
        )
    }

    /// Aggregation and null calibration, shared by every entry point.
    #[allow(clippy::too_many_arguments)]
    fn score_genes(
        &self,
        credible_sets: Vec<CredibleSetEntry>,
        flagged_loci: Vec<FlaggedLocus>,
        weighted: &[WeightedVariant],
        effects: &HashMap<String, VariantEffect>,
        schema: &ModalitySchema,
        mut warnings: Vec<DataQualityWarning>,
        mut summary: RunSummary,
    ) -> PipelineOutput {
        let aggregation = aggregate_gene_scores(weighted, effects);
        let null = calibrate_against_null(
            &aggregation.scores,
            &self.universe,
            schema,
            self.config.p_value_adjustment,
        );

        warnings.extend(aggregation.warnings);
        warnings.extend(null.warnings);

        summary.n_genes_scored = aggregation.scores.len();
        summary.n_universe_genes = self.universe.len();
        summary.n_outside_universe = null.n_outside_universe;
        summary.n_warnings = warnings.len();
        tracing::info!("run summary\n{summary}");

        PipelineOutput {
            credible_sets,
            flagged_loci,
            scoring_failures: Vec::new(),
            unsuccessful_variants: Vec::new(),
            gene_scores: aggregation.scores,
            calibrated: null.results,
            warnings,
            summary,
        }
    }
}
