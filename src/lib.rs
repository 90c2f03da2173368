//! regburden: Probability-Weighted Regulatory Burden for Gene Sets
//!
//! This library turns GWAS summary statistics into gene-level regulatory burden scores
//! suitable for enrichment testing. Significant variants are clustered into loci, given
//! calibrated causal probabilities within each locus, and truncated to credible sets.
//! Their predicted regulatory effects on nearby genes are weighted by those probabilities
//! and summed per gene, and the gene scores are placed against the whole gene universe as
//! Z-scores and rank-based empirical p-values.
//!
//! The main components of this library are:
//! - `Pipeline`: Runs the stages end to end and reports a `RunSummary`
//! - `PipelineConfig`: Thresholds, probability mode and retry policy
//! - `VariantScorer`: The external variant-effect scoring service
//! - `CalibratedResults`: Structure to hold and display the calibrated gene table

mod aggregate;
mod clustering;
mod config;
mod effects;
mod error;
mod io;
mod math;
mod null_model;
mod pipeline;
mod posterior;
mod results;
mod scoring;
mod variant;

pub use aggregate::{aggregate_gene_scores, AggregationReport, GeneScore, WeightedVariant};
pub use clustering::{
    cluster_loci, exclude_regions, filter_significant, group_provided_loci, GenomicRegion,
};
pub use config::{PValueAdjustment, PipelineConfig, ProbabilityMode};
pub use effects::{
    parse_gene_list, resolve_modality_columns, GeneEffect, Modality, ModalitySchema,
    ModalityVector, VariantEffect, MODALITY_SCHEMA_VERSION, N_MODALITIES,
};
pub use error::{DataQualityWarning, Error, ExternalServiceError, Result};
pub use io::{
    detect_delimiter, parse_association_records, parse_gene_universe, parse_variant_effects,
    read_association_table, read_gene_universe, read_variant_effects, resolve_gene_column,
    write_calibrated, write_credible_sets, write_gene_scores, EffectTable,
};
pub use null_model::{calibrate_against_null, GeneUniverse, NullCalibration};
pub use pipeline::{Pipeline, PipelineOutput, RunSummary};
pub use posterior::{
    calibrate_locus, calibrate_loci, credible_set, locus_probabilities, CalibrationReport,
    FlaggedLocus, LocusProbabilities, PROBABILITY_SUM_TOLERANCE,
};
pub use results::{CalibratedGeneScore, CalibratedResults};
pub use scoring::{
    score_variants, CheckpointLog, CheckpointStore, FnScorer, MemoryCheckpoint, RetryPolicy,
    ScoringFailure, ScoringReport, ScoringRequest, VariantScorer,
};
pub use variant::{
    floor_p_value, AssociationRecord, Chromosome, CredibleSetEntry, Locus, LocusId, Variant,
    P_VALUE_FLOOR,
};
