use crate::{
    aggregate::GeneScore,
    effects::{ModalitySchema, ModalityVector},
};

/// A gene score placed against the genome-wide background.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedGeneScore {
    pub score: GeneScore,
    /// False for scored genes that were missing from the universe list
    pub in_universe: bool,
    /// Z-score of the combined weighted score
    pub z_score: f64,
    pub modality_z: ModalityVector,
    /// 1-based rank by descending weighted score
    pub rank: usize,
    /// `rank / total_gene_count`
    pub empirical_p_value: f64,
    /// Multiple-testing adjusted `empirical_p_value`
    pub empirical_q_value: f64,
}

impl CalibratedGeneScore {
    /// Creates a new CalibratedGeneScore
    ///
    /// `z_score`, `modality_z`, `rank` and both empirical values are filled in later by the
    /// null calibration.
    pub fn new(score: GeneScore, in_universe: bool) -> Self {
        Self {
            score,
            in_universe,
            z_score: 0.0,
            modality_z: ModalityVector::default(),
            rank: 0,
            empirical_p_value: 1.0,
            empirical_q_value: 1.0,
        }
    }

    pub fn gene(&self) -> &str {
        &self.score.gene
    }
}

/// Calibrated scores for the full gene set, ordered by rank.
pub struct CalibratedResults {
    pub genes: Vec<CalibratedGeneScore>,
    pub schema: ModalitySchema,
}
impl CalibratedResults {
    pub fn from_vec(mut genes: Vec<CalibratedGeneScore>, schema: ModalitySchema) -> Self {
        // Sort the results by rank
        genes.sort_unstable_by_key(|g| g.rank);
        Self { genes, schema }
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn get(&self, gene: &str) -> Option<&CalibratedGeneScore> {
        self.genes.iter().find(|g| g.gene() == gene)
    }

    /// The `n` best ranked genes
    pub fn top(&self, n: usize) -> &[CalibratedGeneScore] {
        &self.genes[..n.min(self.genes.len())]
    }

    /// Genes that received any contribution
    pub fn scored(&self) -> impl Iterator<Item = &CalibratedGeneScore> {
        self.genes.iter().filter(|g| g.score.n_variants > 0)
    }

    pub fn pprint(&self) {
        let modality_headers = self
            .schema
            .present()
            .map(|m| format!("\tZ {m}"))
            .collect::<String>();
        println!("Gene\tWeighted Score\tMax Score\tVariants\tZ{modality_headers}\tRank\tEmpirical P\tEmpirical Q");
        for g in &self.genes {
            let modality_z = self
                .schema
                .present()
                .map(|m| format!("\t{}", g.modality_z[m]))
                .collect::<String>();
            println!(
                "{}\t{}\t{}\t{}\t{}{}\t{}\t{}\t{}",
                g.gene(),
                g.score.weighted_score,
                g.score.max_score,
                g.score.n_variants,
                g.z_score,
                modality_z,
                g.rank,
                g.empirical_p_value,
                g.empirical_q_value
            );
        }
    }
}
