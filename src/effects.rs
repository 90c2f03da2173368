//! Variant-effect records produced by the external scoring collaborator.
//!
//! The core never recomputes effects; it only reads them through the fixed modality
//! schema declared here.

use std::{
    fmt,
    ops::{Index, IndexMut},
};

use serde::{Deserialize, Serialize};

use crate::error::DataQualityWarning;

/// Version of the modality column contract understood by this crate.
pub const MODALITY_SCHEMA_VERSION: u32 = 1;

pub const N_MODALITIES: usize = 7;

/// A regulatory signal channel scored independently per variant-gene pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Modality {
    Dnase,
    H3k27ac,
    H3k4me1,
    H3k4me3,
    Cage,
    Ctcf,
    Rna,
}

impl Modality {
    pub const ALL: [Modality; N_MODALITIES] = [
        Modality::Dnase,
        Modality::H3k27ac,
        Modality::H3k4me1,
        Modality::H3k4me3,
        Modality::Cage,
        Modality::Ctcf,
        Modality::Rna,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Modality::Dnase => "DNase",
            Modality::H3k27ac => "H3K27ac",
            Modality::H3k4me1 => "H3K4me1",
            Modality::H3k4me3 => "H3K4me3",
            Modality::Cage => "CAGE",
            Modality::Ctcf => "CTCF",
            Modality::Rna => "RNA",
        }
    }

    /// Column holding this modality's score, e.g. `score_DNase`
    pub fn score_column(&self) -> String {
        format!("score_{}", self.label())
    }

    /// Column holding this modality's z-score, e.g. `z_DNase`
    pub fn z_column(&self) -> String {
        format!("z_{}", self.label())
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One value per modality.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModalityVector([f64; N_MODALITIES]);

impl ModalityVector {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Modality, f64)>) -> Self {
        let mut vector = Self::default();
        for (modality, value) in pairs {
            vector[modality] = value;
        }
        vector
    }

    pub fn iter(&self) -> impl Iterator<Item = (Modality, f64)> + '_ {
        Modality::ALL.iter().map(move |m| (*m, self[*m]))
    }

    /// Adds `other * weight` to every channel.
    pub fn add_scaled(&mut self, other: &ModalityVector, weight: f64) {
        for (acc, value) in self.0.iter_mut().zip(other.0.iter()) {
            *acc += value * weight;
        }
    }
}

impl Index<Modality> for ModalityVector {
    type Output = f64;
    fn index(&self, modality: Modality) -> &f64 {
        &self.0[modality.index()]
    }
}

impl IndexMut<Modality> for ModalityVector {
    fn index_mut(&mut self, modality: Modality) -> &mut f64 {
        &mut self.0[modality.index()]
    }
}

/// Which modality columns a table actually carries, resolved once at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalitySchema {
    pub version: u32,
    columns: [Option<usize>; N_MODALITIES],
}

impl ModalitySchema {
    /// Every modality present, for effects produced directly by a scorer.
    pub fn full() -> Self {
        Self {
            version: MODALITY_SCHEMA_VERSION,
            columns: std::array::from_fn(Some),
        }
    }

    pub fn column(&self, modality: Modality) -> Option<usize> {
        self.columns[modality.index()]
    }

    pub fn is_present(&self, modality: Modality) -> bool {
        self.column(modality).is_some()
    }

    /// Present modalities in canonical order
    pub fn present(&self) -> impl Iterator<Item = Modality> + '_ {
        Modality::ALL.into_iter().filter(|m| self.is_present(*m))
    }

    pub fn absent(&self) -> impl Iterator<Item = Modality> + '_ {
        Modality::ALL.into_iter().filter(|m| !self.is_present(*m))
    }
}

/// Maps `score_<modality>` headers to column indices.
///
/// Header matching is case-insensitive. Absent modalities are reported, never guessed.
pub fn resolve_modality_columns<S: AsRef<str>>(headers: &[S]) -> ModalitySchema {
    let columns = Modality::ALL.map(|modality| {
        let wanted = modality.score_column().to_lowercase();
        headers
            .iter()
            .position(|h| h.as_ref().trim().to_lowercase() == wanted)
    });
    let schema = ModalitySchema {
        version: MODALITY_SCHEMA_VERSION,
        columns,
    };
    let absent = schema.absent().map(|m| m.label()).collect::<Vec<_>>();
    if !absent.is_empty() {
        tracing::info!("modality columns absent from effect table: {}", absent.join(", "));
    }
    schema
}

/// Effect of one variant on one candidate target gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneEffect {
    /// Gene identifier, taken verbatim from the scoring collaborator
    pub gene: String,
    /// The effect the collaborator flags as dominant for this pair
    pub primary: f64,
    pub modalities: ModalityVector,
}

impl GeneEffect {
    pub fn new(gene: impl Into<String>, primary: f64, modalities: ModalityVector) -> Self {
        Self {
            gene: gene.into(),
            primary,
            modalities,
        }
    }
}

/// All target-gene effects of one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantEffect {
    pub variant_id: String,
    pub targets: Vec<GeneEffect>,
}

/// Parses a `GENE:effect` list separated by `;` or `,`.
///
/// Entries that do not parse are skipped and reported.
pub fn parse_gene_list(
    variant_id: &str,
    raw: &str,
) -> (Vec<(String, f64)>, Vec<DataQualityWarning>) {
    let mut genes = Vec::new();
    let mut warnings = Vec::new();
    for entry in raw.split(|c: char| c == ';' || c == ',').map(str::trim).filter(|e| !e.is_empty()) {
        let parsed = entry
            .rsplit_once(':')
            .and_then(|(gene, effect)| {
                let gene = gene.trim();
                let effect = effect.trim().parse::<f64>().ok()?;
                (!gene.is_empty() && effect.is_finite()).then(|| (gene.to_string(), effect))
            });
        match parsed {
            Some(pair) => genes.push(pair),
            None => warnings.push(
                DataQualityWarning::UnparsableGeneEffect {
                    variant_id: variant_id.to_string(),
                    entry: entry.to_string(),
                }
                .emit(),
            ),
        }
    }
    (genes, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_modality_columns() {
        let headers = ["SNP", "all_genes", "score_DNase", "SCORE_cage", "score_RNA"];
        let schema = resolve_modality_columns(&headers);
        assert_eq!(schema.version, MODALITY_SCHEMA_VERSION);
        assert_eq!(schema.column(Modality::Dnase), Some(2));
        assert_eq!(schema.column(Modality::Cage), Some(3));
        assert_eq!(schema.column(Modality::Rna), Some(4));
        assert!(!schema.is_present(Modality::Ctcf));
        assert_eq!(
            schema.present().collect::<Vec<_>>(),
            vec![Modality::Dnase, Modality::Cage, Modality::Rna]
        );
        assert_eq!(schema.absent().count(), 4);
    }

    #[test]
    fn test_full_schema() {
        let schema = ModalitySchema::full();
        assert_eq!(schema.present().count(), N_MODALITIES);
    }

    #[test]
    fn test_modality_vector_add_scaled() {
        let mut acc = ModalityVector::default();
        let effect = ModalityVector::from_pairs([(Modality::Dnase, 2.0), (Modality::Rna, -1.0)]);
        acc.add_scaled(&effect, 0.5);
        acc.add_scaled(&effect, 0.25);
        assert_eq!(acc[Modality::Dnase], 1.5);
        assert_eq!(acc[Modality::Rna], -0.75);
        assert_eq!(acc[Modality::Ctcf], 0.0);
    }

    #[test]
    fn test_parse_gene_list() {
        let (genes, warnings) = parse_gene_list("rs1", "GRIN2A:0.5; DRD2:0.912;broken;X:abc");
        assert_eq!(
            genes,
            vec![("GRIN2A".to_string(), 0.5), ("DRD2".to_string(), 0.912)]
        );
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_parse_gene_list_accepts_commas_and_empty() {
        let (genes, _) = parse_gene_list("rs1", "A:1.0,B:2.0");
        assert_eq!(genes.len(), 2);
        let (genes, warnings) = parse_gene_list("rs1", "");
        assert!(genes.is_empty() && warnings.is_empty());
    }

    #[test]
    fn test_gene_names_are_verbatim() {
        let (genes, _) = parse_gene_list("rs1", "ENSG00000183454.15:0.3;grin2a:0.2");
        assert_eq!(genes[0].0, "ENSG00000183454.15");
        assert_eq!(genes[1].0, "grin2a");
    }
}
