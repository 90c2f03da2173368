use std::collections::BTreeMap;

use derive_new::new;

use crate::{
    error::{Error, Result},
    variant::{AssociationRecord, Chromosome, Locus, Variant},
};

/// An inclusive genomic interval excluded from clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct GenomicRegion {
    pub chromosome: Chromosome,
    pub start: u64,
    pub end: u64,
}

impl GenomicRegion {
    /// The extended MHC region, chr6:25-34 Mb.
    pub fn mhc() -> Self {
        Self::new(Chromosome::Autosome(6), 25_000_000, 34_000_000)
    }

    pub fn contains(&self, variant: &Variant) -> bool {
        variant.chromosome == self.chromosome
            && variant.position >= self.start
            && variant.position <= self.end
    }
}

/// Keeps records whose p-value is strictly below `threshold`.
pub fn filter_significant(records: Vec<AssociationRecord>, threshold: f64) -> Vec<AssociationRecord> {
    records
        .into_iter()
        .filter(|r| r.variant.p_value < threshold)
        .collect()
}

/// Drops records falling inside any of `regions`.
///
/// Returns the kept records and the number removed.
pub fn exclude_regions(
    records: Vec<AssociationRecord>,
    regions: &[GenomicRegion],
) -> (Vec<AssociationRecord>, usize) {
    let (removed, kept): (Vec<_>, Vec<_>) = records
        .into_iter()
        .partition(|r| regions.iter().any(|region| region.contains(&r.variant)));
    (kept, removed.len())
}

impl Locus {
    /// True if `variant` cannot be chained onto this locus.
    ///
    /// The gap is measured from the last member in position order, not from the locus
    /// start, so a locus may grow wider than `window_bp`.
    fn breaks_chain(&self, variant: &Variant, window_bp: u64) -> bool {
        if variant.chromosome != self.chromosome {
            return true;
        }
        match self.members.last() {
            Some(previous) => {
                variant.position.saturating_sub(previous.variant.position) > window_bp
            }
            None => true,
        }
    }
}

/// Partitions records into loci by chained proximity.
///
/// Records are stably sorted by chromosome and position. A new locus starts whenever the
/// chromosome changes or the gap to the preceding record exceeds `window_bp`. Locus ids are
/// assigned from 1 in sort order.
pub fn cluster_loci(mut records: Vec<AssociationRecord>, window_bp: u64) -> Vec<Locus> {
    records.sort_by_key(|r| (r.variant.chromosome, r.variant.position));

    let mut loci: Vec<Locus> = Vec::new();
    for record in records {
        match loci.last_mut() {
            Some(locus) if !locus.breaks_chain(&record.variant, window_bp) => {
                locus.members.push(record);
            }
            _ => {
                let id = loci.len() + 1;
                loci.push(Locus {
                    id,
                    chromosome: record.variant.chromosome,
                    members: vec![record],
                });
            }
        }
    }
    tracing::debug!("clustered into {} loci (window {} bp)", loci.len(), window_bp);
    loci
}

/// Groups records by the locus id supplied with the input.
///
/// Every record must carry an id, and a locus must not span chromosomes.
pub fn group_provided_loci(records: Vec<AssociationRecord>) -> Result<Vec<Locus>> {
    let mut groups: BTreeMap<usize, Vec<AssociationRecord>> = BTreeMap::new();
    for record in records {
        let locus_id = record.locus_id.ok_or_else(|| {
            Error::Schema(format!("variant {} has no Locus_ID", record.variant.id))
        })?;
        groups.entry(locus_id).or_default().push(record);
    }

    groups
        .into_iter()
        .map(|(id, mut members)| {
            let chromosome = members[0].variant.chromosome;
            if let Some(stray) = members.iter().find(|m| m.variant.chromosome != chromosome) {
                return Err(Error::Schema(format!(
                    "locus {id} spans chromosomes {chromosome} and {}",
                    stray.variant.chromosome
                )));
            }
            members.sort_by_key(|m| m.variant.position);
            Ok(Locus {
                id,
                chromosome,
                members,
            })
        })
        .collect()
}
