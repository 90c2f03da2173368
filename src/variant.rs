//! Shared record types passed between pipeline stages.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Smallest p-value kept after loading; an exact zero is clamped here so `log10` stays finite.
pub const P_VALUE_FLOOR: f64 = 1e-300;

pub type LocusId = usize;

/// A chromosome supported by the pipeline: autosomes 1 through 22 and X.
///
/// Ordering places the autosomes numerically and X last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Chromosome {
    Autosome(u8),
    X,
}

impl FromStr for Chromosome {
    type Err = Error;

    /// Accepts `7`, `chr7`, `X`, `chrX` and the PLINK alias `23`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let bare = trimmed
            .strip_prefix("chr")
            .or_else(|| trimmed.strip_prefix("CHR"))
            .unwrap_or(trimmed);
        match bare {
            "X" | "x" | "23" => Ok(Chromosome::X),
            _ => match bare.parse::<u8>() {
                Ok(n) if (1..=22).contains(&n) => Ok(Chromosome::Autosome(n)),
                _ => Err(Error::Schema(format!("unsupported chromosome '{s}'"))),
            },
        }
    }
}

impl fmt::Display for Chromosome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chromosome::Autosome(n) => write!(f, "{n}"),
            Chromosome::X => write!(f, "X"),
        }
    }
}

impl Serialize for Chromosome {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Chromosome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Validates an association p-value, clamping an exact zero to [`P_VALUE_FLOOR`].
pub fn floor_p_value(p_value: f64) -> Result<f64> {
    if p_value.is_nan() || !(0.0..=1.0).contains(&p_value) {
        return Err(Error::Schema(format!(
            "p-value {p_value} is outside (0, 1]"
        )));
    }
    Ok(p_value.max(P_VALUE_FLOOR))
}

/// A single association result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub chromosome: Chromosome,
    /// 1-based genomic position
    pub position: u64,
    pub ref_allele: String,
    pub alt_allele: String,
    pub p_value: f64,
}

impl Variant {
    pub fn new(
        id: impl Into<String>,
        chromosome: Chromosome,
        position: u64,
        ref_allele: impl Into<String>,
        alt_allele: impl Into<String>,
        p_value: f64,
    ) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::Schema("variant identifier is empty".into()));
        }
        let p_value = floor_p_value(p_value).map_err(|_| {
            Error::Schema(format!("variant {id}: p-value {p_value} is outside (0, 1]"))
        })?;
        Ok(Self {
            id,
            chromosome,
            position,
            ref_allele: ref_allele.into(),
            alt_allele: alt_allele.into(),
            p_value,
        })
    }

    /// `-log10(p)`, the unnormalized log-weight used by the softmax calibrator
    pub fn log_weight(&self) -> f64 {
        -self.p_value.log10()
    }
}

/// A variant as loaded from an association table, with the optional fields supplied by
/// upstream fine-mapping sources.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationRecord {
    pub variant: Variant,
    /// Locus identifier assigned upstream, if any
    pub locus_id: Option<LocusId>,
    /// Posterior probability provided upstream, if any
    pub posterior: Option<f64>,
}

impl From<Variant> for AssociationRecord {
    fn from(variant: Variant) -> Self {
        Self {
            variant,
            locus_id: None,
            posterior: None,
        }
    }
}

/// A cluster of proximate variants on one chromosome.
#[derive(Debug, Clone, PartialEq)]
pub struct Locus {
    pub id: LocusId,
    pub chromosome: Chromosome,
    pub members: Vec<AssociationRecord>,
}

impl Locus {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn start(&self) -> Option<u64> {
        self.members.iter().map(|m| m.variant.position).min()
    }

    pub fn end(&self) -> Option<u64> {
        self.members.iter().map(|m| m.variant.position).max()
    }

    /// The member with the smallest p-value
    pub fn lead_variant(&self) -> Option<&Variant> {
        self.members
            .iter()
            .map(|m| &m.variant)
            .min_by(|a, b| a.p_value.total_cmp(&b.p_value))
    }
}

/// A variant retained in its locus credible set.
#[derive(Debug, Clone, PartialEq)]
pub struct CredibleSetEntry {
    pub locus_id: LocusId,
    pub variant: Variant,
    pub probability: f64,
    pub cumulative_probability: f64,
}
