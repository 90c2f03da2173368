//! Tabular readers and writers for every table the pipeline consumes or produces.
//!
//! Readers resolve columns by header name (case-insensitive) so column order in the input
//! does not matter. Writers emit a fixed column order.

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader, Read, Write},
    path::Path,
};

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};

use crate::{
    aggregate::{GeneScore, WeightedVariant},
    effects::{
        parse_gene_list, resolve_modality_columns, GeneEffect, ModalitySchema, ModalityVector,
        VariantEffect,
    },
    error::{DataQualityWarning, Error, Result},
    null_model::GeneUniverse,
    results::CalibratedResults,
    variant::{AssociationRecord, Chromosome, CredibleSetEntry, Variant},
};

const ASSOCIATION_COLUMNS: [&str; 6] = ["SNP", "CHR", "BP", "A1", "A2", "P"];
const CREDIBLE_SET_COLUMNS: [&str; 9] = [
    "Locus_ID",
    "SNP",
    "CHR",
    "BP",
    "A1",
    "A2",
    "P",
    "PP",
    "Cumulative_PP",
];
const GENE_COLUMN_PREFERENCE: [&str; 4] = ["gene", "gene_name", "symbol", "gene_symbol"];

/// Picks the delimiter from the extension, sniffing the header line otherwise.
pub fn detect_delimiter(path: &Path) -> Result<u8> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("tsv") | Some("txt") => Ok(b'\t'),
        Some("csv") => Ok(b','),
        _ => {
            let mut header = String::new();
            BufReader::new(File::open(path)?).read_line(&mut header)?;
            Ok(sniff_delimiter(&header))
        }
    }
}

fn sniff_delimiter(header: &str) -> u8 {
    if header.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

fn reader<R: Read>(reader: R, delimiter: u8) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .trim(Trim::All)
        .from_reader(reader)
}

fn find_column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.eq_ignore_ascii_case(name))
}

fn require_column(headers: &StringRecord, name: &str, table: &str) -> Result<usize> {
    find_column(headers, name)
        .ok_or_else(|| Error::Schema(format!("{table} is missing required column '{name}'")))
}

/// Reports a row whose field count differs from the header as a schema error.
fn row(result: csv::Result<StringRecord>) -> Result<StringRecord> {
    result.map_err(|err| {
        if let csv::ErrorKind::UnequalLengths {
            pos,
            expected_len,
            len,
        } = err.kind()
        {
            return Error::Schema(format!(
                "line {}: expected {expected_len} fields, found {len}",
                pos.as_ref().map_or(0, |p| p.line())
            ));
        }
        Error::Csv(err)
    })
}

/// Line number of a record for error messages
fn line_of(record: &StringRecord) -> u64 {
    record.position().map_or(0, |p| p.line())
}

fn field<'r>(record: &'r StringRecord, index: usize) -> &'r str {
    record.get(index).unwrap_or("")
}

fn parse_field<T: std::str::FromStr>(record: &StringRecord, index: usize, name: &str) -> Result<T> {
    let raw = field(record, index);
    raw.parse().map_err(|_| {
        Error::Schema(format!(
            "line {}: cannot parse {name} value '{raw}'",
            line_of(record)
        ))
    })
}

/// Parses an optional numeric cell; empty and `NA` cells are missing.
fn optional_number<T: std::str::FromStr>(record: &StringRecord, index: Option<usize>) -> Option<T> {
    let raw = field(record, index?);
    if raw.is_empty() || raw.eq_ignore_ascii_case("na") {
        return None;
    }
    raw.parse().ok()
}

/// Parses an optional numeric cell, treating non-finite values as missing and reporting
/// them.
fn finite_number(
    record: &StringRecord,
    index: Option<usize>,
    variant_id: &str,
    column: &str,
    warnings: &mut Vec<DataQualityWarning>,
) -> Option<f64> {
    let value = optional_number::<f64>(record, index)?;
    if value.is_finite() {
        return Some(value);
    }
    warnings.push(
        DataQualityWarning::NonFiniteValue {
            variant_id: variant_id.to_string(),
            column: column.to_string(),
            value,
        }
        .emit(),
    );
    None
}

/// The posterior column, `PP` preferred over `Proxy_PP`
fn probability_column(headers: &StringRecord) -> Option<usize> {
    find_column(headers, "PP").or_else(|| find_column(headers, "Proxy_PP"))
}

/// Reads association records from any reader.
///
/// `SNP, CHR, BP, A1, A2, P` are required. `Locus_ID` and `PP`/`Proxy_PP` are read when
/// present. Any malformed required cell aborts with [`Error::Schema`] naming the line.
pub fn parse_association_records<R: Read>(input: R, delimiter: u8) -> Result<Vec<AssociationRecord>> {
    let mut rdr = reader(input, delimiter);
    let headers = rdr.headers()?.clone();
    let [snp, chr, bp, a1, a2, p] = ASSOCIATION_COLUMNS
        .map(|name| require_column(&headers, name, "association table"));
    let (snp, chr, bp, a1, a2, p) = (snp?, chr?, bp?, a1?, a2?, p?);
    let locus_column = find_column(&headers, "Locus_ID");
    let posterior_column = probability_column(&headers);

    let mut records = Vec::new();
    for result in rdr.records() {
        let record = row(result)?;
        let line = line_of(&record);
        let chromosome = field(&record, chr)
            .parse::<Chromosome>()
            .map_err(|err| Error::Schema(format!("line {line}: {err}")))?;
        let variant = Variant::new(
            field(&record, snp),
            chromosome,
            parse_field(&record, bp, "BP")?,
            field(&record, a1),
            field(&record, a2),
            parse_field(&record, p, "P")?,
        )
        .map_err(|err| Error::Schema(format!("line {line}: {err}")))?;
        records.push(AssociationRecord {
            variant,
            locus_id: optional_number(&record, locus_column),
            posterior: optional_number(&record, posterior_column),
        });
    }
    tracing::debug!("read {} association records", records.len());
    Ok(records)
}

pub fn read_association_table(path: &Path) -> Result<Vec<AssociationRecord>> {
    let delimiter = detect_delimiter(path)?;
    let records = parse_association_records(File::open(path)?, delimiter)?;
    tracing::info!("loaded {} variants from {}", records.len(), path.display());
    Ok(records)
}

/// Writes credible-set entries with columns
/// `Locus_ID, SNP, CHR, BP, A1, A2, P, PP, Cumulative_PP`.
pub fn write_credible_sets<W: Write>(
    output: W,
    entries: &[CredibleSetEntry],
    delimiter: u8,
) -> Result<()> {
    let mut wtr = WriterBuilder::new().delimiter(delimiter).from_writer(output);
    wtr.write_record(CREDIBLE_SET_COLUMNS)?;
    for entry in entries {
        let v = &entry.variant;
        wtr.write_record([
            entry.locus_id.to_string(),
            v.id.clone(),
            v.chromosome.to_string(),
            v.position.to_string(),
            v.ref_allele.clone(),
            v.alt_allele.clone(),
            v.p_value.to_string(),
            entry.probability.to_string(),
            entry.cumulative_probability.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// A pre-computed variant-effect table.
#[derive(Debug, Clone)]
pub struct EffectTable {
    pub effects: HashMap<String, VariantEffect>,
    pub schema: ModalitySchema,
    /// Variants the scoring collaborator reported as unsuccessful
    pub failed: Vec<String>,
    /// Variant probabilities, when the table carries a `PP` or `Proxy_PP` column
    pub weighted_variants: Vec<WeightedVariant>,
    pub warnings: Vec<DataQualityWarning>,
}

fn is_failure(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "false" | "0" | "no" | "f")
}

/// Reads the canonical variant-effect table.
///
/// Per-gene effects come from `all_genes` (`GENE:effect` entries). When that list is empty
/// the row falls back to `target_gene`/`target_gene_score`, provided the score is positive.
/// The row's modality scores are attached to every gene it targets.
pub fn parse_variant_effects<R: Read>(input: R, delimiter: u8) -> Result<EffectTable> {
    let mut rdr = reader(input, delimiter);
    let headers = rdr.headers()?.clone();
    let snp = require_column(&headers, "SNP", "variant-effect table")?;
    let all_genes = find_column(&headers, "all_genes");
    let target_gene = find_column(&headers, "target_gene");
    let target_score = find_column(&headers, "target_gene_score");
    if all_genes.is_none() && target_gene.is_none() {
        return Err(Error::Schema(
            "variant-effect table needs an 'all_genes' or 'target_gene' column".into(),
        ));
    }
    let success = find_column(&headers, "success");
    let locus_column = find_column(&headers, "Locus_ID");
    let posterior_column = probability_column(&headers);
    let schema = resolve_modality_columns(&headers.iter().collect::<Vec<_>>());

    let mut table = EffectTable {
        effects: HashMap::new(),
        schema,
        failed: Vec::new(),
        weighted_variants: Vec::new(),
        warnings: Vec::new(),
    };
    for result in rdr.records() {
        let record = row(result)?;
        let variant_id = field(&record, snp).to_string();
        if variant_id.is_empty() {
            return Err(Error::Schema(format!(
                "line {}: empty SNP identifier",
                line_of(&record)
            )));
        }
        if success.is_some_and(|i| is_failure(field(&record, i))) {
            table.failed.push(variant_id);
            continue;
        }
        if table.effects.contains_key(&variant_id) {
            tracing::debug!("duplicate effect row for {variant_id}; keeping the first");
            continue;
        }

        let mut modalities = ModalityVector::default();
        for modality in table.schema.present() {
            if let Some(value) = finite_number(
                &record,
                table.schema.column(modality),
                &variant_id,
                &modality.score_column(),
                &mut table.warnings,
            ) {
                modalities[modality] = value;
            }
        }

        let (mut genes, warnings) = match all_genes {
            Some(i) => parse_gene_list(&variant_id, field(&record, i)),
            None => (Vec::new(), Vec::new()),
        };
        table.warnings.extend(warnings);
        if genes.is_empty() {
            let fallback = target_gene
                .map(|i| field(&record, i))
                .filter(|g| !g.is_empty() && !g.eq_ignore_ascii_case("na"));
            let score = finite_number(
                &record,
                target_score,
                &variant_id,
                "target_gene_score",
                &mut table.warnings,
            );
            if let (Some(gene), Some(score)) = (fallback, score) {
                if score > 0.0 {
                    genes.push((gene.to_string(), score));
                }
            }
        }

        if posterior_column.is_some() {
            table.weighted_variants.push(WeightedVariant::new(
                variant_id.clone(),
                optional_number(&record, locus_column),
                optional_number(&record, posterior_column),
            ));
        }

        let targets = genes
            .into_iter()
            .map(|(gene, primary)| GeneEffect::new(gene, primary, modalities))
            .collect();
        table.effects.insert(
            variant_id.clone(),
            VariantEffect {
                variant_id,
                targets,
            },
        );
    }
    tracing::info!(
        "loaded effects for {} variants ({} unsuccessful)",
        table.effects.len(),
        table.failed.len()
    );
    Ok(table)
}

pub fn read_variant_effects(path: &Path) -> Result<EffectTable> {
    let delimiter = detect_delimiter(path)?;
    parse_variant_effects(File::open(path)?, delimiter)
}

/// Finds the gene-name column by preference order, then by substring.
pub fn resolve_gene_column<S: AsRef<str>>(headers: &[S]) -> Option<usize> {
    let lowered = headers
        .iter()
        .map(|h| h.as_ref().trim().to_ascii_lowercase())
        .collect::<Vec<_>>();
    GENE_COLUMN_PREFERENCE
        .iter()
        .find_map(|name| lowered.iter().position(|h| h == name))
        .or_else(|| {
            lowered
                .iter()
                .position(|h| h.contains("gene") || h.contains("symbol"))
        })
}

pub fn parse_gene_universe<R: Read>(input: R, delimiter: u8) -> Result<GeneUniverse> {
    let mut rdr = reader(input, delimiter);
    let headers = rdr.headers()?.iter().map(String::from).collect::<Vec<_>>();
    let column = resolve_gene_column(&headers).ok_or_else(|| {
        Error::Universe(format!(
            "no gene column among headers [{}]",
            headers.join(", ")
        ))
    })?;
    let mut genes = Vec::new();
    for result in rdr.records() {
        genes.push(field(&row(result)?, column).to_string());
    }
    GeneUniverse::new(genes)
}

/// Loads the gene universe. A missing or unreadable file is fatal.
pub fn read_gene_universe(path: &Path) -> Result<GeneUniverse> {
    let file = File::open(path)
        .map_err(|err| Error::Universe(format!("cannot open {}: {err}", path.display())))?;
    let delimiter = detect_delimiter(path)?;
    let universe = parse_gene_universe(file, delimiter)?;
    tracing::info!("loaded {} universe genes from {}", universe.len(), path.display());
    Ok(universe)
}

fn gene_score_header(schema: &ModalitySchema) -> Vec<String> {
    ["gene", "weighted_score", "max_score", "n_variants"]
        .into_iter()
        .map(String::from)
        .chain(schema.present().map(|m| m.score_column()))
        .collect()
}

fn gene_score_fields(score: &GeneScore, schema: &ModalitySchema) -> Vec<String> {
    [
        score.gene.clone(),
        score.weighted_score.to_string(),
        score.max_score.to_string(),
        score.n_variants.to_string(),
    ]
    .into_iter()
    .chain(schema.present().map(|m| score.modality_scores[m].to_string()))
    .collect()
}

/// Writes `gene, weighted_score, max_score, n_variants` and one `score_<modality>` column
/// per modality present in `schema`.
pub fn write_gene_scores<W: Write>(
    output: W,
    scores: &[GeneScore],
    schema: &ModalitySchema,
    delimiter: u8,
) -> Result<()> {
    let mut wtr = WriterBuilder::new().delimiter(delimiter).from_writer(output);
    wtr.write_record(gene_score_header(schema))?;
    for score in scores {
        wtr.write_record(gene_score_fields(score, schema))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the gene-score columns followed by `z_score`, one `z_<modality>` per present
/// modality, `rank`, `empirical_p_value` and `empirical_q_value`. Rows are in rank order.
pub fn write_calibrated<W: Write>(
    output: W,
    results: &CalibratedResults,
    delimiter: u8,
) -> Result<()> {
    let schema = &results.schema;
    let mut wtr = WriterBuilder::new().delimiter(delimiter).from_writer(output);
    let header = gene_score_header(schema)
        .into_iter()
        .chain(std::iter::once("z_score".to_string()))
        .chain(schema.present().map(|m| m.z_column()))
        .chain(
            ["rank", "empirical_p_value", "empirical_q_value"]
                .into_iter()
                .map(String::from),
        );
    wtr.write_record(header)?;
    for g in &results.genes {
        let row = gene_score_fields(&g.score, schema)
            .into_iter()
            .chain(std::iter::once(g.z_score.to_string()))
            .chain(schema.present().map(|m| g.modality_z[m].to_string()))
            .chain([
                g.rank.to_string(),
                g.empirical_p_value.to_string(),
                g.empirical_q_value.to_string(),
            ]);
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::PValueAdjustment, effects::Modality, null_model::calibrate_against_null};
    use approx::assert_relative_eq;

    const ASSOCIATIONS: &str = "\
SNP\tCHR\tBP\tA1\tA2\tP\tPP
rs1\t1\t100000\tA\tG\t1e-10\t0.7
rs2\tchr1\t150000\tC\tT\t0\tNA
rs3\tX\t900000\tG\tA\t1e-8\t
";

    #[test]
    fn test_parse_association_records() {
        let records = parse_association_records(ASSOCIATIONS.as_bytes(), b'\t').unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].variant.id, "rs1");
        assert_eq!(records[0].variant.position, 100_000);
        assert_eq!(records[0].posterior, Some(0.7));
        assert_eq!(records[0].locus_id, None);
        assert_eq!(records[1].variant.chromosome, Chromosome::Autosome(1));
        assert_eq!(records[1].variant.p_value, crate::variant::P_VALUE_FLOOR);
        assert_eq!(records[1].posterior, None);
        assert_eq!(records[2].variant.chromosome, Chromosome::X);
        assert_eq!(records[2].posterior, None);
    }

    #[test]
    fn test_column_order_and_case_do_not_matter() {
        let raw = "p,bp,chr,snp,a2,a1,Locus_ID\n0.01,5,2,rs9,T,C,4\n";
        let records = parse_association_records(raw.as_bytes(), b',').unwrap();
        let v = &records[0].variant;
        assert_eq!((v.id.as_str(), v.position, v.p_value), ("rs9", 5, 0.01));
        assert_eq!((v.ref_allele.as_str(), v.alt_allele.as_str()), ("C", "T"));
        assert_eq!(records[0].locus_id, Some(4));
    }

    #[test]
    fn test_missing_required_column() {
        let raw = "SNP,CHR,BP,A1,A2\nrs1,1,5,A,G\n";
        let err = parse_association_records(raw.as_bytes(), b',').unwrap_err();
        assert!(matches!(err, Error::Schema(ref msg) if msg.contains("'P'")));
    }

    #[test]
    fn test_malformed_row_names_line() {
        let raw = "SNP,CHR,BP,A1,A2,P\nrs1,1,5,A,G,0.1\nrs2,1,five,A,G,0.1\n";
        let err = parse_association_records(raw.as_bytes(), b',').unwrap_err();
        assert!(matches!(err, Error::Schema(ref msg) if msg.contains("line 3")));

        let raw = "SNP,CHR,BP,A1,A2,P\nrs1,1,5,A,G,1.5\n";
        assert!(matches!(
            parse_association_records(raw.as_bytes(), b','),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter(Path::new("gwas.tsv")).unwrap(), b'\t');
        assert_eq!(detect_delimiter(Path::new("gwas.TXT")).unwrap(), b'\t');
        assert_eq!(detect_delimiter(Path::new("gwas.csv")).unwrap(), b',');

        let mut file = tempfile::Builder::new().suffix(".sumstats").tempfile().unwrap();
        writeln!(file, "SNP\tCHR\tBP").unwrap();
        assert_eq!(detect_delimiter(file.path()).unwrap(), b'\t');
    }

    #[test]
    fn test_write_credible_sets() {
        let variant = Variant::new("rs1", Chromosome::Autosome(3), 42, "A", "G", 1e-9).unwrap();
        let entries = vec![CredibleSetEntry {
            locus_id: 1,
            variant,
            probability: 0.5,
            cumulative_probability: 0.5,
        }];
        let mut buffer = Vec::new();
        write_credible_sets(&mut buffer, &entries, b',').unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Locus_ID,SNP,CHR,BP,A1,A2,P,PP,Cumulative_PP"));
        assert_eq!(lines.next(), Some("1,rs1,3,42,A,G,0.000000001,0.5,0.5"));
        assert_eq!(lines.next(), None);
    }

    const EFFECTS: &str = "\
SNP,target_gene,target_gene_score,all_genes,success,score_DNase,score_RNA,PP,Locus_ID
rs1,GRIN2A,0.9,GRIN2A:0.9;DRD2:-0.4,True,0.5,1.5,0.6,1
rs2,CACNA1C,0.3,,True,0.2,,0.4,1
rs3,NEG,-0.3,,True,0.1,0.1,,2
rs4,,,,False,,,0.9,2
rs5,X,1,BAD;OK:1,true,0,0,1.0,3
";

    #[test]
    fn test_parse_variant_effects() {
        let table = parse_variant_effects(EFFECTS.as_bytes(), b',').unwrap();
        assert_eq!(
            table.schema.present().collect::<Vec<_>>(),
            vec![Modality::Dnase, Modality::Rna]
        );
        assert_eq!(table.failed, vec!["rs4".to_string()]);

        let rs1 = &table.effects["rs1"];
        assert_eq!(rs1.targets.len(), 2);
        assert_eq!(rs1.targets[1].gene, "DRD2");
        assert_eq!(rs1.targets[1].primary, -0.4);
        assert_eq!(rs1.targets[1].modalities[Modality::Rna], 1.5);

        // Empty all_genes falls back to a positive target gene score only
        let rs2 = &table.effects["rs2"];
        assert_eq!(rs2.targets[0].gene, "CACNA1C");
        assert_eq!(rs2.targets[0].modalities[Modality::Rna], 0.0);
        assert!(table.effects["rs3"].targets.is_empty());

        let rs5 = &table.effects["rs5"];
        assert_eq!(rs5.targets.len(), 1);
        assert_eq!(rs5.targets[0].gene, "OK");
        assert_eq!(table.warnings.len(), 1);

        assert_eq!(table.weighted_variants.len(), 4);
        assert_eq!(
            table.weighted_variants[0],
            WeightedVariant::new("rs1".into(), Some(1), Some(0.6))
        );
        assert_eq!(table.weighted_variants[2].probability, None);
    }

    #[test]
    fn test_duplicate_effect_rows_keep_the_first() {
        let raw = "\
SNP,all_genes,score_DNase,PP
rs1,GRIN2A:1.0,1.0,0.5
rs1,GRIN2A:2.0,4.0,0.9
";
        let table = parse_variant_effects(raw.as_bytes(), b',').unwrap();
        assert_eq!(table.effects.len(), 1);
        assert_eq!(table.effects["rs1"].targets[0].primary, 1.0);
        assert_eq!(
            table.weighted_variants,
            vec![WeightedVariant::new("rs1".into(), None, Some(0.5))]
        );

        let report = crate::aggregate::aggregate_gene_scores(&table.weighted_variants, &table.effects);
        assert_eq!(report.scores[0].n_variants, 1);
        assert_relative_eq!(report.scores[0].weighted_score, 0.5);
    }

    #[test]
    fn test_non_finite_cells_are_missing() {
        let raw = "\
SNP,target_gene,target_gene_score,all_genes,score_DNase,PP
rs1,A,1.0,A:1.0,NaN,0.5
rs2,B,1.0,B:1.0,3.0,0.5
rs3,C,inf,,1.0,0.5
";
        let table = parse_variant_effects(raw.as_bytes(), b',').unwrap();
        assert_eq!(table.effects["rs1"].targets[0].modalities[Modality::Dnase], 0.0);
        assert!(table.effects["rs3"].targets.is_empty());
        assert_eq!(table.warnings.len(), 2);
        assert!(matches!(
            &table.warnings[0],
            DataQualityWarning::NonFiniteValue { variant_id, column, .. }
                if variant_id == "rs1" && column == "score_DNase"
        ));

        let report = crate::aggregate::aggregate_gene_scores(&table.weighted_variants, &table.effects);
        let universe = GeneUniverse::new(["A", "B", "C"]).unwrap();
        let calibration =
            calibrate_against_null(&report.scores, &universe, &table.schema, PValueAdjustment::None);
        let b = calibration.results.get("B").unwrap();
        assert!(b.modality_z[Modality::Dnase] > 0.0);
        assert!(calibration.results.genes.iter().all(|g| g.modality_z[Modality::Dnase].is_finite()));
    }

    #[test]
    fn test_short_row_is_a_schema_error() {
        let raw = "SNP,CHR,BP,A1,A2,P\nrs1,1,5,A\n";
        let err = parse_association_records(raw.as_bytes(), b',').unwrap_err();
        assert!(matches!(err, Error::Schema(ref msg) if msg.contains("line 2")));

        let raw = "SNP,all_genes\nrs1\n";
        assert!(matches!(
            parse_variant_effects(raw.as_bytes(), b','),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn test_effect_table_needs_gene_column() {
        let raw = "SNP,score_DNase\nrs1,0.5\n";
        assert!(matches!(
            parse_variant_effects(raw.as_bytes(), b','),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn test_resolve_gene_column() {
        assert_eq!(resolve_gene_column(&["id", "Symbol", "gene_name"]), Some(2));
        assert_eq!(resolve_gene_column(&["id", "GENE"]), Some(1));
        assert_eq!(resolve_gene_column(&["id", "hgnc_symbol"]), Some(1));
        assert_eq!(resolve_gene_column(&["id", "tpm"]), None);
    }

    #[test]
    fn test_read_gene_universe() {
        let mut file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        write!(file, "ensembl\tgene_symbol\nENSG1\tGRIN2A\nENSG2\tDRD2\nENSG3\tGRIN2A\n").unwrap();
        let universe = read_gene_universe(file.path()).unwrap();
        assert_eq!(universe.genes(), &["GRIN2A", "DRD2"]);
    }

    #[test]
    fn test_gene_universe_failures() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_gene_universe(&dir.path().join("missing.tsv")),
            Err(Error::Universe(_))
        ));
        assert!(matches!(
            parse_gene_universe("id,tpm\nA,1\n".as_bytes(), b','),
            Err(Error::Universe(_))
        ));
        assert!(matches!(
            parse_gene_universe("gene\n".as_bytes(), b','),
            Err(Error::Universe(_))
        ));
    }

    #[test]
    fn test_write_calibrated() {
        let universe = GeneUniverse::new(["A", "B"]).unwrap();
        let mut score = GeneScore::empty("B");
        score.weighted_score = 2.0;
        score.max_score = 2.0;
        score.n_variants = 1;
        let schema = resolve_modality_columns(&["SNP", "score_CAGE"]);
        let calibration =
            calibrate_against_null(&[score], &universe, &schema, PValueAdjustment::None);

        let mut buffer = Vec::new();
        write_calibrated(&mut buffer, &calibration.results, b'\t').unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let rows = text.lines().map(|l| l.split('\t').collect::<Vec<_>>()).collect::<Vec<_>>();
        assert_eq!(
            rows[0],
            vec![
                "gene",
                "weighted_score",
                "max_score",
                "n_variants",
                "score_CAGE",
                "z_score",
                "z_CAGE",
                "rank",
                "empirical_p_value",
                "empirical_q_value"
            ]
        );
        assert_eq!(rows[1][0], "B");
        assert_eq!(rows[1][7], "1");
        assert_relative_eq!(rows[1][5].parse::<f64>().unwrap(), 1.0);
        assert_eq!(rows[2][0], "A");
        assert_eq!(rows[2][6], "0");
    }

    #[test]
    fn test_write_gene_scores() {
        let mut score = GeneScore::empty("GRIN2A");
        score.weighted_score = 0.5;
        score.modality_scores[Modality::Dnase] = 0.25;
        let mut buffer = Vec::new();
        write_gene_scores(&mut buffer, &[score], &ModalitySchema::full(), b',').unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("gene,weighted_score,max_score,n_variants,score_DNase,score_H3K27ac,score_H3K4me1,score_H3K4me3,score_CAGE,score_CTCF,score_RNA")
        );
        assert_eq!(lines.next(), Some("GRIN2A,0.5,0,0,0.25,0,0,0,0,0,0"));
    }
}
