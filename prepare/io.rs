//! TSV readers. Every file is tab-separated with a header row; cells are trimmed.
//!
//! - phenotypes: `id`, then one column per measurement. `NA` or an empty cell
//!   marks a missing value.
//! - covariates: same layout as phenotypes.
//! - genotype probabilities: `chr`, `pos`, `geno`, then one column per
//!   individual. Each row holds the probability of one genotype class at one
//!   grid position; the rows of a position are consecutive and positions are
//!   grouped by chromosome.

use ahash::AHashSet;
use csv::{ReaderBuilder, StringRecord, Trim};
use ndarray::{Array2, Array3};
use std::path::Path;

use super::{DataError, GenotypeProbabilities, NumericTable};
use crate::genome::{Chromosome, GenomeDescription, Locus};

const MISSING: &str = "NA";
const PROBABILITY_TOLERANCE: f64 = 1e-3;

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>, DataError> {
    Ok(ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)?)
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map_or(0, |p| p.line())
}

fn check_leading(
    path: &Path,
    headers: &StringRecord,
    expected: &[&'static str],
) -> Result<(), DataError> {
    for (i, &name) in expected.iter().enumerate() {
        let found = headers.get(i).unwrap_or("");
        if !found.eq_ignore_ascii_case(name) {
            return Err(DataError::UnexpectedHeader {
                path: path.display().to_string(),
                expected: name,
                found: found.to_string(),
            });
        }
    }
    if headers.len() <= expected.len() {
        return Err(DataError::NoDataColumns {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

fn parse_cell(
    path: &Path,
    record: &StringRecord,
    column: &str,
    raw: &str,
    allow_missing: bool,
) -> Result<f64, DataError> {
    if allow_missing && (raw.is_empty() || raw.eq_ignore_ascii_case(MISSING)) {
        return Ok(f64::NAN);
    }
    let value: f64 = raw.parse().map_err(|_| DataError::ParseValue {
        path: path.display().to_string(),
        line: line_of(record),
        column: column.to_string(),
        value: raw.to_string(),
    })?;
    if !value.is_finite() {
        return Err(DataError::NonFiniteValue {
            path: path.display().to_string(),
            line: line_of(record),
            column: column.to_string(),
        });
    }
    Ok(value)
}

fn load_numeric_table(path: &Path) -> Result<NumericTable, DataError> {
    let mut rdr = reader(path)?;
    let headers = rdr.headers()?.clone();
    check_leading(path, &headers, &["id"])?;
    let names: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

    let mut ids = Vec::new();
    let mut seen = AHashSet::new();
    let mut cells = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let id = record.get(0).unwrap_or("").to_string();
        if !seen.insert(id.clone()) {
            return Err(DataError::DuplicateIndividual(id));
        }
        for (name, raw) in names.iter().zip(record.iter().skip(1)) {
            cells.push(parse_cell(path, &record, name, raw, true)?);
        }
        ids.push(id);
    }
    let values = Array2::from_shape_vec((ids.len(), names.len()), cells)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    log::debug!(
        "Read {} row(s) x {} column(s) from {}",
        ids.len(),
        names.len(),
        path.display()
    );
    Ok(NumericTable { ids, names, values })
}

pub fn load_phenotypes(path: &Path) -> Result<NumericTable, DataError> {
    load_numeric_table(path)
}

pub fn load_covariates(path: &Path) -> Result<NumericTable, DataError> {
    load_numeric_table(path)
}

pub fn load_genotype_probabilities(path: &Path) -> Result<GenotypeProbabilities, DataError> {
    let mut rdr = reader(path)?;
    let headers = rdr.headers()?.clone();
    check_leading(path, &headers, &["chr", "pos", "geno"])?;
    let ids: Vec<String> = headers.iter().skip(3).map(str::to_string).collect();
    let mut unique = AHashSet::new();
    for id in &ids {
        if !unique.insert(id.as_str()) {
            return Err(DataError::DuplicateIndividual(id.clone()));
        }
    }

    let mut chromosomes: Vec<Chromosome> = Vec::new();
    let mut classes: Vec<String> = Vec::new();
    let mut current_classes: Vec<String> = Vec::new();
    let mut current: Option<Locus> = None;
    let mut cells: Vec<f64> = Vec::new();

    for result in rdr.records() {
        let record = result?;
        let chr = record.get(0).unwrap_or("").to_string();
        let pos = parse_cell(path, &record, "pos", record.get(1).unwrap_or(""), false)?;
        let geno = record.get(2).unwrap_or("").to_string();
        let locus = Locus::new(chr.clone(), pos);

        let new_position = current.as_ref().is_none_or(|c| !c.same_site(&locus));
        if new_position {
            if let Some(done) = current.take() {
                close_position(&done, &mut classes, &mut current_classes)?;
            }
            match chromosomes.last_mut() {
                Some(last) if last.name == chr => last.positions.push(pos),
                _ => {
                    if chromosomes.iter().any(|c| c.name == chr) {
                        return Err(DataError::NonContiguousChromosome(chr));
                    }
                    chromosomes.push(Chromosome {
                        name: chr.clone(),
                        positions: vec![pos],
                    });
                }
            }
            current = Some(locus.clone());
        }
        current_classes.push(geno);

        for (id, raw) in ids.iter().zip(record.iter().skip(3)) {
            let value = parse_cell(path, &record, id, raw, false)?;
            if !(-PROBABILITY_TOLERANCE..=1.0 + PROBABILITY_TOLERANCE).contains(&value) {
                return Err(DataError::ProbabilityOutOfRange {
                    locus: locus.clone(),
                    individual: id.clone(),
                    value,
                });
            }
            cells.push(value);
        }
    }
    if let Some(done) = current.take() {
        close_position(&done, &mut classes, &mut current_classes)?;
    }
    if classes.len() < 2 {
        return Err(DataError::TooFewGenotypeClasses(classes.len()));
    }

    let genome = GenomeDescription::new(chromosomes)?;
    let n_positions = genome.n_positions();
    let n_classes = classes.len();
    // Rows arrive as [position][class][individual]; store as [position][individual][class].
    let raw = Array3::from_shape_vec((n_positions, n_classes, ids.len()), cells)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let probs = raw.permuted_axes([0, 2, 1]).as_standard_layout().to_owned();

    for (p, locus) in genome.loci().enumerate() {
        for (i, id) in ids.iter().enumerate() {
            let sum: f64 = (0..n_classes).map(|k| probs[[p, i, k]]).sum();
            if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                return Err(DataError::ProbabilitiesDoNotSum {
                    locus,
                    individual: id.clone(),
                    sum,
                });
            }
        }
    }

    log::info!(
        "Read genotype probabilities: {} chromosome(s), {} position(s), {} class(es), {} individual(s)",
        genome.chromosomes().len(),
        n_positions,
        n_classes,
        ids.len()
    );
    Ok(GenotypeProbabilities {
        genome,
        classes,
        ids,
        probs,
    })
}

/// Checks the class labels of a finished position against the first position.
fn close_position(
    locus: &Locus,
    classes: &mut Vec<String>,
    current: &mut Vec<String>,
) -> Result<(), DataError> {
    let found = std::mem::take(current);
    if classes.is_empty() {
        *classes = found;
    } else if *classes != found {
        return Err(DataError::InconsistentGenotypeClasses {
            locus: locus.clone(),
            expected: classes.clone(),
            found,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tsv(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn reads_phenotypes_with_missing_values() {
        let file = write_tsv("id\tt1\tt2\na\t1.5\tNA\nb\t2.0\t\nc\t-0.5\t3.25\n");
        let table = load_phenotypes(file.path()).unwrap();
        assert_eq!(table.ids, vec!["a", "b", "c"]);
        assert_eq!(table.names, vec!["t1", "t2"]);
        assert_eq!(table.values[[0, 0]], 1.5);
        assert!(table.values[[0, 1]].is_nan());
        assert!(table.values[[1, 1]].is_nan());
        assert_eq!(table.values[[2, 1]], 3.25);
        assert_eq!(table.row_of("c"), Some(2));
    }

    #[test]
    fn rejects_bad_headers_and_cells() {
        let file = write_tsv("sample\tt1\na\t1.0\n");
        assert!(matches!(
            load_phenotypes(file.path()),
            Err(DataError::UnexpectedHeader { expected: "id", .. })
        ));

        let file = write_tsv("id\tt1\na\tabc\n");
        match load_phenotypes(file.path()) {
            Err(DataError::ParseValue { line, value, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let file = write_tsv("id\tt1\na\t1.0\na\t2.0\n");
        assert!(matches!(
            load_covariates(file.path()),
            Err(DataError::DuplicateIndividual(id)) if id == "a"
        ));
    }

    #[test]
    fn reads_genotype_probabilities_into_position_individual_class_order() {
        let file = write_tsv(
            "chr\tpos\tgeno\ti1\ti2\n\
             1\t0\tAA\t0.9\t0.2\n\
             1\t0\tAB\t0.1\t0.8\n\
             1\t5\tAA\t0.6\t0.3\n\
             1\t5\tAB\t0.4\t0.7\n\
             X\t2.5\tAA\t1.0\t0.0\n\
             X\t2.5\tAB\t0.0\t1.0\n",
        );
        let probs = load_genotype_probabilities(file.path()).unwrap();
        assert_eq!(probs.genome.n_positions(), 3);
        assert_eq!(probs.genome.chromosome_order("X"), Some(1));
        assert_eq!(probs.classes, vec!["AA", "AB"]);
        assert_eq!(probs.ids, vec!["i1", "i2"]);
        assert_eq!(probs.probs.shape(), &[3, 2, 2]);
        assert_eq!(probs.probs[[1, 0, 1]], 0.4);
        assert_eq!(probs.at(1)[[1, 0]], 0.3);
        assert_eq!(probs.probs[[2, 1, 1]], 1.0);

        let subset = probs.select_individuals(&[1]);
        assert_eq!(subset.ids, vec!["i2"]);
        assert_eq!(subset.probs[[0, 0, 1]], 0.8);
    }

    #[test]
    fn rejects_malformed_genotype_probabilities() {
        let split = write_tsv(
            "chr\tpos\tgeno\ti1\n\
             1\t0\tA\t0.5\n1\t0\tB\t0.5\n\
             2\t0\tA\t0.5\n2\t0\tB\t0.5\n\
             1\t9\tA\t0.5\n1\t9\tB\t0.5\n",
        );
        assert!(matches!(
            load_genotype_probabilities(split.path()),
            Err(DataError::NonContiguousChromosome(chr)) if chr == "1"
        ));

        let unnormalized = write_tsv("chr\tpos\tgeno\ti1\n1\t0\tA\t0.5\n1\t0\tB\t0.2\n");
        assert!(matches!(
            load_genotype_probabilities(unnormalized.path()),
            Err(DataError::ProbabilitiesDoNotSum { .. })
        ));

        let relabeled = write_tsv(
            "chr\tpos\tgeno\ti1\n1\t0\tA\t0.5\n1\t0\tB\t0.5\n1\t3\tA\t0.5\n1\t3\tH\t0.5\n",
        );
        assert!(matches!(
            load_genotype_probabilities(relabeled.path()),
            Err(DataError::InconsistentGenotypeClasses { .. })
        ));

        let unsorted = write_tsv(
            "chr\tpos\tgeno\ti1\n1\t5\tA\t0.5\n1\t5\tB\t0.5\n1\t3\tA\t0.5\n1\t3\tB\t0.5\n",
        );
        assert!(matches!(
            load_genotype_probabilities(unsorted.path()),
            Err(DataError::Genome(_))
        ));
    }
}
