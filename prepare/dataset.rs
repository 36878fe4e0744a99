use ndarray::{Array2, Axis};

use super::{DataError, GenotypeProbabilities, NumericTable, PreparedData};

/// Fewest complete individuals a regression can be run on.
pub const MINIMUM_INDIVIDUALS: usize = 3;

/// Aligns phenotypes, covariates and genotypes on their common, complete
/// individuals.
///
/// `columns` selects phenotype columns by zero-based index; `None` selects all.
/// Individuals are kept in phenotype-file order. An individual is dropped when it
/// has no genotype probabilities, has no covariate row, or is missing any
/// selected phenotype or any covariate value, so every selected phenotype is
/// analyzed on the same individuals.
pub fn prepare_dataset(
    phenotypes: &NumericTable,
    covariates: Option<&NumericTable>,
    genotypes: &GenotypeProbabilities,
    columns: Option<&[usize]>,
) -> Result<PreparedData, DataError> {
    let columns = select_columns(phenotypes.n_columns(), columns)?;

    let mut keep = Vec::new();
    let mut geno_rows = Vec::new();
    let mut covar_rows = Vec::new();
    let (mut no_genotype, mut incomplete) = (0usize, 0usize);
    for (row, id) in phenotypes.ids.iter().enumerate() {
        let Some(geno_row) = genotypes.ids.iter().position(|g| g == id) else {
            no_genotype += 1;
            continue;
        };
        let covar_row = match covariates {
            Some(table) => match table.row_of(id) {
                Some(r) if table.values.row(r).iter().all(|v| !v.is_nan()) => Some(r),
                _ => {
                    incomplete += 1;
                    continue;
                }
            },
            None => None,
        };
        if columns.iter().any(|&c| phenotypes.values[[row, c]].is_nan()) {
            incomplete += 1;
            continue;
        }
        keep.push(row);
        geno_rows.push(geno_row);
        covar_rows.extend(covar_row);
    }

    if no_genotype > 0 {
        log::warn!("Dropping {no_genotype} individual(s) without genotype probabilities.");
    }
    if incomplete > 0 {
        log::warn!(
            "Dropping {incomplete} individual(s) with missing phenotype or covariate values."
        );
    }
    if keep.len() < MINIMUM_INDIVIDUALS {
        return Err(DataError::InsufficientIndividuals {
            found: keep.len(),
            required: MINIMUM_INDIVIDUALS,
        });
    }

    let phenotype_values = phenotypes
        .values
        .select(Axis(0), &keep)
        .select(Axis(1), &columns);
    let phenotype_names: Vec<String> = columns
        .iter()
        .map(|&c| phenotypes.names[c].clone())
        .collect();
    for (name, column) in phenotype_names.iter().zip(phenotype_values.columns()) {
        let first = column[0];
        if column.iter().all(|&v| v == first) {
            return Err(DataError::ZeroVariance(name.clone()));
        }
    }

    let (covariate_names, covariate_values) = match covariates {
        Some(table) => (table.names.clone(), table.values.select(Axis(0), &covar_rows)),
        None => (Vec::new(), Array2::zeros((keep.len(), 0))),
    };

    log::info!(
        "Prepared {} individual(s), {} phenotype column(s), {} covariate(s)",
        keep.len(),
        phenotype_names.len(),
        covariate_names.len()
    );
    Ok(PreparedData {
        ids: keep.iter().map(|&r| phenotypes.ids[r].clone()).collect(),
        phenotype_names,
        source_columns: columns,
        phenotypes: phenotype_values,
        covariate_names,
        covariates: covariate_values,
        genotypes: genotypes.select_individuals(&geno_rows),
    })
}

fn select_columns(available: usize, requested: Option<&[usize]>) -> Result<Vec<usize>, DataError> {
    let Some(requested) = requested else {
        return Ok((0..available).collect());
    };
    if requested.is_empty() {
        return Err(DataError::NoColumnsSelected);
    }
    let mut selected = Vec::with_capacity(requested.len());
    for &index in requested {
        if index >= available {
            return Err(DataError::ColumnOutOfRange { index, available });
        }
        if selected.contains(&index) {
            return Err(DataError::DuplicateColumn(index));
        }
        selected.push(index);
    }
    Ok(selected)
}
