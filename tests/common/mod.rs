//! Simulated backcross written to TSV files.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

pub const SPACING: f64 = 10.0;

pub struct SimulatedQtl {
    pub chromosome: usize,
    pub site: usize,
    pub effect: f64,
}

pub struct Files {
    pub geno: PathBuf,
    pub pheno: PathBuf,
    pub covar: PathBuf,
}

/// Writes a backcross with fully informative genotypes on `sites_per_chromosome`
/// grid positions per chromosome. Phenotype column `t` responds to each QTL with
/// `effect * (0.5 + 0.25 * t)`; covariate `sex` shifts every column by 0.5.
pub fn write_backcross(
    dir: &Path,
    n: usize,
    sites_per_chromosome: &[usize],
    qtl: &[SimulatedQtl],
    n_columns: usize,
    seed: u64,
) -> Files {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1.0).unwrap();
    let recombination = 0.5 * (1.0 - (-2.0 * SPACING / 100.0).exp());

    // genotypes[chromosome][site][individual]
    let mut genotypes: Vec<Vec<Vec<usize>>> = sites_per_chromosome
        .iter()
        .map(|&sites| vec![vec![0; n]; sites])
        .collect();
    for i in 0..n {
        for chromosome in genotypes.iter_mut() {
            let mut g = rng.gen_range(0..2);
            for (site, row) in chromosome.iter_mut().enumerate() {
                if site > 0 && rng.r#gen::<f64>() < recombination {
                    g = 1 - g;
                }
                row[i] = g;
            }
        }
    }

    let mut geno = String::from("chr\tpos\tgeno");
    for i in 0..n {
        write!(geno, "\tind{i}").unwrap();
    }
    geno.push('\n');
    for (c, chromosome) in genotypes.iter().enumerate() {
        for (site, row) in chromosome.iter().enumerate() {
            for class in 0..2 {
                write!(geno, "{}\t{}\t{}", c + 1, SPACING * site as f64, ["AA", "AB"][class])
                    .unwrap();
                for &g in row {
                    write!(geno, "\t{}", if g == class { 1 } else { 0 }).unwrap();
                }
                geno.push('\n');
            }
        }
    }

    let mut pheno = String::from("id");
    for t in 0..n_columns {
        write!(pheno, "\tt{t}").unwrap();
    }
    pheno.push('\n');
    let mut covar = String::from("id\tsex\n");
    for i in 0..n {
        let sex = rng.gen_range(0..2);
        writeln!(covar, "ind{i}\t{sex}").unwrap();
        write!(pheno, "ind{i}").unwrap();
        for t in 0..n_columns {
            let scale = 0.5 + 0.25 * t as f64;
            let signal: f64 = qtl
                .iter()
                .map(|q| q.effect * scale * genotypes[q.chromosome][q.site][i] as f64)
                .sum();
            let value = signal + 0.5 * sex as f64 + noise.sample(&mut rng);
            write!(pheno, "\t{value:.6}").unwrap();
        }
        pheno.push('\n');
    }

    let files = Files {
        geno: dir.join("geno.tsv"),
        pheno: dir.join("pheno.tsv"),
        covar: dir.join("covar.tsv"),
    };
    fs::write(&files.geno, geno).unwrap();
    fs::write(&files.pheno, pheno).unwrap();
    fs::write(&files.covar, covar).unwrap();
    files
}
