mod common;

use common::{SimulatedQtl, write_backcross};
use funqtl::config::ConfigNotice;
use funqtl::prepare::{
    PreparedData, StartingLocus, StartingModel, load_covariates, load_genotype_probabilities,
    load_phenotypes, prepare_dataset, reconcile_starting_model,
};
use funqtl::regress::HaleyKnott;
use funqtl::{ModelSpaceSearch, SearchConfig, SearchOutcome};
use tempfile::tempdir;

fn two_qtl_dataset(seed: u64) -> PreparedData {
    let dir = tempdir().unwrap();
    let files = write_backcross(
        dir.path(),
        250,
        &[11, 7],
        &[
            SimulatedQtl {
                chromosome: 0,
                site: 3,
                effect: 1.5,
            },
            SimulatedQtl {
                chromosome: 1,
                site: 4,
                effect: 1.2,
            },
        ],
        4,
        seed,
    );
    let genotypes = load_genotype_probabilities(&files.geno).unwrap();
    let phenotypes = load_phenotypes(&files.pheno).unwrap();
    let covariates = load_covariates(&files.covar).unwrap();
    prepare_dataset(&phenotypes, Some(&covariates), &genotypes, None).unwrap()
}

fn search(data: &PreparedData, config: &SearchConfig) -> SearchOutcome {
    let settings = config.resolve(data.representation()).unwrap();
    let backend = HaleyKnott::new(data).unwrap();
    ModelSpaceSearch::new(
        data.genome(),
        data.columns(),
        data.covariate_names.clone(),
        settings,
        &backend,
        &backend,
        &backend,
    )
    .unwrap()
    .run(None)
    .unwrap()
}

fn config(max_loci: usize) -> SearchConfig {
    SearchConfig {
        max_loci,
        penalties: vec![3.0],
        keep_trace: true,
        ..SearchConfig::default()
    }
}

fn near(outcome: &SearchOutcome, chromosome: &str, position: f64) -> bool {
    outcome
        .loci
        .iter()
        .any(|l| l.chromosome == chromosome && (l.position - position).abs() <= 10.0)
}

#[test]
fn finds_both_simulated_loci() {
    let data = two_qtl_dataset(2024);
    assert_eq!(data.n_phenotypes(), 4);
    assert_eq!(data.covariate_names, vec!["sex"]);

    let outcome = search(&data, &config(3));
    assert_eq!(outcome.n_loci(), 2, "{}", outcome.to_toml().unwrap());
    assert!(near(&outcome, "1", 30.0));
    assert!(near(&outcome, "2", 40.0));
    assert_eq!(outcome.loci[0].chromosome, "1");
    assert_eq!(outcome.formula, "y ~ Q1 + Q2 + sex");

    let trace = outcome.trace.as_ref().unwrap();
    let counts: Vec<usize> = trace.iter().map(|e| e.n_loci()).collect();
    assert_eq!(counts, vec![1, 2, 3, 2, 1]);
    assert!(trace.iter().all(|e| outcome.plod >= e.plod));
}

#[test]
fn repeated_runs_are_identical() {
    let data = two_qtl_dataset(99);
    let first = search(&data, &config(3));
    let second = search(&data, &config(3));
    assert_eq!(first, second);
    assert_eq!(first.to_toml().unwrap(), second.to_toml().unwrap());
}

#[test]
fn interaction_request_runs_the_additive_search() {
    let data = two_qtl_dataset(7);
    let requested = SearchConfig {
        additive_only: false,
        ..config(3)
    };
    let settings = requested.resolve(data.representation()).unwrap();
    assert_eq!(settings.notices, vec![ConfigNotice::InteractionsDowngraded]);

    let downgraded = search(&data, &requested);
    let plain = search(&data, &config(3));
    assert_eq!(downgraded, plain);
    assert!(!downgraded.model.formula.has_interactions());
}

#[test]
fn single_locus_cap_keeps_the_strongest_locus() {
    let data = two_qtl_dataset(11);
    let outcome = search(&data, &config(1));
    assert_eq!(outcome.n_loci(), 1);
    assert!(near(&outcome, "1", 30.0));
    assert_eq!(outcome.trace.as_ref().unwrap().len(), 1);
}

#[test]
fn warm_start_from_recorded_model() {
    let data = two_qtl_dataset(5);
    let start = StartingModel {
        n_individuals: Some(data.n_individuals() + 10),
        imputation_draws: None,
        loci: vec![
            StartingLocus {
                chromosome: "2".into(),
                position: 22.0,
            },
            StartingLocus {
                chromosome: "1".into(),
                position: 48.0,
            },
        ],
        interactions: Vec::new(),
    };
    let reconciled = reconcile_starting_model(&start, &data).unwrap();
    assert!(reconciled.rebuilt);

    let settings = config(2).resolve(data.representation()).unwrap();
    let backend = HaleyKnott::new(&data).unwrap();
    let outcome = ModelSpaceSearch::new(
        data.genome(),
        data.columns(),
        data.covariate_names.clone(),
        settings,
        &backend,
        &backend,
        &backend,
    )
    .unwrap()
    .run(Some((reconciled.qtl, reconciled.formula)))
    .unwrap();

    // Refinement pulls both loci onto their peaks before the first score.
    assert_eq!(outcome.n_loci(), 2);
    assert!(near(&outcome, "1", 30.0));
    assert!(near(&outcome, "2", 40.0));
}
