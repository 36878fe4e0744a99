#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

use funqtl::progress::{SearchPhase, SearchProgressObserver};
use funqtl::prepare::{
    StartingModel, load_covariates, load_genotype_probabilities, load_phenotypes,
    prepare_dataset, reconcile_starting_model,
};
use funqtl::regress::HaleyKnott;
use funqtl::{AggregationPolicy, ModelSpaceSearch, RegressionMethod, SearchConfig};

#[derive(Clone, Copy, ValueEnum)]
pub enum MethodCli {
    /// Haley-Knott regression on genotype probabilities
    Hk,
    /// Regression on imputed genotype draws
    Imp,
}

impl From<MethodCli> for RegressionMethod {
    fn from(value: MethodCli) -> Self {
        match value {
            MethodCli::Hk => RegressionMethod::HaleyKnott,
            MethodCli::Imp => RegressionMethod::Imputation,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum AggregationCli {
    /// Mean LOD across phenotype columns
    Slod,
    /// Maximum LOD across phenotype columns
    Mlod,
}

impl From<AggregationCli> for AggregationPolicy {
    fn from(value: AggregationCli) -> Self {
        match value {
            AggregationCli::Slod => AggregationPolicy::Slod,
            AggregationCli::Mlod => AggregationPolicy::Mlod,
        }
    }
}

#[derive(Args)]
pub struct SearchArgs {
    /// Genotype probability TSV (chr, pos, geno, one column per individual)
    #[arg(long, value_name = "PATH")]
    pub geno: PathBuf,

    /// Phenotype TSV (id, one column per measurement)
    #[arg(long, value_name = "PATH")]
    pub pheno: PathBuf,

    /// Covariate TSV (id, one column per covariate)
    #[arg(long, value_name = "PATH")]
    pub covar: Option<PathBuf>,

    /// Search configuration (.toml); flags below override its values
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Starting model (.toml) to begin the search from
    #[arg(long, value_name = "PATH")]
    pub start: Option<PathBuf>,

    /// Zero-based phenotype columns to analyze (default: all)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub columns: Vec<usize>,

    /// Maximum number of loci in a model
    #[arg(long, value_name = "N")]
    pub max_qtl: Option<usize>,

    #[arg(long, value_enum)]
    pub method: Option<MethodCli>,

    #[arg(long, value_enum)]
    pub aggregation: Option<AggregationCli>,

    /// Penalties: main effect, then heavy and light interaction
    #[arg(long = "penalty", value_name = "P", num_args = 1..)]
    pub penalties: Vec<f64>,

    /// Request interaction terms (only additive models are currently searched)
    #[arg(long)]
    pub interactions: bool,

    /// Skip local position refinement after each step
    #[arg(long)]
    pub no_refine: bool,

    /// Include every visited model in the output
    #[arg(long)]
    pub trace: bool,

    /// Seed for breaking exact ties between candidates
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Parser)]
#[command(
    name = "funqtl",
    version,
    about = "Stepwise multiple-QTL model search for function-valued traits."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a forward/backward model search and print the best model as TOML
    Search(SearchArgs),
    /// Print version information
    Version,
}

/// Draws one progress bar per search phase on stderr, when stderr is a terminal.
struct BarProgress {
    bar: Option<ProgressBar>,
}

impl BarProgress {
    fn new() -> Self {
        Self { bar: None }
    }
}

impl SearchProgressObserver for BarProgress {
    fn on_phase_start(&mut self, phase: SearchPhase, total_steps: usize) {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(total_steps as u64), draw_target);
        let style = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");
        bar.set_style(style);
        bar.set_message(phase.describe().to_string());
        self.bar = Some(bar);
    }

    fn on_step(&mut self, phase: SearchPhase, step: usize, n_loci: usize, plod: f64) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
            bar.set_message(format!("{phase}: step {step}, {n_loci} loci, pLOD {plod:.3}"));
        }
    }

    fn on_phase_finish(&mut self, _phase: SearchPhase) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

fn apply_overrides(config: &mut SearchConfig, args: &SearchArgs) {
    if !args.columns.is_empty() {
        config.phenotype_columns = Some(args.columns.clone());
    }
    if let Some(max_qtl) = args.max_qtl {
        config.max_loci = max_qtl;
    }
    if let Some(method) = args.method {
        config.method = method.into();
    }
    if let Some(aggregation) = args.aggregation {
        config.aggregation = aggregation.into();
    }
    if !args.penalties.is_empty() {
        config.penalties = args.penalties.clone();
    }
    if args.interactions {
        config.additive_only = false;
    }
    if args.no_refine {
        config.refine = false;
    }
    if args.trace {
        config.keep_trace = true;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
}

fn run_search(args: SearchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => SearchConfig::load(path)?,
        None => SearchConfig::default(),
    };
    apply_overrides(&mut config, &args);

    let genotypes = load_genotype_probabilities(&args.geno)?;
    let phenotypes = load_phenotypes(&args.pheno)?;
    let covariates = args.covar.as_deref().map(load_covariates).transpose()?;
    let data = prepare_dataset(
        &phenotypes,
        covariates.as_ref(),
        &genotypes,
        config.phenotype_columns.as_deref(),
    )?;

    let settings = config.resolve(data.representation())?;
    let backend = HaleyKnott::new(&data)?;

    let start = match &args.start {
        Some(path) => {
            let reconciled = reconcile_starting_model(&StartingModel::load(path)?, &data)?;
            if reconciled.rebuilt {
                log::info!(
                    "Starting model from {} will be rescored on this dataset.",
                    path.display()
                );
            }
            Some((reconciled.qtl, reconciled.formula))
        }
        None => None,
    };

    let search = ModelSpaceSearch::new(
        data.genome(),
        data.columns(),
        data.covariate_names.clone(),
        settings,
        &backend,
        &backend,
        &backend,
    )?;
    let outcome = search.run_with_progress(start, &mut BarProgress::new())?;
    log::info!(
        "Selected {} locus/loci with pLOD {:.4}",
        outcome.n_loci(),
        outcome.plod
    );
    print!("{}", outcome.to_toml()?);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Search(args)) => run_search(args),
        Some(Commands::Version) => {
            println!("funqtl {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
