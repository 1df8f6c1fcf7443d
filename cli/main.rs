#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

mod commands;
mod session;

use clap::{ArgMatches, Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::process;

use commands::{parse_exact_override, parse_matching_override};
use glycorisk::data::{DatasetOptions, TargetColumn, load_dataset};
use glycorisk::gbdt::BoosterConfig;
use glycorisk::service::{Override, RiskService};
use glycorisk::shap::DEFAULT_TOP_K;
use glycorisk::train::{TrainingConfig, train_pipeline};

const DEFAULT_MODEL: &str = "diabetes_pipeline.toml";
const DEFAULT_DATA: &str = "train.csv";

#[derive(Args)]
pub struct ServiceArgs {
    /// Path to the trained pipeline (.toml)
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: PathBuf,

    /// Path to the reference patient table that indices refer to
    #[arg(long, default_value = DEFAULT_DATA)]
    pub data: PathBuf,

    /// Field separator of the reference table; defaults to the training table's
    #[arg(long, value_parser = parse_separator)]
    pub separator: Option<u8>,
}

impl ServiceArgs {
    fn open(&self) -> Result<RiskService, Box<dyn std::error::Error>> {
        Ok(RiskService::open_with(&self.model, &self.data, self.separator)?)
    }
}

#[derive(Args)]
pub struct TrainArgs {
    /// Labeled table with a header row; the label is the last column unless --target is given
    #[arg(default_value = DEFAULT_DATA)]
    pub training_data: PathBuf,

    /// Name of the 0/1 label column
    #[arg(long)]
    pub target: Option<String>,

    /// Field separator of the training table (a single character, or "tab")
    #[arg(long, default_value = ",", value_parser = parse_separator)]
    pub separator: u8,

    /// Where to write the trained pipeline
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub output: PathBuf,

    /// Number of boosted trees
    #[arg(long, default_value_t = BoosterConfig::default().n_estimators)]
    pub n_estimators: usize,

    /// Shrinkage applied to every tree's output
    #[arg(long, default_value_t = BoosterConfig::default().learning_rate)]
    pub learning_rate: f64,

    /// Maximum depth of each tree
    #[arg(long, default_value_t = BoosterConfig::default().max_depth)]
    pub max_depth: usize,

    /// Fraction of rows sampled for each tree
    #[arg(long, default_value_t = BoosterConfig::default().subsample)]
    pub subsample: f64,

    /// Fraction of features sampled for each tree
    #[arg(long, default_value_t = BoosterConfig::default().colsample_bytree)]
    pub colsample_bytree: f64,

    /// L2 regularisation of leaf weights
    #[arg(long, default_value_t = BoosterConfig::default().reg_lambda)]
    pub reg_lambda: f64,

    /// Minimum loss reduction needed to split a node
    #[arg(long, default_value_t = BoosterConfig::default().min_split_loss)]
    pub min_split_loss: f64,

    /// Minimum hessian sum in each child of a split
    #[arg(long, default_value_t = BoosterConfig::default().min_child_weight)]
    pub min_child_weight: f64,

    /// Maximum number of histogram bins per feature
    #[arg(long, default_value_t = BoosterConfig::default().max_bins)]
    pub max_bins: usize,

    /// Fraction of rows held out for validation
    #[arg(long, default_value_t = TrainingConfig::default().validation_fraction)]
    pub validation_fraction: f64,

    /// Seed for the validation split and for row/feature sampling
    #[arg(long, default_value_t = TrainingConfig::default().seed)]
    pub seed: u64,
}

impl TrainArgs {
    fn training_config(&self) -> TrainingConfig {
        TrainingConfig {
            validation_fraction: self.validation_fraction,
            seed: self.seed,
            booster: BoosterConfig {
                n_estimators: self.n_estimators,
                learning_rate: self.learning_rate,
                max_depth: self.max_depth,
                subsample: self.subsample,
                colsample_bytree: self.colsample_bytree,
                reg_lambda: self.reg_lambda,
                min_split_loss: self.min_split_loss,
                min_child_weight: self.min_child_weight,
                max_bins: self.max_bins,
                seed: self.seed,
            },
            ..TrainingConfig::default()
        }
    }
}

fn parse_separator(raw: &str) -> Result<u8, String> {
    match raw {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        _ => match raw.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(format!(
                "separator must be a single ASCII character or 'tab', got '{raw}'"
            )),
        },
    }
}

#[derive(Parser)]
#[command(
    name = "glycorisk",
    about = "Diabetes risk model training, scoring and explanation",
    long_about = "Trains a gradient-boosted diabetes risk model on tabular patient data and \
                 answers risk, what-if, explanation and group-breakdown queries against it."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the preprocessing and classifier pipeline
    #[command(about = "Train the risk model (outputs: diabetes_pipeline.toml)")]
    Train(TrainArgs),

    /// Show one patient's record, risk probability and risk band
    #[command(about = "Assess one patient")]
    Assess {
        #[command(flatten)]
        service: ServiceArgs,

        /// Row of the patient in the reference table (0-based)
        #[arg(long)]
        index: usize,
    },

    /// Re-score a patient after editing some fields
    #[command(about = "Simulate the effect of changed measurements")]
    WhatIf {
        #[command(flatten)]
        service: ServiceArgs,

        /// Row of the patient in the reference table (0-based)
        #[arg(long)]
        index: usize,

        /// Set one column exactly: COLUMN=VALUE (repeatable; edits apply in the order given)
        #[arg(long = "set", value_name = "COLUMN=VALUE", value_parser = parse_exact_override)]
        set: Vec<Override>,

        /// Set every column whose name contains TEXT, ignoring case (repeatable)
        #[arg(long = "set-matching", value_name = "TEXT=VALUE", value_parser = parse_matching_override)]
        set_matching: Vec<Override>,
    },

    /// Explain one patient's prediction with exact feature attributions
    #[command(about = "Explain one patient's risk")]
    Explain {
        #[command(flatten)]
        service: ServiceArgs,

        /// Row of the patient in the reference table (0-based)
        #[arg(long)]
        index: usize,

        /// Number of contributions to show
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },

    /// Mean predicted risk per group of a low-cardinality column
    #[command(about = "Break down predicted risk by a sensitive attribute")]
    Fairness {
        #[command(flatten)]
        service: ServiceArgs,

        /// Column to group by; lists the eligible columns when omitted
        #[arg(long)]
        column: Option<String>,
    },

    /// Score every patient in the reference table
    #[command(about = "Score the reference table (outputs: predictions.tsv)")]
    Score {
        #[command(flatten)]
        service: ServiceArgs,

        /// Where to write the scores
        #[arg(long, default_value = "predictions.tsv")]
        output: PathBuf,
    },

    /// Interactive session over one loaded model
    #[command(about = "Start an interactive session")]
    Session {
        #[command(flatten)]
        service: ServiceArgs,
    },
}

pub fn train(args: TrainArgs) -> Result<(), Box<dyn std::error::Error>> {
    let options = DatasetOptions {
        target: args
            .target
            .clone()
            .map_or(TargetColumn::Last, TargetColumn::Named),
        separator: args.separator,
    };
    println!("Loading training data from: {}", args.training_data.display());
    let dataset = load_dataset(&args.training_data, &options)?;
    let (negatives, positives) = dataset.class_counts();
    println!(
        "Loaded {} rows ({} positive, {} negative), target column '{}'",
        dataset.len(),
        positives,
        negatives,
        dataset.target_name()
    );

    let pipeline = train_pipeline(&dataset, &args.training_config())?;
    pipeline.save(&args.output)?;
    println!("Model saved to: {}", args.output.display());
    Ok(())
}

/// Merges `--set` and `--set-matching` edits back into the order they were
/// typed, so a later edit of the same column wins.
fn in_command_line_order(
    set: Vec<Override>,
    set_matching: Vec<Override>,
    matches: Option<&ArgMatches>,
) -> Vec<Override> {
    let positions = |id: &str| {
        matches
            .and_then(|m| m.indices_of(id))
            .into_iter()
            .flatten()
            .chain(std::iter::repeat(usize::MAX))
    };
    let mut tagged: Vec<(usize, Override)> = positions("set")
        .zip(set)
        .chain(positions("set_matching").zip(set_matching))
        .collect();
    tagged.sort_by_key(|(position, _)| *position);
    tagged.into_iter().map(|(_, edit)| edit).collect()
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Cli::command().get_matches();
    let Cli { command } = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());
    let mut stdout = io::stdout().lock();

    let result: Result<(), Box<dyn std::error::Error>> = match command {
        Some(Commands::Train(args)) => train(args),
        Some(Commands::Assess { service, index }) => service
            .open()
            .and_then(|s| Ok(commands::assess(&s, index, &mut stdout)?)),
        Some(Commands::WhatIf {
            service,
            index,
            set,
            set_matching,
        }) => {
            let overrides =
                in_command_line_order(set, set_matching, matches.subcommand_matches("what-if"));
            service
                .open()
                .and_then(|s| Ok(commands::what_if(&s, index, &overrides, &mut stdout)?))
        }
        Some(Commands::Explain {
            service,
            index,
            top_k,
        }) => service
            .open()
            .and_then(|s| Ok(commands::explain(&s, index, top_k, &mut stdout)?)),
        Some(Commands::Fairness { service, column }) => service
            .open()
            .and_then(|s| Ok(commands::fairness(&s, column.as_deref(), &mut stdout)?)),
        Some(Commands::Score { service, output }) => service.open().and_then(|s| {
            commands::write_scores(&s, &output)?;
            println!("Wrote {} scores to: {}", s.len(), output.display());
            Ok(())
        }),
        Some(Commands::Session { service }) => service.open().and_then(|s| session::run(&s)),
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_separator() {
        assert_eq!(parse_separator(",").unwrap(), b',');
        assert_eq!(parse_separator("tab").unwrap(), b'\t');
        assert_eq!(parse_separator(";").unwrap(), b';');
        assert!(parse_separator("::").is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_keep_command_line_order() {
        let matches = Cli::command()
            .try_get_matches_from([
                "glycorisk",
                "what-if",
                "--index",
                "0",
                "--set-matching",
                "GLUC=100",
                "--set",
                "glucose=190",
                "--set-matching",
                "bmi=40",
            ])
            .unwrap();
        let Cli { command } = Cli::from_arg_matches(&matches).unwrap();
        let Some(Commands::WhatIf {
            set, set_matching, ..
        }) = command
        else {
            panic!("expected the what-if subcommand");
        };
        let ordered = in_command_line_order(set, set_matching, matches.subcommand_matches("what-if"));
        let selectors: Vec<String> = ordered.iter().map(|o| o.selector.to_string()).collect();
        assert_eq!(
            selectors,
            vec![
                "columns containing 'GLUC'",
                "column 'glucose'",
                "columns containing 'bmi'"
            ]
        );
    }

    #[test]
    fn test_query_separator_flag() {
        let cli = Cli::parse_from(["glycorisk", "assess", "--index", "1", "--separator", "tab"]);
        let Some(Commands::Assess { service, index }) = cli.command else {
            panic!("expected the assess subcommand");
        };
        assert_eq!(index, 1);
        assert_eq!(service.separator, Some(b'\t'));

        let cli = Cli::parse_from(["glycorisk", "assess", "--index", "1"]);
        let Some(Commands::Assess { service, .. }) = cli.command else {
            panic!("expected the assess subcommand");
        };
        assert_eq!(service.separator, None);
    }

    #[test]
    fn test_training_flags_reach_the_config() {
        let cli = Cli::parse_from([
            "glycorisk",
            "train",
            "data.csv",
            "--n-estimators",
            "25",
            "--max-depth",
            "2",
        ]);
        let Some(Commands::Train(args)) = cli.command else {
            panic!("expected the train subcommand");
        };
        let config = args.training_config();
        assert_eq!(config.booster.n_estimators, 25);
        assert_eq!(config.booster.max_depth, 2);
        assert_eq!(config.booster.learning_rate, BoosterConfig::default().learning_rate);
        assert_eq!(args.output, PathBuf::from(DEFAULT_MODEL));
    }
}
