use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint};
use log::LevelFilter;
use std::path::PathBuf;

use scene_cli::run::input::{load_run_config, RunConfig};
use scene_cli::run::runner;

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("SCENE_LOG", "error,scene=info"))
        .init();

    let matches = Command::new("scene")
        .version(clap::crate_version!())
        .about("Scene-category image classification experiments")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            run_args(Command::new("evaluate"))
                .about("Evaluate on a stratified train/validation split of the training data"),
        )
        .subcommand(
            run_args(Command::new("classify"))
                .about("Train on all training data and label the test directory"),
        )
        .subcommand(
            run_args(Command::new("run"))
                .about("Evaluate and/or classify as enabled in the configuration"),
        )
        .subcommand(
            run_args(Command::new("select-k"))
                .about("Select the KNN neighbour count by stratified k-fold cross validation")
                .arg(
                    Arg::new("max_k")
                        .long("max-k")
                        .help("Largest k to try. Overrides the configuration file.")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("holdout")
                        .long("holdout")
                        .help("Hold out a test split and report its accuracy for every new best k.")
                        .action(ArgAction::SetTrue),
                ),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    let (name, sub_matches) = match matches.subcommand() {
        Some(pair) => pair,
        None => unreachable!("Subcommand is required by CLI configuration"),
    };

    let config = match resolve_config(sub_matches) {
        Ok(Some(config)) => config,
        Ok(None) => return Ok(()),
        Err(e) => {
            log::error!("Invalid configuration: {:#}", e);
            std::process::exit(1)
        }
    };

    let outcome = match name {
        "evaluate" => runner::run_evaluation(&config).map(|_| ()),
        "classify" => runner::run_classification(&config).map(|_| ()),
        "run" => runner::run(&config),
        "select-k" => {
            let mut config = config;
            if let Some(max_k) = sub_matches.get_one::<usize>("max_k") {
                config.evaluation.max_k = *max_k;
            }
            runner::run_select_k(&config, sub_matches.get_flag("holdout")).map(|_| ())
        }
        _ => unreachable!(),
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(e) => {
            log::error!("{} failed: {:#}", name, e);
            std::process::exit(1)
        }
    }
}

/// Arguments shared by every subcommand.
fn run_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("config")
                .help("Path to run configuration file (JSON)")
                .required(false)
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("preset")
                .long("preset")
                .help("Use a built-in configuration instead of a configuration file.")
                .value_parser(["run1", "run2", "run3"])
                .conflicts_with("config"),
        )
        .arg(
            Arg::new("train_dir")
                .short('t')
                .long("train-dir")
                .help("Training directory (one subdirectory per class). Overrides the configuration.")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("test_dir")
                .short('i')
                .long("test-dir")
                .help("Directory of images to label. Overrides the configuration.")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("output_dir")
                .short('o')
                .long("output-dir")
                .help("Directory for predictions and reports. Overrides the configuration.")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("model_dir")
                .long("model-dir")
                .help("Directory for vocabularies and feature caches. Overrides the configuration.")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("model_type")
                .long("model-type")
                .help("Override the model type from the JSON config.")
                .value_parser(["knn", "svm"])
                .value_hint(ValueHint::Other),
        )
        .arg(
            Arg::new("k")
                .short('k')
                .long("k")
                .help("Number of neighbours for the knn model.")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("run_id")
                .long("run-id")
                .help("Run number used in output file names.")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("no_cache")
                .long("no-cache")
                .help("Keep vocabularies and feature vectors in memory only.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("html")
                .long("html")
                .help("Also write an HTML evaluation report.")
                .action(ArgAction::SetTrue),
        )
}

/// Load the configuration file or preset and apply overrides. Without either,
/// print the default configuration and return `None`.
fn resolve_config(matches: &ArgMatches) -> Result<Option<RunConfig>> {
    let mut config = if let Some(config_path) = matches.get_one::<PathBuf>("config") {
        eprintln!("[Scene] Using config: {:?}", config_path);
        load_run_config(config_path)?
    } else if let Some(preset) = matches.get_one::<String>("preset") {
        eprintln!("[Scene] Using preset: {}", preset);
        RunConfig::preset(preset)?
    } else {
        eprintln!("[Scene] No config file provided; default configuration:");
        println!("{}", serde_json::to_string_pretty(&RunConfig::default())?);
        return Ok(None);
    };
    config.apply_overrides(matches)?;
    Ok(Some(config))
}
