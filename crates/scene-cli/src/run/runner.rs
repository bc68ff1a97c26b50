use std::path::PathBuf;

use anyhow::Result;

use scene_classifiers::data_handling::GroupedDataset;
use scene_classifiers::evaluation::{ConfusionMatrix, KSelection};
use scene_classifiers::io::dataset::{load_grouped_dataset, load_test_images};
use scene_classifiers::io::predictions::write_predictions;
use scene_classifiers::pipeline::SceneClassifier;
use scene_classifiers::report::metrics::{summary_text, write_metrics_tsv, write_summary};
use scene_classifiers::report::report::evaluation_report;

use crate::run::input::RunConfig;

fn classifier(config: &RunConfig) -> SceneClassifier {
    let classifier = SceneClassifier::new(
        config.run_id,
        config.extractor.clone(),
        config.model.clone(),
        &config.model_dir,
    );
    if config.use_cache {
        classifier
    } else {
        classifier.without_cache()
    }
}

fn load_training(config: &RunConfig) -> Result<GroupedDataset> {
    log::info!("[Scene::Run {}] Loading training images from {}", config.run_id, config.train_dir);
    let data = load_grouped_dataset(&config.train_dir)?;
    if data.is_empty() {
        anyhow::bail!("No training images found in {}", config.train_dir);
    }
    Ok(data)
}

fn run_details(config: &RunConfig) -> Vec<(&'static str, String)> {
    vec![
        ("Run", config.run_id.to_string()),
        ("Extractor", config.extractor.name().to_string()),
        ("Extractor fingerprint", config.extractor.fingerprint()),
        ("Model", config.model.name().to_string()),
        ("Training data", config.train_dir.clone()),
        (
            "Train fraction",
            format!("{:.2}", config.evaluation.train_fraction),
        ),
    ]
}

/// Hold-out evaluation; writes the summary, metrics table and optional HTML
/// report next to the predictions.
pub fn run_evaluation(config: &RunConfig) -> Result<ConfusionMatrix> {
    let data = load_training(config)?;
    let matrix = classifier(config).evaluate(&data, &config.evaluation)?;

    let title = format!("Run {} evaluation", config.run_id);
    let details = run_details(config);
    let text = summary_text(&title, &details, &matrix);
    println!("{}", text);

    write_summary(config.output_path("_summary.txt"), &text)?;
    write_metrics_tsv(config.output_path("_metrics.tsv"), &matrix)?;
    if config.html_report {
        let path = config.output_path("_report.html");
        evaluation_report(&title, &details, &matrix).save_to_file(&path)?;
        log::info!("[Scene::Run {}] Wrote report to {}", config.run_id, path.display());
    }
    log::info!(
        "[Scene::Run {}] Validation accuracy {:.2}%",
        config.run_id,
        matrix.accuracy_pct()
    );
    Ok(matrix)
}

/// Train on the full training set, label the test directory and write the
/// prediction file. Returns the path written.
pub fn run_classification(config: &RunConfig) -> Result<PathBuf> {
    let data = load_training(config)?;
    let test = load_test_images(&config.test_dir)?;
    let mode = config.concurrency();
    let predictions = classifier(config).train_then_classify(&data, &test, mode)?;

    let path = config.output_path(".txt");
    let written = write_predictions(&path, &predictions)?;
    eprintln!(
        "[Scene::Run {}] Wrote {} predictions to {}",
        config.run_id,
        written,
        path.display()
    );
    Ok(path)
}

/// Cross-validated selection of the KNN neighbour count.
pub fn run_select_k(config: &RunConfig, holdout: bool) -> Result<KSelection> {
    let data = load_training(config)?;
    let selection = classifier(config).select_k(&data, &config.evaluation, holdout)?;
    println!(
        "Best k = {} ({:.2}% fold accuracy)",
        selection.best_k, selection.best_accuracy
    );
    for (k, accuracy) in &selection.holdout {
        println!("  k = {:>2}: held-out accuracy {:.2}%", k, accuracy);
    }
    Ok(selection)
}

/// Evaluation and/or classification as enabled in the configuration.
pub fn run(config: &RunConfig) -> Result<()> {
    if !config.validate && !config.classify {
        log::warn!("[Scene::Run {}] Both validate and classify are disabled", config.run_id);
    }
    if config.validate {
        run_evaluation(config)?;
    }
    if config.classify {
        run_classification(config)?;
    }
    Ok(())
}
