//! Integration tests for run configuration presets and JSON loading.

use scene_cli::run::input::{load_run_config, RunConfig};
use scene_classifiers::config::ExtractorConfig;

#[test]
fn presets_round_trip_through_json() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["run1", "run2", "run3"] {
        let preset = RunConfig::preset(name).unwrap();
        let path = dir.path().join(format!("{}.json", name));
        std::fs::write(&path, serde_json::to_string_pretty(&preset).unwrap()).unwrap();
        assert_eq!(load_run_config(&path).unwrap(), preset);
    }
}

#[test]
fn run2_uses_patch_bovw() {
    let run2 = RunConfig::preset("run2").unwrap();
    assert_eq!(run2.extractor, ExtractorConfig::patch_bovw(8, 4, 500));
    assert_eq!(run2.output_path(".txt"), std::path::Path::new("output").join("run2.txt"));
}
