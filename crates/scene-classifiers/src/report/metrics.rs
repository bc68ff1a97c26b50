//! Plain-text summaries and per-class metric tables of an evaluation.
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};

use crate::evaluation::ConfusionMatrix;

/// Header followed by the detail report of `matrix`.
pub fn summary_text(title: &str, details: &[(&str, String)], matrix: &ConfusionMatrix) -> String {
    let mut text = format!("{}\n{}\n", title, "=".repeat(title.len()));
    text.push_str(&format!(
        "Generated: {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    for (key, value) in details {
        text.push_str(&format!("{}: {}\n", key, value));
    }
    text.push('\n');
    text.push_str(&matrix.detail_report());
    text
}

pub fn write_summary<P: AsRef<Path>>(path: P, text: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("Failed to write summary {}", path.display()))
}

/// Per-class support, precision, recall and F1 as a TSV file.
pub fn write_metrics_tsv<P: AsRef<Path>>(path: P, matrix: &ConfusionMatrix) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Failed to create output file: {:?}", path))?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(BufWriter::new(file));

    writer.write_record(["class", "support", "precision", "recall", "f1"])?;
    for m in matrix.class_metrics() {
        writer.write_record(&[
            m.class.clone(),
            m.support.to_string(),
            format!("{:.4}", m.precision),
            format!("{:.4}", m.recall),
            format!("{:.4}", m.f1),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> ConfusionMatrix {
        let mut m = ConfusionMatrix::new(vec!["coast".into(), "forest".into()]);
        m.add(0, 0);
        m.add(1, 1);
        m.add(1, 0);
        m
    }

    #[test]
    fn test_metrics_tsv_has_one_row_per_class() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.tsv");
        write_metrics_tsv(&path, &matrix()).unwrap();

        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][0], "forest");
        assert_eq!(&rows[1][1], "2");
        assert_eq!(&rows[1][3], "0.5000");
    }

    #[test]
    fn test_summary_text_includes_details_and_report() {
        let text = summary_text("Run 2", &[("Extractor", "patch_bovw".to_string())], &matrix());
        assert!(text.starts_with("Run 2\n=====\n"));
        assert!(text.contains("Extractor: patch_bovw"));
        assert!(text.contains("Accuracy: 66.67%"));
    }
}
