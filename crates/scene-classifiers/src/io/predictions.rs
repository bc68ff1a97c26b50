//! Flat prediction files: one `"<id>.jpg <label>"` line per test image.
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::pipeline::Prediction;

/// Integer formed by the decimal digits of an image identifier, e.g. `12`
/// for `"12.jpg"`. `None` when the identifier holds no digits.
pub fn image_numeric_id(id: &str) -> Option<u64> {
    let digits: String = id.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Write predictions in ascending numeric id order and return the number of
/// lines written. Identifiers without digits are skipped with a warning.
pub fn write_predictions<P: AsRef<Path>>(path: P, predictions: &[Prediction]) -> Result<usize> {
    let path = path.as_ref();
    let mut lines: Vec<(u64, &str)> = Vec::with_capacity(predictions.len());
    for prediction in predictions {
        match image_numeric_id(&prediction.id) {
            Some(id) => lines.push((id, prediction.label.as_str())),
            None => log::warn!("No numeric id in {}; prediction not written", prediction.id),
        }
    }
    lines.sort();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create output file: {:?}", path))?;
    let mut writer = BufWriter::new(file);
    for (id, label) in &lines {
        writeln!(writer, "{}.jpg {}", id, label)?;
    }
    writer.flush()?;
    log::info!("Wrote {} predictions to {}", lines.len(), path.display());
    Ok(lines.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(id: &str, label: &str) -> Prediction {
        Prediction {
            id: id.to_string(),
            label: label.to_string(),
            confidence: 1.0,
        }
    }

    #[test]
    fn test_numeric_id() {
        assert_eq!(image_numeric_id("12.jpg"), Some(12));
        assert_eq!(image_numeric_id("img_007.png"), Some(7));
        assert_eq!(image_numeric_id("readme.jpg"), None);
    }

    #[test]
    fn test_lines_sorted_by_numeric_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("run1.txt");
        let predictions = vec![
            prediction("10.jpg", "forest"),
            prediction("2.jpg", "coast"),
            prediction("cover.jpg", "coast"),
        ];
        assert_eq!(write_predictions(&path, &predictions).unwrap(), 2);
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "2.jpg coast\n10.jpg forest\n");
    }
}
