//! Self-contained HTML reports rendered with maud.
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use maud::{html, Markup, PreEscaped, DOCTYPE};

use crate::evaluation::ConfusionMatrix;

const STYLE: &str = "body{font-family:sans-serif;margin:2em;}\
table{border-collapse:collapse;margin:1em 0;}\
th,td{border:1px solid #ccc;padding:4px 8px;text-align:right;}\
th:first-child,td:first-child{text-align:left;}\
td.diag{background:#e3f2e1;font-weight:bold;}";

pub struct ReportSection {
    title: String,
    content: Vec<Markup>,
}

impl ReportSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            content: Vec::new(),
        }
    }

    pub fn add_content(&mut self, markup: Markup) {
        self.content.push(markup);
    }
}

pub struct Report {
    title: String,
    subtitle: String,
    sections: Vec<ReportSection>,
}

impl Report {
    pub fn new(title: &str, subtitle: &str) -> Self {
        Self {
            title: title.to_string(),
            subtitle: subtitle.to_string(),
            sections: Vec::new(),
        }
    }

    pub fn add_section(&mut self, section: ReportSection) {
        self.sections.push(section);
    }

    pub fn render(&self) -> Markup {
        html! {
            (DOCTYPE)
            html {
                head {
                    meta charset="utf-8";
                    title { (self.title) }
                    style { (PreEscaped(STYLE)) }
                }
                body {
                    h1 { (self.title) }
                    p { (self.subtitle) }
                    @for section in &self.sections {
                        h2 { (section.title) }
                        @for block in &section.content {
                            (block)
                        }
                    }
                }
            }
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.render().into_string())
            .with_context(|| format!("Failed to write report {}", path.display()))
    }
}

/// Confusion matrix as an HTML table with the diagonal highlighted.
pub fn confusion_table(matrix: &ConfusionMatrix) -> Markup {
    let classes = matrix.classes();
    html! {
        table {
            tr {
                th { "true \\ predicted" }
                @for class in classes { th { (class) } }
            }
            @for (t, class) in classes.iter().enumerate() {
                tr {
                    td { (class) }
                    @for p in 0..classes.len() {
                        @if t == p {
                            td class="diag" { (matrix.count(t, p)) }
                        } @else {
                            td { (matrix.count(t, p)) }
                        }
                    }
                }
            }
        }
    }
}

pub fn metrics_table(matrix: &ConfusionMatrix) -> Markup {
    html! {
        table {
            tr { th { "Class" } th { "Support" } th { "Precision" } th { "Recall" } th { "F1" } }
            @for m in matrix.class_metrics() {
                tr {
                    td { (m.class) }
                    td { (m.support) }
                    td { (format!("{:.4}", m.precision)) }
                    td { (format!("{:.4}", m.recall)) }
                    td { (format!("{:.4}", m.f1)) }
                }
            }
        }
        p {
            strong { "Accuracy: " }
            (format!("{:.2}% ({}/{})", matrix.accuracy_pct(), matrix.correct(), matrix.total()))
        }
    }
}

/// Run overview, confusion matrix and per-class metrics of one evaluation.
pub fn evaluation_report(title: &str, details: &[(&str, String)], matrix: &ConfusionMatrix) -> Report {
    let mut report = Report::new(
        title,
        &format!("Generated {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S")),
    );

    let mut overview = ReportSection::new("Overview");
    overview.add_content(html! {
        table {
            @for (key, value) in details {
                tr { td { (key) } td { (value) } }
            }
        }
    });
    report.add_section(overview);

    let mut confusion = ReportSection::new("Confusion matrix");
    confusion.add_content(confusion_table(matrix));
    report.add_section(confusion);

    let mut metrics = ReportSection::new("Per-class metrics");
    metrics.add_content(metrics_table(matrix));
    report.add_section(metrics);

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_renders_sections() {
        let mut matrix = ConfusionMatrix::new(vec!["coast".into(), "<forest>".into()]);
        matrix.add(0, 0);
        matrix.add(1, 0);

        let mut report = Report::new("Run 1", "tiny_image + knn");
        let mut section = ReportSection::new("Confusion matrix");
        section.add_content(confusion_table(&matrix));
        section.add_content(metrics_table(&matrix));
        report.add_section(section);

        let html = report.render().into_string();
        assert!(html.contains("<h2>Confusion matrix</h2>"));
        assert!(html.contains("&lt;forest&gt;"));
        assert!(html.contains("50.00%"));
    }

    #[test]
    fn test_evaluation_report_has_three_sections() {
        let mut matrix = ConfusionMatrix::new(vec!["a".into(), "b".into()]);
        matrix.add(0, 0);
        let html = evaluation_report("Run 3", &[("Model", "svm".to_string())], &matrix)
            .render()
            .into_string();
        assert_eq!(html.matches("<h2>").count(), 3);
        assert!(html.contains("<td>Model</td><td>svm</td>"));
    }
}
