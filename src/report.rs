use crate::scorer::ScoreResult;
use anyhow::Context;
use serde::Serialize;
use std::{io::Write, path::Path, time::Duration};
use tracing::{info, warn};

/// Outcome of one scored sample.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRecord {
    pub image: String,
    pub ground_truth: String,
    pub raw_response: String,
    pub prediction: Option<String>,
    pub score: ScoreResult,
    pub request_time: Duration,
}

impl EvaluationRecord {
    pub fn format_header() -> String {
        [
            "image",
            "ground_truth",
            "prediction",
            "substitutions",
            "deletions",
            "insertions",
            "cer",
        ]
        .join(",")
    }

    pub fn format_row(&self) -> String {
        [
            escape_csv_field(&self.image),
            escape_csv_field(&self.ground_truth),
            escape_csv_field(self.prediction.as_deref().unwrap_or_default()),
            self.score.substitutions.to_string(),
            self.score.deletions.to_string(),
            self.score.insertions.to_string(),
            format!("{:.4}", self.score.cer),
        ]
        .join(",")
    }

    pub fn is_exact_match(&self) -> bool {
        self.score.is_exact_match()
    }
}

fn escape_csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Writes one row per record. Nothing is written for an empty run.
pub fn write_csv(path: &Path, records: &[EvaluationRecord]) -> anyhow::Result<()> {
    if records.is_empty() {
        warn!("No results to save");
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    writeln!(file, "{}", EvaluationRecord::format_header())?;
    for record in records {
        writeln!(file, "{}", record.format_row())?;
    }
    info!(path = %path.display(), rows = records.len(), "Results saved");
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationSummary {
    pub total_images: usize,
    pub scored_images: usize,
    pub skipped_images: usize,
    pub correct_predictions: usize,
    pub no_match_predictions: usize,
    /// Exact matches over scored images.
    pub accuracy: f64,
    /// Mean of the per-image CER.
    pub average_cer: f64,
    /// Total edits over total ground-truth characters.
    pub aggregate_cer: f64,
    pub total_substitutions: usize,
    pub total_deletions: usize,
    pub total_insertions: usize,
    pub total_ground_truth_length: usize,
    pub min_request_time: Duration,
    pub max_request_time: Duration,
    pub average_request_time: Duration,
}

impl EvaluationSummary {
    pub fn from_records(records: &[EvaluationRecord], skipped_images: usize) -> Self {
        let scored_images = records.len();
        let mut summary = Self {
            total_images: scored_images + skipped_images,
            scored_images,
            skipped_images,
            ..Default::default()
        };
        if records.is_empty() {
            return summary;
        }

        let mut total_cer = 0.0;
        let mut total_request_time = Duration::ZERO;
        for record in records {
            let score = &record.score;
            total_cer += score.cer;
            summary.total_substitutions += score.substitutions;
            summary.total_deletions += score.deletions;
            summary.total_insertions += score.insertions;
            summary.total_ground_truth_length += score.ground_truth_length;
            if record.is_exact_match() {
                summary.correct_predictions += 1;
            }
            if record.prediction.is_none() {
                summary.no_match_predictions += 1;
            }
            total_request_time += record.request_time;
        }

        let total_errors =
            summary.total_substitutions + summary.total_deletions + summary.total_insertions;
        summary.average_cer = total_cer / scored_images as f64;
        summary.accuracy = summary.correct_predictions as f64 / scored_images as f64;
        summary.aggregate_cer = total_errors as f64 / summary.total_ground_truth_length as f64;
        summary.average_request_time = total_request_time / scored_images as u32;
        summary.min_request_time = records
            .iter()
            .map(|r| r.request_time)
            .min()
            .unwrap_or_default();
        summary.max_request_time = records
            .iter()
            .map(|r| r.request_time)
            .max()
            .unwrap_or_default();
        summary
    }

    pub fn print_summary(&self) {
        info!("{}", "=".repeat(60));
        info!("SUMMARY RESULTS");
        info!("{}", "=".repeat(60));
        info!("Total Images Processed: {}", self.total_images);
        info!("Images Scored: {}", self.scored_images);
        info!("Images Skipped: {}", self.skipped_images);
        info!("Average CER: {:.4}", self.average_cer);
        info!("Aggregate CER: {:.4}", self.aggregate_cer);
        info!(
            "Accuracy (Exact Match): {:.4} ({:.2}%)",
            self.accuracy,
            self.accuracy * 100.0
        );
        info!(
            "Correct Predictions: {}/{}",
            self.correct_predictions, self.scored_images
        );
        info!("No Plate Found: {}", self.no_match_predictions);
        info!("Total Substitutions: {}", self.total_substitutions);
        info!("Total Deletions: {}", self.total_deletions);
        info!("Total Insertions: {}", self.total_insertions);
        info!(
            "Request times -- min: {:?}, avg: {:?}, max: {:?}",
            self.min_request_time, self.average_request_time, self.max_request_time
        );
        info!("{}", "=".repeat(60));
    }
}
