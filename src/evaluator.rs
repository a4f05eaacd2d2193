use crate::{
    client::VlmClient,
    dataset::Sample,
    normalizer::Normalizer,
    report::EvaluationRecord,
    scorer::{ScoreError, score},
};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct EvaluatorConfig {
    /// Pause between two requests so the inference server is not flooded.
    pub interval: Duration,
    pub show_progress: bool,
}

#[derive(Debug, Default)]
pub struct EvaluationOutcome {
    pub records: Vec<EvaluationRecord>,
    pub skipped: usize,
    pub cancelled: bool,
}

/// Sequential evaluation loop: request, normalize, score, record.
pub struct Evaluator {
    client: VlmClient,
    normalizer: Normalizer,
    config: EvaluatorConfig,
    cancellation_token: CancellationToken,
}

/// Normalizes a model reply and scores it against the sample's label.
pub fn score_reply(
    normalizer: &Normalizer,
    sample: &Sample,
    raw_response: String,
    request_time: Duration,
) -> Result<EvaluationRecord, ScoreError> {
    let prediction = normalizer.normalize(&raw_response);
    let score = score(prediction.as_deref(), &sample.ground_truth)?;
    Ok(EvaluationRecord {
        image: sample.image.clone(),
        ground_truth: sample.ground_truth.clone(),
        raw_response,
        prediction,
        score,
        request_time,
    })
}

impl Evaluator {
    pub fn new(
        client: VlmClient,
        normalizer: Normalizer,
        config: EvaluatorConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            client,
            normalizer,
            config,
            cancellation_token,
        }
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    }

    pub async fn run(&self, samples: &[Sample]) -> EvaluationOutcome {
        let mut outcome = EvaluationOutcome::default();
        let pb = self.progress_bar(samples.len());

        info!(
            model = self.client.model(),
            endpoint = %self.client.endpoint(),
            samples = samples.len(),
            "Starting evaluation"
        );

        for (i, sample) in samples.iter().enumerate() {
            if self.cancellation_token.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            pb.inc(1);

            // Unlabeled samples would fail scoring anyway, don't spend a request on them.
            if sample.ground_truth.is_empty() {
                warn!(image = %sample.image, error = %ScoreError::InvalidGroundTruth, "Skipping sample");
                outcome.skipped += 1;
                continue;
            }

            info!("Processing: {}", sample.image_path.display());
            let reply = tokio::select! {
                reply = self.client.read_plate(&sample.image_path) => reply,
                _ = self.cancellation_token.cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
            };
            let reply = match reply {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(image = %sample.image, "Error predicting license plate: {err:#}");
                    outcome.skipped += 1;
                    continue;
                }
            };

            match score_reply(&self.normalizer, sample, reply.raw_text, reply.request_time) {
                Ok(record) => {
                    info!(
                        ground_truth = %record.ground_truth,
                        prediction = record.prediction.as_deref().unwrap_or("<none>"),
                        raw_response = %record.raw_response,
                        cer = format_args!("{:.4}", record.score.cer),
                        "Scored"
                    );
                    outcome.records.push(record);
                }
                Err(err) => {
                    warn!(image = %sample.image, %err, "Skipping sample");
                    outcome.skipped += 1;
                }
            }

            if i + 1 < samples.len() && !self.config.interval.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.interval) => {}
                    _ = self.cancellation_token.cancelled() => {
                        outcome.cancelled = true;
                        break;
                    }
                }
            }
        }

        if outcome.cancelled {
            pb.abandon_with_message("Evaluation cancelled");
            warn!(
                scored = outcome.records.len(),
                "Evaluation cancelled, keeping partial results"
            );
        } else {
            pb.finish_with_message("All samples processed");
        }
        outcome
    }
}
