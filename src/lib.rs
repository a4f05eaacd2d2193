use anyhow::{Context, anyhow};
use clap::ValueEnum;
use cli::Cli;
use client::{VlmClient, VlmClientConfig};
use evaluator::{Evaluator, EvaluatorConfig};
use normalizer::Normalizer;
use report::EvaluationSummary;
use std::{path::PathBuf, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
pub mod api;
pub mod cli;
pub mod client;
pub mod dataset;
pub mod evaluator;
pub mod image;
pub mod normalizer;
pub mod report;
pub mod scorer;

/// Runs a full evaluation: load the dataset, query the model for every
/// sample, write the CSV and log the summary.
///
/// Results gathered before a cancellation are still written.
pub async fn run_evaluation(
    args: &Cli,
    cancellation_token: CancellationToken,
) -> anyhow::Result<EvaluationSummary> {
    let dataset_dir = args
        .dataset
        .as_deref()
        .ok_or_else(|| anyhow!("No dataset given, use --dataset or set it in the config file"))?;

    let samples = dataset::load_samples(dataset_dir, args.ground_truth.as_deref())
        .context("Failed to load dataset")?;

    let client = VlmClient::new(VlmClientConfig {
        base_url: args.url.clone(),
        model: args.model.clone(),
        prompt: args.prompt.clone(),
        max_tokens: args.max_tokens,
        temperature: args.temperature,
        request_timeout: Duration::from_secs(args.request_timeout),
    })?;
    let normalizer = Normalizer::with_pattern(&args.plate_pattern)?;

    let evaluator = Evaluator::new(
        client,
        normalizer,
        EvaluatorConfig {
            interval: Duration::from_millis(args.interval),
            show_progress: !args.no_progress,
        },
        cancellation_token,
    );

    let started = chrono::Utc::now();
    let outcome = evaluator.run(&samples).await;
    info!(
        started = %started.format("%Y-%m-%d %H:%M:%S"),
        elapsed = ?(chrono::Utc::now() - started).to_std().unwrap_or_default(),
        "Evaluation finished"
    );

    report::write_csv(&args.output, &outcome.records)?;
    let summary = EvaluationSummary::from_records(&outcome.records, outcome.skipped);
    summary.print_summary();
    Ok(summary)
}

pub fn init_logging(
    log_level: LogLevel,
    log_path: &mut Option<PathBuf>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    setup_ansi_support();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(log_level)));

    let (file_layer, guard) = match log_path.clone() {
        Some(path) => {
            let log_directory = if path.starts_with(".") {
                let stripped = path.strip_prefix(".").unwrap_or(&path).to_path_buf();
                std::env::current_dir()
                    .map(|dir| dir.join(&stripped))
                    .unwrap_or(stripped)
            } else {
                path
            };

            *log_path = Some(log_directory.clone());

            let log_file = log_directory.join("plate_eval.log");
            println!("Starting Plate Eval, logging into: {}", log_file.display());

            let file_appender = tracing_appender::rolling::daily(&log_directory, "plate_eval.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(file_layer), Some(guard))
        }
        None => (None, None),
    };
    let stdout_layer = file_layer
        .is_none()
        .then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|_| anyhow!("Logging already initialized"))?;

    info!(?log_level, "Logging initialized");
    Ok(guard)
}

fn level_to_filter_string(log_level: LogLevel) -> String {
    match log_level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
    .to_string()
}

fn setup_ansi_support() {
    #[cfg(target_os = "windows")]
    if let Err(e) = ansi_term::enable_ansi_support() {
        eprintln!("Failed to enable ANSI support: {e}");
    }
}

#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    ValueEnum,
    Debug,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}
