//! Scores a single model reply against a ground truth without calling a model.
//!
//! Handy to check how a reply would be normalized and where the edits are.
//! ```sh
//! plate_score --response "The plate is B 1234 XYZ." --ground-truth B1234XYA
//! ```
use anyhow::Context;
use clap::Parser;
use plate_eval::{
    LogLevel, init_logging,
    normalizer::{DEFAULT_PLATE_PATTERN, Normalizer},
    scorer::{EditOp, score_with_alignment},
};
use tracing::info;

#[derive(Parser)]
#[command(author = "Plate Eval Team", version=env!("CARGO_PKG_VERSION"), about = "Score one model reply against a ground truth")]
struct Args {
    /// Raw reply of the model
    #[clap(long)]
    response: String,
    /// Expected plate
    #[clap(long)]
    ground_truth: String,
    /// Regular expression of the plate grammar
    #[clap(long, default_value = DEFAULT_PLATE_PATTERN)]
    plate_pattern: String,
    /// Print the result as JSON on stdout instead of logging it
    #[clap(long, default_value_t = false)]
    json: bool,
    /// Sets the level of logging
    #[clap(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_logging(args.log_level, &mut None)?;

    let normalizer = Normalizer::with_pattern(&args.plate_pattern)?;
    let prediction = normalizer.normalize(&args.response);
    let (result, alignment) = score_with_alignment(prediction.as_deref(), &args.ground_truth)
        .context("Cannot score against this ground truth")?;

    if args.json {
        let output = serde_json::json!({
            "prediction": prediction,
            "ground_truth": args.ground_truth,
            "score": result,
            "alignment": alignment,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    info!("Ground Truth: {}", args.ground_truth);
    info!("Prediction: {}", prediction.as_deref().unwrap_or("<no plate found>"));
    info!(
        "S: {}, D: {}, I: {}, N: {}",
        result.substitutions, result.deletions, result.insertions, result.ground_truth_length
    );
    info!("CER Score: {:.4}", result.cer);
    for op in alignment.operations {
        match op {
            EditOp::Match(_) => {}
            EditOp::Substitution {
                expected,
                predicted,
            } => info!("substitution: expected '{expected}', got '{predicted}'"),
            EditOp::Deletion(c) => info!("deletion: '{c}' missing"),
            EditOp::Insertion(c) => info!("insertion: extra '{c}'"),
        }
    }
    Ok(())
}
