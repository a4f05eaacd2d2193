//! Plate Eval
//!
//! Evaluates a visual language model served behind an OpenAI compatible chat
//! completion endpoint (e.g. LM Studio) on a directory of license plate images.
//!
//! Downloaded binary:
//! ```sh
//! plate_eval --dataset ./test --ground-truth ./ground_truth.csv
//! ```
//!
//! From repository:
//! ```sh
//! cargo run --bin plate_eval -- --help
//! ```
use plate_eval::{cli::Cli, init_logging, run_evaluation};
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    let mut args = Cli::from_config_and_args()?;
    let _guard = init_logging(args.log_level, &mut args.log_path)?;
    args.print_config();

    if args.save_config {
        if let Some(config_path) = &args.config {
            args.save_config(config_path)?;
        }
        return Ok(());
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let cancellation_token = tokio_util::sync::CancellationToken::new();
    let ctrl_c_token = cancellation_token.clone();
    rt.spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Ctrl+C received, stopping after the current image");
        ctrl_c_token.cancel();
    });

    let summary = rt.block_on(run_evaluation(&args, cancellation_token))?;
    if summary.scored_images == 0 {
        error!("No images were processed successfully!");
        anyhow::bail!("No images were processed successfully");
    }
    Ok(())
}
