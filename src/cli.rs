use crate::{LogLevel, client::LICENSE_PLATE_PROMPT, normalizer::DEFAULT_PLATE_PATTERN};
use anyhow::{Context, bail};
use clap::{CommandFactory, FromArgMatches, Parser, parser::ValueSource};
use serde::{Deserialize, Serialize};
use std::{ffi::OsString, path::Path, path::PathBuf};
use tracing::info;

pub const DEFAULT_URL: &str = "http://localhost:1234";
pub const DEFAULT_MODEL: &str = "llava-v1.6-mistral-7b.Q3_K_XS.gguf";
pub const DEFAULT_OUTPUT: &str = "ocr_results.csv";

#[derive(Parser, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[command(author = "Plate Eval Team", version=env!("CARGO_PKG_VERSION"), about = "
Plate Eval

Evaluates how well a visual language model reads license plates. Every image
in the dataset is sent to an OpenAI compatible chat completion endpoint, the
plate is extracted from the reply and scored against the ground truth with
the Character Error Rate (CER). Per image results are written to a CSV file
and a summary is logged at the end of the run.")]
#[serde(default)]
pub struct Cli {
    /// Directory with the license plate images (jpg, jpeg, png, bmp, tif, tiff)
    #[clap(long)]
    pub dataset: Option<PathBuf>,
    /// CSV file with `image,ground_truth` columns.
    /// If not given the ground truth is taken from the image file name,
    /// e.g. B1234XYZ.jpg or B1234XYZ_2.jpg
    #[clap(long)]
    pub ground_truth: Option<PathBuf>,
    /// Path of the CSV file with the per image results
    #[clap(long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,
    /// Base url of the inference server
    #[clap(long, default_value = DEFAULT_URL)]
    pub url: String,
    /// Name of the model loaded on the inference server
    #[clap(long, default_value = DEFAULT_MODEL)]
    pub model: String,
    /// Instruction sent together with each image
    #[clap(long, default_value = LICENSE_PLATE_PROMPT)]
    pub prompt: String,
    /// Regular expression of the plate grammar used to extract the plate from the reply
    #[clap(long, default_value = DEFAULT_PLATE_PATTERN)]
    pub plate_pattern: String,
    /// Maximum number of tokens the model may generate
    #[clap(long, default_value_t = 100)]
    pub max_tokens: u32,
    /// Sampling temperature
    #[clap(long, default_value_t = 0.1)]
    pub temperature: f32,
    /// Request timeout in seconds
    #[clap(long, default_value_t = 120)]
    pub request_timeout: u64,
    /// Interval in milliseconds between two requests
    #[clap(long, default_value_t = 500)]
    pub interval: u64,
    /// Sets the level of logging
    #[clap(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
    /// If log_path is set, then stdout logging will be disabled and it will log to file
    #[clap(long)]
    pub log_path: Option<PathBuf>,
    /// Hide the progress bar
    #[clap(long, default_value_t = false)]
    pub no_progress: bool,
    /// JSON config file. Values given on the command line override it.
    #[clap(long)]
    #[serde(skip)]
    pub config: Option<PathBuf>,
    /// Write the effective configuration to the --config file and exit
    #[clap(long, default_value_t = false, requires = "config")]
    #[serde(skip)]
    pub save_config: bool,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            dataset: None,
            ground_truth: None,
            output: PathBuf::from(DEFAULT_OUTPUT),
            url: DEFAULT_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            prompt: LICENSE_PLATE_PROMPT.to_string(),
            plate_pattern: DEFAULT_PLATE_PATTERN.to_string(),
            max_tokens: 100,
            temperature: 0.1,
            request_timeout: 120,
            interval: 500,
            log_level: LogLevel::Info,
            log_path: None,
            no_progress: false,
            config: None,
            save_config: false,
        }
    }
}

impl Cli {
    pub fn from_config_and_args() -> anyhow::Result<Self> {
        Self::from_config_and_args_from(std::env::args_os())
    }

    /// Parses `args` and layers them on top of the `--config` file, if any.
    ///
    /// Only arguments that were actually given on the command line override
    /// the file, clap defaults never do.
    pub fn from_config_and_args_from<I, T>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Cli::command().try_get_matches_from(args)?;
        let args = Cli::from_arg_matches(&matches)?;

        let Some(config_path) = args.config.clone() else {
            return Ok(args);
        };
        if !config_path.exists() {
            if !args.save_config {
                bail!(
                    "Config file {} does not exist, create it with --save-config",
                    config_path.display()
                );
            }
            // Nothing to merge yet, --save-config will create it.
            return Ok(args);
        }

        let mut merged = serde_json::to_value(Cli::load_config(&config_path)?)?;
        let given = serde_json::to_value(&args)?;
        for id in matches.ids() {
            let id = id.as_str();
            if matches.value_source(id) == Some(ValueSource::CommandLine) {
                if let Some(value) = given.get(id) {
                    merged[id] = value.clone();
                }
            }
        }

        let mut merged: Cli = serde_json::from_value(merged)?;
        merged.config = args.config;
        merged.save_config = args.save_config;
        Ok(merged)
    }

    pub fn load_config(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn save_config(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    pub fn print_config(&self) {
        info!("Configuration:");
        info!("  dataset: {:?}", self.dataset);
        info!("  ground_truth: {:?}", self.ground_truth);
        info!("  output: {}", self.output.display());
        info!("  url: {}", self.url);
        info!("  model: {}", self.model);
        info!("  plate_pattern: {}", self.plate_pattern);
        info!("  max_tokens: {}", self.max_tokens);
        info!("  temperature: {}", self.temperature);
        info!("  request_timeout: {}s", self.request_timeout);
        info!("  interval: {}ms", self.interval);
        info!("  log_level: {:?}", self.log_level);
        if let Some(config) = &self.config {
            info!("  config: {}", config.display());
        }
    }
}
