use crate::image::is_supported_image;
use anyhow::{Context, anyhow, bail};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// One labeled image of the evaluation set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub image_path: PathBuf,
    /// File name of the image, used as the identifier in the results.
    pub image: String,
    /// May be empty when no label was found, such samples cannot be scored.
    pub ground_truth: String,
}

/// Reads a `image,ground_truth` CSV label file into a file name -> plate map.
pub fn load_ground_truth(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ground truth file {}", path.display()))?;
    let mut lines = content.lines().filter(|line| !line.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| anyhow!("Ground truth file {} is empty", path.display()))?;
    let header = split_csv_line(header.trim_start_matches('\u{feff}'));
    let column = |name: &str| {
        header
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow!("Ground truth file is missing the '{name}' column"))
    };
    let image_column = column("image")?;
    let ground_truth_column = column("ground_truth")?;

    let mut labels = HashMap::new();
    for (line_number, line) in lines.enumerate() {
        let fields = split_csv_line(line);
        match (fields.get(image_column), fields.get(ground_truth_column)) {
            (Some(image), Some(ground_truth)) => {
                labels.insert(image.clone(), ground_truth.clone());
            }
            _ => warn!(line = line_number + 2, "Skipping malformed ground truth row"),
        }
    }
    info!(
        path = %path.display(),
        labels = labels.len(),
        "Ground truth loaded"
    );
    Ok(labels)
}

/// Splits one CSV line, honoring double-quoted fields with `""` escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field).trim().to_string()),
            c => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

/// Lists the supported images directly inside `dir`, sorted by file name.
pub fn list_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("Dataset path '{}' does not exist", dir.display());
    }
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read dataset directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && is_supported_image(&path) {
            images.push(path);
        }
    }
    if images.is_empty() {
        bail!("No image files found in '{}'", dir.display());
    }
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    info!("Found {} image files", images.len());
    Ok(images)
}

/// Derives a plate from a file name such as `B1234XYZ.jpg` or `B 1234 XYZ_2.png`.
///
/// Everything from the first `_` on is ignored so that several shots of the
/// same plate can share a label.
pub fn ground_truth_from_file_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy())
        .unwrap_or_default();
    stem.split('_')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Pairs every image with its ground truth.
///
/// With a label map, images missing from it get an empty ground truth.
/// Without one, the label is taken from the file name.
pub fn resolve_samples(
    images: Vec<PathBuf>,
    labels: Option<&HashMap<String, String>>,
) -> Vec<Sample> {
    images
        .into_iter()
        .map(|image_path| {
            let image = image_path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let ground_truth = match labels {
                Some(labels) => labels.get(&image).cloned().unwrap_or_else(|| {
                    debug!(%image, "No ground truth label for image");
                    String::new()
                }),
                None => ground_truth_from_file_name(&image_path),
            };
            Sample {
                image_path,
                image,
                ground_truth,
            }
        })
        .collect()
}

/// Loads the dataset directory and the optional label file in one go.
pub fn load_samples(dataset: &Path, ground_truth_file: Option<&Path>) -> anyhow::Result<Vec<Sample>> {
    let labels = ground_truth_file.map(load_ground_truth).transpose()?;
    let images = list_images(dataset)?;
    Ok(resolve_samples(images, labels.as_ref()))
}
