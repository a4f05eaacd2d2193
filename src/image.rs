use anyhow::{Context, bail};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use mime::Mime;
use std::path::Path;
use tracing::debug;

pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn is_supported_image(path: &Path) -> bool {
    extension(path).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Mime type sent in the data URL. Unknown extensions are sent as JPEG.
pub fn image_mime(path: &Path) -> Mime {
    match extension(path).as_deref() {
        Some("png") => mime::IMAGE_PNG,
        Some("bmp") => mime::IMAGE_BMP,
        Some("tif" | "tiff") => "image/tiff".parse().unwrap_or(mime::IMAGE_JPEG),
        _ => mime::IMAGE_JPEG,
    }
}

pub fn load_image(image_file: &Path) -> anyhow::Result<Bytes> {
    if !is_supported_image(image_file) {
        bail!("Unsupported image file: {}", image_file.display())
    }
    let bytes = std::fs::read(image_file)
        .with_context(|| format!("Failed to read image {}", image_file.display()))?;
    debug!(path = %image_file.display(), size = bytes.len(), "Image loaded");
    Ok(Bytes::from(bytes))
}

pub fn encode_data_url(image_data: &[u8], mime: &Mime) -> String {
    format!(
        "data:{};base64,{}",
        mime.essence_str(),
        general_purpose::STANDARD.encode(image_data)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn supported_extensions_are_case_insensitive() {
        assert!(is_supported_image(&PathBuf::from("car.JPG")));
        assert!(is_supported_image(&PathBuf::from("car.tiff")));
        assert!(!is_supported_image(&PathBuf::from("labels.csv")));
        assert!(!is_supported_image(&PathBuf::from("README")));
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(image_mime(&PathBuf::from("a.png")), mime::IMAGE_PNG);
        assert_eq!(image_mime(&PathBuf::from("a.jpeg")), mime::IMAGE_JPEG);
        assert_eq!(image_mime(&PathBuf::from("a.TIF")).essence_str(), "image/tiff");
    }

    #[test]
    fn data_url_is_base64() {
        assert_eq!(
            encode_data_url(b"ABC", &mime::IMAGE_JPEG),
            "data:image/jpeg;base64,QUJD"
        );
    }

    #[test]
    fn load_rejects_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        assert!(load_image(&path).is_err());

        let path = dir.path().join("plate.png");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        assert_eq!(load_image(&path).unwrap().as_ref(), &[1u8, 2, 3]);
    }
}
