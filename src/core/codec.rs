use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use base64::Engine;
use image::{
    ExtendedColorType, ImageFormat, RgbImage, codecs::jpeg::JpegEncoder, imageops::FilterType,
};
use tokio::{fs as async_fs, task};

/// Default compression target in KiB.
pub const DEFAULT_MAX_SIZE_KB: u32 = 500;
/// Largest raw upload accepted before compression is attempted.
pub const MAX_FILE_SIZE_MB: u64 = 10;
/// Longer side of a compressed image, in pixels.
pub const MAX_DIMENSION: u32 = 1200;

const START_QUALITY_TENTHS: u8 = 8;
const MIN_QUALITY_TENTHS: u8 = 1;
const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("No file selected")]
    InvalidFile,

    #[error("Please select an image file")]
    NotAnImage { mime_type: String },

    #[error(
        "Image is too large ({size_mb:.1}MB). Please use an image smaller than {limit}MB.",
        size_mb = megabytes(.size_bytes),
        limit = MAX_FILE_SIZE_MB
    )]
    TooLarge { size_bytes: u64 },

    #[error("Failed to read file")]
    ReadFailed(#[source] std::io::Error),

    #[error("Failed to load image")]
    DecodeFailed(#[source] image::ImageError),

    #[error("Failed to encode image")]
    EncodeFailed(#[source] image::ImageError),

    #[error("Image is too large ({size_kb}KB). Please use a smaller image.")]
    ImageTooLarge { size_kb: u64 },

    #[error("Image processing was interrupted")]
    Interrupted(#[from] task::JoinError),
}

#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Arc<[u8]>),
    Path(PathBuf),
}

/// A user-selected image file, as handed over by a file picker.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub name: String,
    pub mime_type: String,
    /// Declared size in bytes. Checked by [`validate`] before anything is read.
    pub size: u64,
    pub source: ImageSource,
}

impl ImageFile {
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size: bytes.len() as u64,
            source: ImageSource::Bytes(bytes.into()),
        }
    }

    /// Describes a file on disk, inferring its MIME type from the extension.
    pub async fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = async_fs::metadata(path).await?;
        let mime_type = ImageFormat::from_path(path)
            .map(|format| format.to_mime_type().to_string())
            .unwrap_or_else(|_| "application/octet-stream".to_string());
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            name,
            mime_type,
            size: metadata.len(),
            source: ImageSource::Path(path.to_path_buf()),
        })
    }

    async fn read(&self) -> Result<Arc<[u8]>, ImageError> {
        match &self.source {
            ImageSource::Bytes(bytes) => Ok(bytes.clone()),
            ImageSource::Path(path) => async_fs::read(path)
                .await
                .map(Arc::from)
                .map_err(ImageError::ReadFailed),
        }
    }
}

/// Checks that a selected file is present, is an image, and is not too large.
pub fn validate(file: Option<&ImageFile>) -> Result<(), ImageError> {
    let Some(file) = file else {
        return Err(ImageError::InvalidFile);
    };
    if !file.mime_type.starts_with("image/") {
        return Err(ImageError::NotAnImage {
            mime_type: file.mime_type.clone(),
        });
    }
    if file.size > MAX_FILE_SIZE_MB * 1024 * 1024 {
        return Err(ImageError::TooLarge { size_bytes: file.size });
    }
    Ok(())
}

/// Output of [`compress`]: a JPEG data URL usable directly as an `imageUrl`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedImage {
    data_url: String,
    quality_tenths: u8,
    width: u32,
    height: u32,
}

impl CompressedImage {
    pub fn as_str(&self) -> &str {
        &self.data_url
    }

    pub fn into_data_url(self) -> String {
        self.data_url
    }

    /// JPEG quality of the final encode, between 0.1 and 0.8.
    pub fn quality(&self) -> f32 {
        f32::from(self.quality_tenths) / 10.0
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn size_kb(&self) -> u64 {
        size_kb(self.data_url.len())
    }
}

impl fmt::Display for CompressedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data_url)
    }
}

/// Dimensions after capping the longer side at `max_dimension`, keeping the
/// aspect ratio. Images that already fit are left alone. The scaled side is
/// truncated, never rounded up, and is at least one pixel.
pub fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }
    let scaled = |side: u32, other: u32| {
        let value = f64::from(side) / f64::from(other) * f64::from(max_dimension);
        (value.trunc() as u32).max(1)
    };
    if width > height {
        (max_dimension, scaled(height, width))
    } else {
        (scaled(width, height), max_dimension)
    }
}

fn megabytes(bytes: &u64) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0)
}

fn size_kb(len: usize) -> u64 {
    (len as f64 / 1024.0).round() as u64
}

fn encode_data_url(image: &RgbImage, quality_tenths: u8) -> Result<String, ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality_tenths * 10)
        .encode(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(ImageError::EncodeFailed)?;
    let mut data_url = String::with_capacity(DATA_URL_PREFIX.len() + buf.len() * 4 / 3 + 4);
    data_url.push_str(DATA_URL_PREFIX);
    base64::engine::general_purpose::STANDARD.encode_string(&buf, &mut data_url);
    Ok(data_url)
}

/// Re-encodes an image as a JPEG data URL of roughly `max_size_kb` KiB.
///
/// Quality starts at 0.8 and steps down by 0.1 while the encoded string is
/// longer than the target, stopping at 0.1. A result still longer than 1.5x
/// the target is rejected with [`ImageError::ImageTooLarge`].
pub async fn compress(file: &ImageFile, max_size_kb: u32) -> Result<CompressedImage, ImageError> {
    let bytes = file.read().await?;

    let image = task::spawn_blocking(move || -> Result<RgbImage, ImageError> {
        let decoded = image::load_from_memory(&bytes).map_err(ImageError::DecodeFailed)?;
        let (width, height) = target_dimensions(decoded.width(), decoded.height(), MAX_DIMENSION);
        let resized = if (width, height) == (decoded.width(), decoded.height()) {
            decoded
        } else {
            decoded.resize_exact(width, height, FilterType::Triangle)
        };
        Ok(resized.to_rgb8())
    })
    .await??;
    let image = Arc::new(image);

    let limit = max_size_kb as usize * 1024;
    let mut quality_tenths = START_QUALITY_TENTHS;
    let mut data_url = encode_in_background(&image, quality_tenths).await?;
    while data_url.len() > limit && quality_tenths > MIN_QUALITY_TENTHS {
        quality_tenths -= 1;
        data_url = encode_in_background(&image, quality_tenths).await?;
    }

    let actual_kb = size_kb(data_url.len());
    tracing::debug!(
        file = %file.name,
        size_kb = actual_kb,
        quality = f32::from(quality_tenths) / 10.0,
        "Image compressed"
    );

    if data_url.len() as f64 > limit as f64 * 1.5 {
        return Err(ImageError::ImageTooLarge { size_kb: actual_kb });
    }

    Ok(CompressedImage {
        data_url,
        quality_tenths,
        width: image.width(),
        height: image.height(),
    })
}

async fn encode_in_background(image: &Arc<RgbImage>, quality_tenths: u8) -> Result<String, ImageError> {
    let image = image.clone();
    task::spawn_blocking(move || encode_data_url(&image, quality_tenths)).await?
}
