//! Asset resolution: turn an opaque image reference into its pixel dimensions.
//!
//! The engine only needs dimensions (for a token's aspect ratio or to center
//! the background). Drawing the image is the host's concern.

#[cfg(test)]
#[path = "asset_test.rs"]
mod asset_test;

use std::io::Cursor;

use async_trait::async_trait;

use crate::camera::Size;

/// Failure to resolve an image reference.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("empty asset reference")]
    EmptyRef,
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("fetching {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to decode {url}: {message}")]
    Decode { url: String, message: String },
    #[error("asset {url} has invalid dimensions {width}x{height}")]
    InvalidDimensions { url: String, width: f64, height: f64 },
}

/// Intrinsic dimensions of a resolved image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssetInfo {
    pub width: f64,
    pub height: f64,
}

impl AssetInfo {
    /// Validate and wrap image dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`AssetError::InvalidDimensions`] unless both sides are finite and positive.
    pub fn new(url: &str, width: f64, height: f64) -> Result<Self, AssetError> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !valid(width) || !valid(height) {
            return Err(AssetError::InvalidDimensions { url: url.to_owned(), width, height });
        }
        Ok(Self { width, height })
    }

    /// `width / height`.
    #[must_use]
    pub fn aspect_ratio(&self) -> f64 {
        self.width / self.height
    }

    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Asynchronously resolves image references.
#[async_trait]
pub trait AssetResolver: Send + Sync {
    /// Resolve `image_ref` to its dimensions.
    async fn resolve(&self, image_ref: &str) -> Result<AssetInfo, AssetError>;
}

/// Resolver that downloads the image over HTTP and reads its header.
#[derive(Clone, Default)]
pub struct HttpAssetResolver {
    client: reqwest::Client,
}

impl HttpAssetResolver {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetResolver for HttpAssetResolver {
    async fn resolve(&self, image_ref: &str) -> Result<AssetInfo, AssetError> {
        if image_ref.trim().is_empty() {
            return Err(AssetError::EmptyRef);
        }
        let fetch_err = |source| AssetError::Fetch { url: image_ref.to_owned(), source };

        let resp = self.client.get(image_ref).send().await.map_err(fetch_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AssetError::Status { url: image_ref.to_owned(), status: status.as_u16() });
        }
        let bytes = resp.bytes().await.map_err(fetch_err)?;
        dimensions_from_bytes(image_ref, &bytes)
    }
}

/// Read image dimensions from encoded bytes without decoding pixel data.
///
/// # Errors
///
/// Returns [`AssetError::Decode`] for unrecognized or corrupt images and
/// [`AssetError::InvalidDimensions`] for zero-sized ones.
pub fn dimensions_from_bytes(url: &str, bytes: &[u8]) -> Result<AssetInfo, AssetError> {
    let decode_err = |message: String| AssetError::Decode { url: url.to_owned(), message };

    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| decode_err(e.to_string()))?;
    let (width, height) = reader.into_dimensions().map_err(|e| decode_err(e.to_string()))?;
    AssetInfo::new(url, f64::from(width), f64::from(height))
}
