//! Image conversion applied between validation and promotion.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageError, ImageFormat};
use marketcast_core::{Classify, Conversion, ConversionQuality, Disposition, Regulation, UploadEvent};
use marketcast_storage::keys::with_extension;
use marketcast_storage::{ObjectStores, Storage, StorageError};
use std::io::Cursor;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// The regulation insists on a conversion no encoder exists for.
    #[error("Conversion unavailable: {conversion}")]
    Unavailable { conversion: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    #[error("Conversion task failed: {0}")]
    Task(String),
}

impl Classify for ConvertError {
    /// A body that does not decode will not decode on redelivery either.
    fn disposition(&self) -> Disposition {
        match self {
            ConvertError::Unavailable { .. } => Disposition::Terminal,
            ConvertError::Storage(e) => e.disposition(),
            ConvertError::Image(ImageError::IoError(_)) => Disposition::Retryable,
            ConvertError::Image(_) => Disposition::Terminal,
            ConvertError::Task(_) => Disposition::Retryable,
        }
    }
}

/// A converted object, already written to the permanent store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converted {
    /// Permanent-store key, the source key with the target extension.
    pub key: String,
    pub content_type: &'static str,
    pub reference_url: String,
}

/// Re-encodes landed images into the formats their regulation asks for.
///
/// The source is read from the temporary store and the result is written
/// straight to the permanent store. Nothing is ever written back to the
/// landing store, whose object notifications would feed the output back into
/// the pipeline.
#[derive(Clone)]
pub struct Converter {
    stores: ObjectStores,
    quality: ConversionQuality,
}

impl Converter {
    pub fn new(stores: ObjectStores, quality: ConversionQuality) -> Self {
        Self { stores, quality }
    }

    /// Apply `regulation.convert` to the object behind `event.key`.
    ///
    /// Returns `None` when there is nothing to do: no conversion configured,
    /// the source already in the target format, or only conversions without
    /// an encoder (unless the regulation requires one). The original object
    /// is then promoted as-is.
    pub async fn convert(
        &self,
        regulation: &Regulation,
        event: &UploadEvent,
    ) -> Result<Option<Converted>, ConvertError> {
        let key = event.key.as_str();
        if regulation.convert.is_empty() {
            return Ok(None);
        }

        let mut targets = Vec::with_capacity(regulation.convert.len());
        for conversion in &regulation.convert {
            match target_format(conversion) {
                Some(format) => targets.push((conversion.clone(), format)),
                None if regulation.require_conversion => {
                    tracing::warn!(
                        key = %key,
                        conversion = %conversion,
                        "Required conversion has no encoder"
                    );
                    return Err(ConvertError::Unavailable {
                        conversion: conversion.to_string(),
                    });
                }
                None => {
                    tracing::warn!(
                        key = %key,
                        conversion = %conversion,
                        "Unsupported conversion, keeping original object"
                    );
                }
            }
        }
        if targets.is_empty() {
            return Ok(None);
        }

        let start = std::time::Instant::now();
        let data = self.stores.temporary.download(key).await?;
        let quality = self.quality;

        let encoded = tokio::task::spawn_blocking(move || encode_chain(data, &targets, quality))
            .await
            .map_err(|e| ConvertError::Task(e.to_string()))??;

        let Some((conversion, bytes)) = encoded else {
            tracing::debug!(key = %key, "Source already in target format");
            return Ok(None);
        };

        // Both are Some for every conversion `target_format` accepted.
        let extension = conversion.extension().unwrap_or("bin");
        let content_type = conversion
            .content_type()
            .unwrap_or("application/octet-stream");
        let new_key = with_extension(key, extension);
        let size = bytes.len();

        self.stores
            .permanent
            .upload_with_key(&new_key, bytes, content_type)
            .await?;
        let reference_url = self.stores.reference_url(&new_key);

        tracing::info!(
            key = %key,
            new_key = %new_key,
            conversion = %conversion,
            content_type = %content_type,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Image converted into permanent store"
        );

        Ok(Some(Converted {
            key: new_key,
            content_type,
            reference_url,
        }))
    }
}

fn target_format(conversion: &Conversion) -> Option<ImageFormat> {
    match conversion {
        Conversion::Webp => Some(ImageFormat::WebP),
        Conversion::Jpeg => Some(ImageFormat::Jpeg),
        Conversion::Png => Some(ImageFormat::Png),
        Conversion::Unsupported(_) => None,
    }
}

/// Run each conversion in turn, feeding every output into the next step.
/// Steps whose target matches the current format are skipped. Returns the
/// last conversion applied and its output, or `None` if every step was
/// skipped.
fn encode_chain(
    data: Vec<u8>,
    targets: &[(Conversion, ImageFormat)],
    quality: ConversionQuality,
) -> Result<Option<(Conversion, Vec<u8>)>, ConvertError> {
    let mut format = image::guess_format(&data)?;
    let mut current = data;
    let mut applied = None;

    for (conversion, target) in targets {
        if *target == format {
            continue;
        }
        let img = image::load_from_memory_with_format(&current, format)?;
        current = encode(&img, *target, quality)?;
        format = *target;
        applied = Some(conversion.clone());
    }

    Ok(applied.map(|conversion| (conversion, current)))
}

fn encode(
    img: &DynamicImage,
    format: ImageFormat,
    quality: ConversionQuality,
) -> Result<Vec<u8>, ConvertError> {
    match format {
        ImageFormat::WebP => {
            let (width, height) = img.dimensions();
            let rgba = img.to_rgba8();
            let encoder = webp::Encoder::from_rgba(&rgba, width, height);
            Ok(encoder.encode(quality.webp_quality).to_vec())
        }
        ImageFormat::Jpeg => {
            let rgb = img.to_rgb8();
            let mut buffer = Vec::new();
            JpegEncoder::new_with_quality(&mut buffer, quality.jpeg_quality).encode_image(&rgb)?;
            Ok(buffer)
        }
        other => {
            let mut buffer = Vec::new();
            img.write_to(&mut Cursor::new(&mut buffer), other)?;
            Ok(buffer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use marketcast_core::AssetCategory;
    use marketcast_storage::LocalStorage;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        stores: ObjectStores,
        _landing: TempDir,
        _assets: TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            let landing = tempfile::tempdir().unwrap();
            let assets = tempfile::tempdir().unwrap();
            let temporary =
                LocalStorage::new(landing.path(), "http://localhost:9000/landing".into())
                    .await
                    .unwrap();
            let permanent =
                LocalStorage::new(assets.path(), "http://localhost:9000/assets".into())
                    .await
                    .unwrap();
            Self {
                stores: ObjectStores::new(
                    Arc::new(temporary),
                    Arc::new(permanent),
                    Some("https://cdn.example.com".to_string()),
                ),
                _landing: landing,
                _assets: assets,
            }
        }

        async fn land(&self, key: &str, data: Vec<u8>) {
            self.stores
                .temporary
                .upload_with_key(key, data, "image/png")
                .await
                .unwrap();
        }

        fn converter(&self) -> Converter {
            Converter::new(self.stores.clone(), ConversionQuality::default())
        }
    }

    fn regulation(convert: Vec<Conversion>, require_conversion: bool) -> Regulation {
        Regulation {
            category: AssetCategory::ProductImage,
            convert,
            allowed_content_types: vec!["image/png".to_string()],
            max_content_length: 1024 * 1024,
            require_conversion,
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([200, 30, 30, 255]),
        ));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    #[tokio::test]
    async fn test_no_conversion_is_noop() {
        let fixture = Fixture::new().await;

        // The object does not even need to exist.
        let event = UploadEvent::new("video/1/clip.mp4");
        let converted = fixture
            .converter()
            .convert(&regulation(vec![], false), &event)
            .await
            .unwrap();
        assert_eq!(converted, None);
    }

    #[tokio::test]
    async fn test_png_to_webp_lands_in_permanent_store() {
        let fixture = Fixture::new().await;
        fixture.land("product-image/9/front.png", png_bytes(64, 48)).await;

        let event = UploadEvent::new("product-image/9/front.png");
        let converted = fixture
            .converter()
            .convert(&regulation(vec![Conversion::Webp], false), &event)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            converted,
            Converted {
                key: "product-image/9/front.webp".to_string(),
                content_type: "image/webp",
                reference_url: "https://cdn.example.com/product-image/9/front.webp".to_string(),
            }
        );

        let data = fixture.stores.permanent.download(&converted.key).await.unwrap();
        assert_eq!(image::guess_format(&data).unwrap(), ImageFormat::WebP);
        let decoded = image::load_from_memory(&data).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));

        // The landing store keeps only what the client uploaded.
        let landed = fixture.stores.temporary.head(&converted.key).await;
        assert!(matches!(landed, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_in_place_reencode_reports_new_content_type() {
        let fixture = Fixture::new().await;
        // PNG bytes under a key that already has the target extension.
        fixture.land("shop-logo/5/logo.webp", png_bytes(8, 8)).await;

        let event = UploadEvent::new("shop-logo/5/logo.webp");
        let converted = fixture
            .converter()
            .convert(&regulation(vec![Conversion::Webp], false), &event)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(converted.key, "shop-logo/5/logo.webp");
        assert_eq!(converted.content_type, "image/webp");
        let data = fixture.stores.permanent.download(&converted.key).await.unwrap();
        assert_eq!(image::guess_format(&data).unwrap(), ImageFormat::WebP);
    }

    #[tokio::test]
    async fn test_chain_applies_each_step() {
        let fixture = Fixture::new().await;
        fixture.land("shop-cover/2/cover.png", png_bytes(16, 16)).await;

        let event = UploadEvent::new("shop-cover/2/cover.png");
        let converted = fixture
            .converter()
            .convert(
                &regulation(vec![Conversion::Png, Conversion::Jpeg], false),
                &event,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(converted.key, "shop-cover/2/cover.jpg");
        assert_eq!(converted.content_type, "image/jpeg");
        let data = fixture.stores.permanent.download(&converted.key).await.unwrap();
        assert_eq!(image::guess_format(&data).unwrap(), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_source_already_in_target_format() {
        let fixture = Fixture::new().await;
        fixture.land("shop-logo/1/logo.png", png_bytes(8, 8)).await;

        let event = UploadEvent::new("shop-logo/1/logo.png");
        let converted = fixture
            .converter()
            .convert(&regulation(vec![Conversion::Png], false), &event)
            .await
            .unwrap();
        assert_eq!(converted, None);
    }

    #[tokio::test]
    async fn test_unsupported_conversion_fails_open() {
        let fixture = Fixture::new().await;
        let converter = fixture.converter();
        let event = UploadEvent::new("user-avatar/3/me.png");
        let unsupported = vec![Conversion::Unsupported("heic".to_string())];

        let converted = converter
            .convert(&regulation(unsupported.clone(), false), &event)
            .await
            .unwrap();
        assert_eq!(converted, None);

        let err = converter
            .convert(&regulation(unsupported, true), &event)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Unavailable { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_undecodable_body_is_terminal() {
        let fixture = Fixture::new().await;
        fixture.land("product-image/4/fake.png", b"not an image".to_vec()).await;

        let event = UploadEvent::new("product-image/4/fake.png");
        let err = fixture
            .converter()
            .convert(&regulation(vec![Conversion::Webp], false), &event)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Image(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_object_is_retryable() {
        let fixture = Fixture::new().await;

        let event = UploadEvent::new("product-image/4/missing.png");
        let err = fixture
            .converter()
            .convert(&regulation(vec![Conversion::Webp], false), &event)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Storage(StorageError::NotFound(_))));
        assert!(err.is_retryable());
    }
}
