//! Regulation catalog
//!
//! Maps an object key to the upload policy of its asset category and checks
//! landed objects against it. Everything here is pure: no I/O, no clock.

use marketcast_core::{AssetCategory, Classify, Disposition, Regulation, RegulationLimits};
use std::collections::HashMap;

const IMAGE_CONTENT_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp", "image/gif"];
const VIDEO_CONTENT_TYPES: &[&str] = &["video/mp4", "video/quicktime", "video/webm"];

/// Validation errors for landed objects. All of them are terminal: the
/// object will not change on redelivery.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegulationError {
    #[error("No regulation matches key: {key}")]
    UnknownRegulation { key: String },

    #[error("Invalid content type: {content_type} (allowed: {allowed:?})")]
    InvalidContentType {
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("Content too large: {size} bytes (max: {max} bytes)")]
    ContentTooLarge { size: u64, max: u64 },

    #[error("Empty content")]
    EmptyContent,
}

impl Classify for RegulationError {
    fn disposition(&self) -> Disposition {
        Disposition::Terminal
    }
}

/// Read-only table of regulations, one per asset category.
#[derive(Debug, Clone)]
pub struct RegulationCatalog {
    regulations: HashMap<AssetCategory, Regulation>,
}

impl RegulationCatalog {
    /// Build a catalog from explicit regulations. A later entry for the same
    /// category replaces an earlier one.
    pub fn new(regulations: impl IntoIterator<Item = Regulation>) -> Self {
        Self {
            regulations: regulations
                .into_iter()
                .map(|r| (r.category, r))
                .collect(),
        }
    }

    /// The marketplace's default catalog.
    ///
    /// Every image category accepts the same web formats and is converted to
    /// the configured target; videos are promoted untouched.
    pub fn marketplace(limits: &RegulationLimits) -> Self {
        let image_convert: Vec<_> = limits.image_conversion.iter().cloned().collect();

        Self::new(AssetCategory::ALL.into_iter().map(|category| {
            if category.is_image() {
                Regulation {
                    category,
                    convert: image_convert.clone(),
                    allowed_content_types: owned(IMAGE_CONTENT_TYPES),
                    max_content_length: limits.max_image_size_bytes,
                    require_conversion: limits.image_conversion_required,
                }
            } else {
                Regulation {
                    category,
                    convert: Vec::new(),
                    allowed_content_types: owned(VIDEO_CONTENT_TYPES),
                    max_content_length: limits.max_video_size_bytes,
                    require_conversion: false,
                }
            }
        }))
    }

    pub fn get(&self, category: AssetCategory) -> Option<&Regulation> {
        self.regulations.get(&category)
    }

    /// Find the regulation for `key`.
    ///
    /// Keys look like `{category}/{owner_id}/{filename}`; anything shorter, or
    /// with a category the catalog has no entry for, is unknown.
    pub fn resolve(&self, key: &str) -> Result<&Regulation, RegulationError> {
        let unknown = || RegulationError::UnknownRegulation {
            key: key.to_string(),
        };

        let segments: Vec<&str> = key.split('/').collect();
        if segments.len() < 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(unknown());
        }

        AssetCategory::from_prefix(segments[0])
            .and_then(|category| self.regulations.get(&category))
            .ok_or_else(unknown)
    }

    /// Check an object's metadata against its regulation.
    ///
    /// `content_length == max_content_length` is accepted.
    pub fn validate(
        &self,
        regulation: &Regulation,
        content_type: &str,
        content_length: u64,
    ) -> Result<(), RegulationError> {
        if content_length == 0 {
            return Err(RegulationError::EmptyContent);
        }

        let normalized = normalize_content_type(content_type);
        if !regulation
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&normalized))
        {
            return Err(RegulationError::InvalidContentType {
                content_type: content_type.to_string(),
                allowed: regulation.allowed_content_types.clone(),
            });
        }

        if content_length > regulation.max_content_length {
            return Err(RegulationError::ContentTooLarge {
                size: content_length,
                max: regulation.max_content_length,
            });
        }

        Ok(())
    }
}

fn owned(types: &[&str]) -> Vec<String> {
    types.iter().map(|t| t.to_string()).collect()
}

/// Lowercase MIME type without parameters: `Image/JPEG; charset=binary` is
/// `image/jpeg`.
fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}
