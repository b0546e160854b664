use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Asset categories accepted by the landing store.
///
/// The category is the first path segment of an object key, e.g.
/// `product-image/{product_id}/{filename}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AssetCategory {
    ShopLogo,
    ShopCover,
    ProductImage,
    UserAvatar,
    CoordinatorAvatar,
    ProducerAvatar,
    BroadcastThumbnail,
    VideoThumbnail,
    Video,
}

impl AssetCategory {
    pub const ALL: [AssetCategory; 9] = [
        AssetCategory::ShopLogo,
        AssetCategory::ShopCover,
        AssetCategory::ProductImage,
        AssetCategory::UserAvatar,
        AssetCategory::CoordinatorAvatar,
        AssetCategory::ProducerAvatar,
        AssetCategory::BroadcastThumbnail,
        AssetCategory::VideoThumbnail,
        AssetCategory::Video,
    ];

    /// Key prefix (first path segment) of this category.
    pub fn prefix(self) -> &'static str {
        match self {
            AssetCategory::ShopLogo => "shop-logo",
            AssetCategory::ShopCover => "shop-cover",
            AssetCategory::ProductImage => "product-image",
            AssetCategory::UserAvatar => "user-avatar",
            AssetCategory::CoordinatorAvatar => "coordinator-avatar",
            AssetCategory::ProducerAvatar => "producer-avatar",
            AssetCategory::BroadcastThumbnail => "broadcast-thumbnail",
            AssetCategory::VideoThumbnail => "video-thumbnail",
            AssetCategory::Video => "video",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.prefix() == prefix)
    }

    pub fn is_image(self) -> bool {
        !matches!(self, AssetCategory::Video)
    }
}

impl Display for AssetCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.prefix())
    }
}

/// Named content conversions a regulation can ask for.
///
/// Closed set of encoders plus one fallback arm for names that do not map to
/// an encoder (e.g. a typo in configuration). The converter passes objects
/// through unchanged for the fallback arm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Conversion {
    Webp,
    Jpeg,
    Png,
    Unsupported(String),
}

impl Conversion {
    /// Map a configured name to a conversion. Never fails.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "webp" => Conversion::Webp,
            "jpeg" | "jpg" => Conversion::Jpeg,
            "png" => Conversion::Png,
            other => Conversion::Unsupported(other.to_string()),
        }
    }

    /// File extension of the converted object.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Conversion::Webp => Some("webp"),
            Conversion::Jpeg => Some("jpg"),
            Conversion::Png => Some("png"),
            Conversion::Unsupported(_) => None,
        }
    }

    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            Conversion::Webp => Some("image/webp"),
            Conversion::Jpeg => Some("image/jpeg"),
            Conversion::Png => Some("image/png"),
            Conversion::Unsupported(_) => None,
        }
    }
}

impl Display for Conversion {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Conversion::Webp => write!(f, "webp"),
            Conversion::Jpeg => write!(f, "jpeg"),
            Conversion::Png => write!(f, "png"),
            Conversion::Unsupported(name) => write!(f, "unsupported({})", name),
        }
    }
}

/// Static upload policy of one asset category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regulation {
    pub category: AssetCategory,
    /// Conversions applied in order. Empty means the object is promoted as-is.
    pub convert: Vec<Conversion>,
    /// Lowercase MIME types without parameters.
    pub allowed_content_types: Vec<String>,
    /// Inclusive upper bound in bytes.
    pub max_content_length: u64,
    /// When set, a conversion that cannot run fails the upload instead of
    /// promoting the original object.
    pub require_conversion: bool,
}

impl Regulation {
    pub fn requires_conversion(&self) -> bool {
        !self.convert.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_roundtrip() {
        for category in AssetCategory::ALL {
            assert_eq!(AssetCategory::from_prefix(category.prefix()), Some(category));
        }
        assert_eq!(AssetCategory::from_prefix("invoice"), None);
    }

    #[test]
    fn test_conversion_parse_falls_back() {
        assert_eq!(Conversion::parse("WebP"), Conversion::Webp);
        assert_eq!(Conversion::parse("jpg"), Conversion::Jpeg);
        assert_eq!(
            Conversion::parse("heic"),
            Conversion::Unsupported("heic".to_string())
        );
        assert_eq!(Conversion::parse("heic").extension(), None);
        assert_eq!(Conversion::Webp.content_type(), Some("image/webp"));
    }
}
