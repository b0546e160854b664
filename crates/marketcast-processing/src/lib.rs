//! Marketcast processing library
//!
//! Regulation lookup and validation of landed objects, and the image
//! converter applied before promotion.

pub mod convert;
pub mod regulation;

pub use convert::{ConvertError, Converted, Converter};
pub use regulation::{RegulationCatalog, RegulationError};
