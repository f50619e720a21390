//! Client and models for the Bilibili web API.
//!
//! Covers the three endpoints the download pipeline needs (identity, video
//! metadata, per-part stream offers) plus the variant-selection logic that
//! turns a stream offer into a concrete video/audio pair.

pub mod client;
pub mod error;
pub mod model;
pub mod select;
mod wire;

pub use client::{BiliClient, ClientConfig, DEFAULT_USER_AGENT};
pub use error::ApiError;
pub use model::{
    AssetDescriptor, EncodingVariant, LegacySegment, PartDescriptor, SelectedSpecification,
    StreamDescriptor, StreamPayload, UserIdentity,
};
pub use select::{AutoPicker, VariantPicker, rank_variants, select_specification};
