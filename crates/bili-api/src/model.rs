//! Domain records for a multi-part Bilibili video asset.
//!
//! These are the canonical shapes the rest of the workspace works with. The
//! wire layer (`wire`) owns the mapping from the server's duplicated
//! `camelCase`/`snake_case` spellings onto the single field kept here.

use std::fmt;

/// The logged-in account behind the configured credential, if any.
///
/// Fetched once per run and used only for display; a failed identity fetch
/// never blocks the pipeline.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub id: u64,
    pub name: String,
    pub is_privileged: bool,
}

/// A video asset and its ordered parts, immutable after fetch.
#[derive(Debug, Clone)]
pub struct AssetDescriptor {
    pub bvid: String,
    pub aid: u64,
    pub title: String,
    pub cover_url: String,
    /// Parts in the order the server listed them. Output naming relies on
    /// this order being preserved.
    pub parts: Vec<PartDescriptor>,
}

/// One sub-video of an asset.
#[derive(Debug, Clone)]
pub struct PartDescriptor {
    /// Opaque content id (`cid`), the key for stream lookups.
    pub cid: u64,
    /// 1-based position within the asset.
    pub ordinal: u32,
    pub source: String,
    pub name: String,
}

/// Stream offer for one part at one quality tier. Transient: refetched when
/// locking to a chosen quality.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub accept_formats: Vec<String>,
    /// Accepted quality tiers, descending.
    pub accept_quality: Vec<u32>,
    pub payload: StreamPayload,
}

impl StreamDescriptor {
    /// Whether the offer carries split audio/video variants (DASH) rather
    /// than a single combined legacy stream. The server flags the same
    /// condition through an MP4-family/`hdflv2` tag in `accept_formats`.
    pub fn is_split(&self) -> bool {
        matches!(self.payload, StreamPayload::Dash { .. })
    }
}

/// Container-kind discriminant: split DASH variant lists, or the legacy
/// single-file FLV descriptor.
#[derive(Debug, Clone)]
pub enum StreamPayload {
    Dash {
        video: Vec<EncodingVariant>,
        audio: Vec<EncodingVariant>,
        /// Dedicated high-fidelity (Dolby) audio track set. When non-empty it
        /// replaces the standard audio set wholesale during selection.
        dolby_audio: Vec<EncodingVariant>,
    },
    Durl(LegacySegment),
}

/// One encoding variant of a DASH stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingVariant {
    pub id: u32,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    /// Bits per second; the primary ranking key.
    pub bandwidth: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<String>,
    pub base_url: String,
    pub backup_urls: Vec<String>,
}

impl fmt::Display for EncodingVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id {}", self.id)?;
        if let Some(codecs) = &self.codecs {
            write!(f, " | {codecs}")?;
        }
        write!(f, " | {} kbps", self.bandwidth / 1000)?;
        if let (Some(w), Some(h)) = (self.width, self.height) {
            write!(f, " | {w}x{h}")?;
        }
        if let Some(fr) = &self.frame_rate {
            write!(f, " @ {fr} fps")?;
        }
        Ok(())
    }
}

/// Combined audio+video single-file stream from the legacy endpoint.
#[derive(Debug, Clone)]
pub struct LegacySegment {
    pub url: String,
    pub backup_urls: Vec<String>,
    pub size: Option<u64>,
    pub duration_ms: Option<u64>,
}

/// The variant pair chosen for a part. `audio` is absent only for legacy
/// combined streams.
#[derive(Debug, Clone)]
pub struct SelectedSpecification {
    pub video: EncodingVariant,
    pub audio: Option<EncodingVariant>,
}
