//! Serde shapes for the Bilibili web API responses.
//!
//! The playurl endpoint duplicates several fields in both `camelCase` and
//! `snake_case`. Deserializing both spellings into one serde field would
//! reject responses that carry the pair, so each spelling gets its own
//! optional slot here and the conversion into the domain model picks the
//! first populated one.

use serde::Deserialize;

use crate::model::{
    AssetDescriptor, EncodingVariant, LegacySegment, PartDescriptor, StreamDescriptor,
    StreamPayload, UserIdentity,
};

/// Common `{code, message, data}` envelope around every endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NavData {
    #[serde(default)]
    pub mid: u64,
    #[serde(default)]
    pub uname: String,
    #[serde(default, alias = "vipStatus")]
    pub vip_status: i64,
}

impl From<NavData> for UserIdentity {
    fn from(nav: NavData) -> Self {
        UserIdentity {
            id: nav.mid,
            name: nav.uname,
            is_privileged: nav.vip_status == 1,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ViewData {
    #[serde(default)]
    pub bvid: String,
    #[serde(default)]
    pub aid: u64,
    #[serde(default)]
    pub pic: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pages: Vec<PageWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageWire {
    pub cid: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub part: String,
}

impl From<ViewData> for AssetDescriptor {
    fn from(view: ViewData) -> Self {
        let parts = view
            .pages
            .into_iter()
            .enumerate()
            .map(|(idx, page)| PartDescriptor {
                cid: page.cid,
                ordinal: if page.page > 0 { page.page } else { idx as u32 + 1 },
                source: page.from,
                name: page.part,
            })
            .collect();

        AssetDescriptor {
            bvid: view.bvid,
            aid: view.aid,
            title: view.title,
            cover_url: view.pic,
            parts,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlayUrlData {
    #[serde(default)]
    pub accept_format: String,
    #[serde(default)]
    pub accept_quality: Vec<u32>,
    pub dash: Option<DashWire>,
    pub durl: Option<Vec<DurlWire>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DashWire {
    #[serde(default)]
    pub video: Vec<DashVariantWire>,
    pub audio: Option<Vec<DashVariantWire>>,
    pub dolby: Option<DolbyWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DolbyWire {
    pub audio: Option<Vec<DashVariantWire>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DashVariantWire {
    pub id: u32,
    #[serde(default, rename = "baseUrl")]
    pub base_url_camel: Option<String>,
    #[serde(default, rename = "base_url")]
    pub base_url_snake: Option<String>,
    #[serde(default, rename = "backupUrl")]
    pub backup_url_camel: Option<Vec<String>>,
    #[serde(default, rename = "backup_url")]
    pub backup_url_snake: Option<Vec<String>>,
    #[serde(default)]
    pub bandwidth: u64,
    #[serde(default, rename = "mimeType")]
    pub mime_type_camel: Option<String>,
    #[serde(default, rename = "mime_type")]
    pub mime_type_snake: Option<String>,
    pub codecs: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(default, rename = "frameRate")]
    pub frame_rate_camel: Option<String>,
    #[serde(default, rename = "frame_rate")]
    pub frame_rate_snake: Option<String>,
}

fn first_filled(camel: Option<String>, snake: Option<String>) -> Option<String> {
    camel.filter(|s| !s.is_empty()).or(snake.filter(|s| !s.is_empty()))
}

impl From<DashVariantWire> for EncodingVariant {
    fn from(wire: DashVariantWire) -> Self {
        EncodingVariant {
            id: wire.id,
            mime_type: first_filled(wire.mime_type_camel, wire.mime_type_snake),
            codecs: wire.codecs,
            bandwidth: wire.bandwidth,
            width: wire.width,
            height: wire.height,
            frame_rate: first_filled(wire.frame_rate_camel, wire.frame_rate_snake),
            base_url: first_filled(wire.base_url_camel, wire.base_url_snake).unwrap_or_default(),
            backup_urls: wire
                .backup_url_camel
                .filter(|v| !v.is_empty())
                .or(wire.backup_url_snake)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DurlWire {
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub backup_url: Option<Vec<String>>,
}

impl PlayUrlData {
    /// Fold the wire offer into a descriptor, or `None` when the response
    /// carries neither a DASH nor a legacy payload.
    pub(crate) fn into_descriptor(self) -> Option<StreamDescriptor> {
        let accept_formats: Vec<String> = self
            .accept_format
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let mut accept_quality = self.accept_quality;
        accept_quality.sort_unstable_by(|a, b| b.cmp(a));

        let payload = if let Some(dash) = self.dash {
            StreamPayload::Dash {
                video: dash.video.into_iter().map(Into::into).collect(),
                audio: dash
                    .audio
                    .unwrap_or_default()
                    .into_iter()
                    .map(Into::into)
                    .collect(),
                dolby_audio: dash
                    .dolby
                    .and_then(|d| d.audio)
                    .unwrap_or_default()
                    .into_iter()
                    .map(Into::into)
                    .collect(),
            }
        } else {
            // The legacy endpoint may split long videos into several durl
            // segments; only the single-file shape is supported here.
            let first = self.durl?.into_iter().next()?;
            StreamPayload::Durl(LegacySegment {
                url: first.url,
                backup_urls: first.backup_url.unwrap_or_default(),
                size: first.size,
                duration_ms: first.length,
            })
        };

        Some(StreamDescriptor {
            accept_formats,
            accept_quality,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dash_variant_accepts_camel_case_spelling() {
        let wire: DashVariantWire = serde_json::from_str(
            r#"{
                "id": 80,
                "baseUrl": "https://cdn/v.m4s",
                "backupUrl": ["https://backup/v.m4s"],
                "bandwidth": 2000,
                "mimeType": "video/mp4",
                "codecs": "avc1",
                "width": 1920,
                "height": 1080,
                "frameRate": "30"
            }"#,
        )
        .unwrap();

        let variant = EncodingVariant::from(wire);
        assert_eq!(variant.base_url, "https://cdn/v.m4s");
        assert_eq!(variant.backup_urls, vec!["https://backup/v.m4s"]);
        assert_eq!(variant.mime_type.as_deref(), Some("video/mp4"));
        assert_eq!(variant.frame_rate.as_deref(), Some("30"));
    }

    #[test]
    fn dash_variant_accepts_snake_case_spelling() {
        let wire: DashVariantWire = serde_json::from_str(
            r#"{
                "id": 64,
                "base_url": "https://cdn/v64.m4s",
                "backup_url": [],
                "bandwidth": 1000,
                "mime_type": "video/mp4",
                "frame_rate": "25"
            }"#,
        )
        .unwrap();

        let variant = EncodingVariant::from(wire);
        assert_eq!(variant.base_url, "https://cdn/v64.m4s");
        assert!(variant.backup_urls.is_empty());
        assert_eq!(variant.frame_rate.as_deref(), Some("25"));
    }

    #[test]
    fn dash_variant_accepts_both_spellings_at_once() {
        // Real responses frequently carry the pair; the camelCase one wins.
        let wire: DashVariantWire = serde_json::from_str(
            r#"{
                "id": 80,
                "baseUrl": "https://cdn/camel.m4s",
                "base_url": "https://cdn/snake.m4s",
                "bandwidth": 2000
            }"#,
        )
        .unwrap();

        assert_eq!(EncodingVariant::from(wire).base_url, "https://cdn/camel.m4s");
    }

    #[test]
    fn playurl_without_dash_falls_back_to_durl() {
        let data: PlayUrlData = serde_json::from_str(
            r#"{
                "accept_format": "flv,mp4",
                "accept_quality": [16, 80, 64],
                "durl": [{"order": 1, "length": 1000, "size": 4096, "url": "https://cdn/full.flv"}]
            }"#,
        )
        .unwrap();

        let descriptor = data.into_descriptor().unwrap();
        assert!(!descriptor.is_split());
        assert_eq!(descriptor.accept_quality, vec![80, 64, 16]);
        match descriptor.payload {
            StreamPayload::Durl(segment) => assert_eq!(segment.url, "https://cdn/full.flv"),
            StreamPayload::Dash { .. } => panic!("expected legacy payload"),
        }
    }

    #[test]
    fn playurl_without_any_payload_is_rejected() {
        let data: PlayUrlData = serde_json::from_str(r#"{"accept_format": "mp4"}"#).unwrap();
        assert!(data.into_descriptor().is_none());
    }

    #[test]
    fn null_dash_audio_becomes_empty_list() {
        let data: PlayUrlData = serde_json::from_str(
            r#"{
                "accept_format": "hdflv2,mp4",
                "accept_quality": [80],
                "dash": {"video": [{"id": 80, "base_url": "https://cdn/v.m4s", "bandwidth": 1}], "audio": null}
            }"#,
        )
        .unwrap();

        match data.into_descriptor().unwrap().payload {
            StreamPayload::Dash { audio, dolby_audio, .. } => {
                assert!(audio.is_empty());
                assert!(dolby_audio.is_empty());
            }
            StreamPayload::Durl(_) => panic!("expected dash payload"),
        }
    }
}
