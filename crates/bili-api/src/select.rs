//! Stream specification selection.
//!
//! Given a stream descriptor this module ranks the offered encoding variants
//! and picks one video/audio pair, either automatically (best ranked) or
//! through a caller-supplied picker. Pure apart from the optional picker
//! suspension point; no network I/O happens here.

use std::cmp::Reverse;

use crate::error::ApiError;
use crate::model::{EncodingVariant, SelectedSpecification, StreamDescriptor, StreamPayload};

/// Prompt collaborator for interactive variant selection.
///
/// `pick` returns an index into `choices`, or `None` when the user cancelled
/// the prompt. Cancellation terminates the run cleanly, not as an error.
pub trait VariantPicker: Send + Sync {
    fn pick(&self, label: &str, choices: &[EncodingVariant]) -> Option<usize>;
}

/// Non-interactive picker: always takes the best-ranked variant.
pub struct AutoPicker;

impl VariantPicker for AutoPicker {
    fn pick(&self, _label: &str, _choices: &[EncodingVariant]) -> Option<usize> {
        Some(0)
    }
}

/// Server-side ranking: bandwidth descending, ties broken by variant id
/// descending.
pub fn rank_variants(variants: &mut [EncodingVariant]) {
    variants.sort_by_key(|v| (Reverse(v.bandwidth), Reverse(v.id)));
}

/// The audio source list to offer: a dedicated high-fidelity (Dolby) track
/// set, when present, replaces the standard set in its entirety.
fn audio_candidates(audio: &[EncodingVariant], dolby: &[EncodingVariant]) -> Vec<EncodingVariant> {
    if dolby.is_empty() {
        audio.to_vec()
    } else {
        dolby.to_vec()
    }
}

/// Choose the variant pair for one part.
///
/// `context` labels the prompt (asset title and part name). Returns
/// `Ok(None)` when the picker reports user cancellation of either pick.
pub fn select_specification(
    descriptor: &StreamDescriptor,
    context: &str,
    picker: &dyn VariantPicker,
) -> Result<Option<SelectedSpecification>, ApiError> {
    match &descriptor.payload {
        StreamPayload::Dash {
            video,
            audio,
            dolby_audio,
        } => {
            let mut video = video.clone();
            if video.is_empty() {
                return Err(ApiError::NoVariants);
            }
            rank_variants(&mut video);

            let mut audio = audio_candidates(audio, dolby_audio);
            rank_variants(&mut audio);

            let Some(video_idx) = picker.pick(&format!("[VIDEO] {context}"), &video) else {
                return Ok(None);
            };
            let picked_video = video[video_idx].clone();

            let picked_audio = if audio.is_empty() {
                None
            } else {
                let Some(audio_idx) = picker.pick(&format!("[AUDIO] {context}"), &audio) else {
                    return Ok(None);
                };
                Some(audio[audio_idx].clone())
            };

            Ok(Some(SelectedSpecification {
                video: picked_video,
                audio: picked_audio,
            }))
        }
        // Legacy combined stream: a single file carries both tracks, so the
        // audio slot stays empty and there is nothing to pick.
        StreamPayload::Durl(segment) => Ok(Some(SelectedSpecification {
            video: EncodingVariant {
                id: 0,
                mime_type: None,
                codecs: None,
                bandwidth: 0,
                width: None,
                height: None,
                frame_rate: None,
                base_url: segment.url.clone(),
                backup_urls: segment.backup_urls.clone(),
            },
            audio: None,
        })),
    }
}
