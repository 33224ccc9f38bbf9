use m3u8_rs::{MasterPlaylist, VariantStream, parse_playlist_res};
use tracing::{debug, warn};
use url::Url;

use super::{FragmentDescriptor, resolve_fragment_url};

const MEDIA_SEQUENCE_TAG: &str = "#EXT-X-MEDIA-SEQUENCE:";

/// What an HLS document turned out to be.
#[derive(Debug, Clone)]
pub enum HlsPlaylist {
    /// Multivariant playlist listing renditions of the same stream.
    Master(MasterPlaylist),
    /// Anything else; handed to [`parse_media_playlist`].
    Media,
}

pub fn classify(data: &[u8]) -> HlsPlaylist {
    match parse_playlist_res(data) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(pl)) => HlsPlaylist::Master(pl),
        Ok(m3u8_rs::Playlist::MediaPlaylist(_)) => HlsPlaylist::Media,
        Err(e) => {
            debug!(error = %e, "m3u8 parser rejected playlist, treating it as a media playlist");
            HlsPlaylist::Media
        }
    }
}

/// Extract fragment references from a media playlist.
///
/// Every non-blank line that is not a tag or comment is a fragment; the first
/// one gets the `#EXT-X-MEDIA-SEQUENCE` value (0 when absent) and each
/// following fragment increments it. Relative references are resolved against
/// `base_url`. Input that is not UTF-8, or a sequence value that is not an
/// integer, yields no fragments.
pub fn parse_media_playlist(data: &[u8], base_url: Option<&str>) -> Vec<FragmentDescriptor> {
    let text = match std::str::from_utf8(data) {
        Ok(text) => text.trim_start_matches('\u{feff}'),
        Err(e) => {
            warn!(error = %e, "Playlist is not valid UTF-8");
            return Vec::new();
        }
    };

    let mut fragments = Vec::new();
    let mut sequence: u64 = 0;

    for line in text.lines().map(str::trim) {
        if let Some(value) = line.strip_prefix(MEDIA_SEQUENCE_TAG) {
            match value.trim().parse::<u64>() {
                Ok(seq) => sequence = seq,
                Err(e) => {
                    warn!(value, error = %e, "Invalid media sequence value");
                    return Vec::new();
                }
            }
        } else if !line.is_empty() && !line.starts_with('#') {
            fragments.push(FragmentDescriptor {
                url: resolve_fragment_url(base_url, line),
                sequence,
            });
            sequence += 1;
        }
    }

    fragments
}

/// Pick a rendition from a master playlist by quality label.
///
/// `best` and `worst` pick by advertised bandwidth. Any other label matches
/// the first variant whose resolution (`1280x720`), height (`720p`) or video
/// group contains it; when nothing matches the first variant is used.
/// I-frame-only renditions are never picked.
pub fn select_variant<'a>(master: &'a MasterPlaylist, quality: &str) -> Option<&'a VariantStream> {
    let mut candidates = master.variants.iter().filter(|v| !v.is_i_frame).peekable();
    candidates.peek()?;

    let quality = quality.trim().to_ascii_lowercase();
    match quality.as_str() {
        "best" | "" => candidates.max_by_key(|v| v.bandwidth),
        "worst" => candidates.min_by_key(|v| v.bandwidth),
        _ => {
            let all: Vec<&VariantStream> = candidates.collect();
            all.iter()
                .copied()
                .find(|v| variant_labels(v).iter().any(|label| label.contains(&quality)))
                .or_else(|| all.first().copied())
        }
    }
}

fn variant_labels(variant: &VariantStream) -> Vec<String> {
    let mut labels = Vec::new();
    if let Some(res) = &variant.resolution {
        labels.push(format!("{}x{}", res.width, res.height));
        labels.push(format!("{}p", res.height));
    }
    if let Some(video) = &variant.video {
        labels.push(video.to_ascii_lowercase());
    }
    labels
}

/// Absolute URL of a variant's media playlist.
pub fn variant_url(manifest_url: &str, variant: &VariantStream) -> String {
    match Url::parse(manifest_url).and_then(|base| base.join(&variant.uri)) {
        Ok(url) => url.to_string(),
        Err(_) => resolve_fragment_url(Some(&super::base_url_of(manifest_url)), &variant.uri),
    }
}
