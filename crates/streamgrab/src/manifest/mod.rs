//! Manifest detection and parsing for HLS playlists and DASH MPDs.

pub mod dash;
pub mod hls;

use url::Url;

pub use dash::Representation;

/// One media fragment referenced by a playlist, in playlist order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentDescriptor {
    pub url: String,
    /// Media sequence number, seeded by `#EXT-X-MEDIA-SEQUENCE`.
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Hls,
    Dash,
}

impl ManifestKind {
    /// Judge the manifest type from the URL path suffix, ignoring any query
    /// string or fragment.
    pub fn from_url(url: &str) -> Option<Self> {
        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_ascii_lowercase(),
            Err(_) => url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase(),
        };
        if path.ends_with(".mpd") {
            Some(Self::Dash)
        } else if path.ends_with(".m3u8") {
            Some(Self::Hls)
        } else {
            None
        }
    }

    /// Judge the manifest type from its first bytes.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        let head = &data[..data.len().min(1024)];
        let text = String::from_utf8_lossy(head);
        let text = text.trim_start_matches('\u{feff}').trim_start();
        if text.starts_with("#EXTM3U") {
            Some(Self::Hls)
        } else if text.contains("<MPD") {
            Some(Self::Dash)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hls => "hls",
            Self::Dash => "dash",
        }
    }
}

/// The manifest's directory: the URL without its last path segment, query or
/// fragment. Returned without a trailing slash.
pub fn base_url_of(manifest_url: &str) -> String {
    if let Ok(mut parsed) = Url::parse(manifest_url) {
        parsed.set_query(None);
        parsed.set_fragment(None);
        let full = parsed.to_string();
        if let Some((dir, _)) = full.rsplit_once('/') {
            return dir.to_string();
        }
        return full;
    }

    let without_query = manifest_url
        .split(['?', '#'])
        .next()
        .unwrap_or(manifest_url);
    match without_query.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

/// Make a playlist reference absolute. `http(s)://` references pass through;
/// anything else is appended to `base` with exactly one `/` between them.
pub fn resolve_fragment_url(base: Option<&str>, reference: &str) -> String {
    if is_absolute(reference) {
        return reference.to_string();
    }
    match base {
        Some(base) if !base.is_empty() => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            reference.trim_start_matches('/')
        ),
        _ => reference.to_string(),
    }
}

fn is_absolute(reference: &str) -> bool {
    let lower = reference.get(..8).unwrap_or(reference).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
