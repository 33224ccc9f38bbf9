//! Cookies attached to manifest and fragment requests.
//!
//! A jar is either built from plain `name=value` pairs (sent to every host) or
//! loaded from a Netscape `cookies.txt` export, in which case each cookie is
//! only sent to the domain and path it was issued for.

use std::path::Path;

use tracing::debug;
use url::Url;

use crate::error::DownloadError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CookieEntry {
    /// `None` matches every host.
    domain: Option<String>,
    include_subdomains: bool,
    path: String,
    secure: bool,
    name: String,
    value: String,
}

impl CookieEntry {
    fn matches(&self, url: &Url) -> bool {
        if self.secure && url.scheme() != "https" {
            return false;
        }
        if !url.path().starts_with(&self.path) {
            return false;
        }
        let Some(domain) = &self.domain else {
            return true;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        if host == *domain {
            return true;
        }
        self.include_subdomains && host.ends_with(&format!(".{domain}"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    entries: Vec<CookieEntry>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a jar whose cookies are sent to every host.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut jar = Self::new();
        for (name, value) in pairs {
            jar.insert(name, value);
        }
        jar
    }

    /// Add or replace a host-independent cookie.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries
            .retain(|e| !(e.domain.is_none() && e.name == name));
        self.entries.push(CookieEntry {
            domain: None,
            include_subdomains: true,
            path: "/".to_string(),
            secure: false,
            name,
            value: value.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse the tab-separated Netscape format used by browser exports,
    /// curl and yt-dlp. Malformed lines are skipped.
    pub fn parse_netscape(content: &str) -> Self {
        let mut entries = Vec::new();
        for raw in content.lines() {
            let line = raw.trim_end_matches(['\r', '\n']);
            // curl marks HttpOnly cookies with this prefix instead of a column.
            let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                debug!(line = raw, "Skipping malformed cookie line");
                continue;
            }

            let domain = fields[0].trim().trim_start_matches('.').to_ascii_lowercase();
            if domain.is_empty() || fields[5].is_empty() {
                continue;
            }

            entries.push(CookieEntry {
                domain: Some(domain),
                include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
                path: if fields[2].is_empty() {
                    "/".to_string()
                } else {
                    fields[2].to_string()
                },
                secure: fields[3].eq_ignore_ascii_case("TRUE"),
                name: fields[5].to_string(),
                value: fields[6].to_string(),
            });
        }
        Self { entries }
    }

    pub async fn from_netscape_file(path: &Path) -> Result<Self, DownloadError> {
        let content = tokio::fs::read_to_string(path).await?;
        let jar = Self::parse_netscape(&content);
        debug!(path = %path.display(), cookies = jar.len(), "Loaded cookie file");
        Ok(jar)
    }

    /// `Cookie` header value for a request to `url`, if any cookie applies.
    pub fn header_value_for(&self, url: &Url) -> Option<String> {
        let value = self
            .entries
            .iter()
            .filter(|e| e.matches(url))
            .map(|e| format!("{}={}", e.name, e.value))
            .collect::<Vec<_>>()
            .join("; ");
        (!value.is_empty()).then_some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = "# Netscape HTTP Cookie File\n\
        .example.com\tTRUE\t/\tFALSE\t0\tsession\tabc123\n\
        #HttpOnly_live.example.com\tFALSE\t/hls\tTRUE\t0\ttoken\txyz\n\
        broken line without tabs\n\
        other.org\tFALSE\t/\tFALSE\t0\tid\t42\n";

    #[test]
    fn pairs_apply_to_any_host() {
        let jar = CookieJar::from_pairs([("a", "1"), ("b", "2")]);
        let url = Url::parse("http://anything.test/x.m3u8").unwrap();
        assert_eq!(jar.header_value_for(&url).as_deref(), Some("a=1; b=2"));
    }

    #[test]
    fn insert_replaces_same_name() {
        let mut jar = CookieJar::from_pairs([("a", "1")]);
        jar.insert("a", "2");
        assert_eq!(jar.len(), 1);
        let url = Url::parse("http://host/").unwrap();
        assert_eq!(jar.header_value_for(&url).as_deref(), Some("a=2"));
    }

    #[test]
    fn netscape_cookies_are_scoped_by_domain_path_and_scheme() {
        let jar = CookieJar::parse_netscape(EXPORT);
        assert_eq!(jar.len(), 3);

        let fragment = Url::parse("https://live.example.com/hls/seg1.ts").unwrap();
        assert_eq!(
            jar.header_value_for(&fragment).as_deref(),
            Some("session=abc123; token=xyz")
        );

        let plain = Url::parse("http://live.example.com/hls/seg1.ts").unwrap();
        assert_eq!(jar.header_value_for(&plain).as_deref(), Some("session=abc123"));

        let other_path = Url::parse("https://live.example.com/dash/a.mpd").unwrap();
        assert_eq!(
            jar.header_value_for(&other_path).as_deref(),
            Some("session=abc123")
        );

        let subdomain_of_other = Url::parse("http://cdn.other.org/").unwrap();
        assert_eq!(jar.header_value_for(&subdomain_of_other), None);

        let exact_other = Url::parse("http://other.org/").unwrap();
        assert_eq!(jar.header_value_for(&exact_other).as_deref(), Some("id=42"));
    }

    #[tokio::test]
    async fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        tokio::fs::write(&path, EXPORT).await.unwrap();
        let jar = CookieJar::from_netscape_file(&path).await.unwrap();
        assert_eq!(jar.len(), 3);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CookieJar::from_netscape_file(&dir.path().join("nope.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::Io { .. }));
    }
}
