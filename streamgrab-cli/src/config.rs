use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use streamgrab_engine::config::{DEFAULT_FFMPEG_PATH, DEFAULT_USER_AGENT};
use streamgrab_engine::{DownloaderConfig, MergeOptions, RetryPolicy, ToolConfig};
use tracing::debug;

use crate::cli::Args;
use crate::error::{AppError, Result};

/// Settings read from `config.toml`. Every field is optional in the file;
/// command-line flags override whatever the file sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub output_dir: Option<PathBuf>,
    pub quality: String,
    pub container: String,
    pub ffmpeg_path: PathBuf,
    pub keep_fragments: bool,
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub user_agent: String,
    pub max_failed_ratio: Option<f64>,
    /// Seconds ffmpeg gets to finish writing after an interrupt.
    pub stop_grace_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            quality: "best".to_string(),
            container: "mp4".to_string(),
            ffmpeg_path: PathBuf::from(DEFAULT_FFMPEG_PATH),
            keep_fragments: false,
            timeout_secs: 15,
            retries: 10,
            retry_delay_ms: 2000,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_failed_ratio: None,
            stop_grace_secs: 3,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("streamgrab").join("config.toml"))
    }

    /// Load `path`, or the default location when `path` is `None`.
    ///
    /// A missing file at the default location yields the defaults; a missing
    /// explicitly named file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                debug!(path = %path.display(), "Loaded configuration file");
                Self::from_toml(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
                Ok(Self::default())
            }
            Err(e) => Err(AppError::Config(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(ratio) = self.max_failed_ratio
            && !(0.0..=1.0).contains(&ratio)
        {
            return Err(AppError::Config(format!(
                "max_failed_ratio must be between 0 and 1, got {ratio}"
            )));
        }
        if self.timeout_secs == 0 {
            return Err(AppError::Config("timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Apply command-line overrides.
    pub fn with_args(mut self, args: &Args) -> Result<Self> {
        if let Some(dir) = &args.output_dir {
            self.output_dir = Some(dir.clone());
        }
        if let Some(quality) = &args.quality {
            self.quality = quality.clone();
        }
        if let Some(format) = &args.format {
            self.container = format.trim_start_matches('.').to_string();
        }
        if let Some(ffmpeg) = &args.ffmpeg {
            self.ffmpeg_path = ffmpeg.clone();
        }
        if let Some(timeout) = args.timeout {
            self.timeout_secs = timeout;
        }
        if let Some(retries) = args.retries {
            self.retries = retries;
        }
        if let Some(user_agent) = &args.user_agent {
            self.user_agent = user_agent.clone();
        }
        if args.max_failed_ratio.is_some() {
            self.max_failed_ratio = args.max_failed_ratio;
        }
        self.keep_fragments |= args.keep_fragments;
        self.validate()?;
        Ok(self)
    }

    pub fn downloader_config(&self) -> DownloaderConfig {
        DownloaderConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            user_agent: self.user_agent.clone(),
            retry: RetryPolicy {
                max_attempts: self.retries.max(1),
                delay: Duration::from_millis(self.retry_delay_ms),
                ..RetryPolicy::default()
            },
            max_failed_ratio: self.max_failed_ratio,
            ..DownloaderConfig::default()
        }
    }

    pub fn tool_config(&self) -> ToolConfig {
        ToolConfig {
            binary_path: self.ffmpeg_path.clone(),
            stop_grace_period: Duration::from_secs(self.stop_grace_secs),
        }
    }

    pub fn merge_options(
        &self,
        metadata: BTreeMap<String, String>,
        thumbnail_path: Option<PathBuf>,
    ) -> MergeOptions {
        MergeOptions {
            keep_fragments: self.keep_fragments,
            metadata,
            thumbnail_path,
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = AppConfig::from_toml("quality = \"720p\"\nretries = 3\n").unwrap();
        assert_eq!(config.quality, "720p");
        assert_eq!(config.retries, 3);
        assert_eq!(config.container, "mp4");
        assert_eq!(config.timeout_secs, 15);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            AppConfig::from_toml("max_failed_ratio = 1.5"),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("retries = \"many\""),
            Err(AppError::ConfigParse(_))
        ));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(AppConfig::load(Some(&path)).is_err());

        std::fs::write(&path, "keep_fragments = true\n").unwrap();
        assert!(AppConfig::load(Some(&path)).unwrap().keep_fragments);
    }

    #[test]
    fn flags_override_file() {
        let config = AppConfig::from_toml("quality = \"worst\"\ncontainer = \"mkv\"\n").unwrap();
        let args = Args::try_parse_from([
            "streamgrab",
            "https://example.com/a.m3u8",
            "--quality",
            "1080p",
            "--format",
            ".ts",
            "--retries",
            "4",
        ])
        .unwrap();

        let config = config.with_args(&args).unwrap();
        assert_eq!(config.quality, "1080p");
        assert_eq!(config.container, "ts");

        let downloader = config.downloader_config();
        assert_eq!(downloader.retry.max_attempts, 4);
        assert_eq!(downloader.retry.delay, Duration::from_secs(2));
        assert_eq!(downloader.timeout, Duration::from_secs(15));
    }

    #[test]
    fn merge_options_carry_config() {
        let config = AppConfig {
            keep_fragments: true,
            ffmpeg_path: PathBuf::from("/opt/ffmpeg"),
            ..AppConfig::default()
        };
        let options = config.merge_options(BTreeMap::new(), None);
        assert!(options.keep_fragments);
        assert_eq!(config.tool_config().binary_path, PathBuf::from("/opt/ffmpeg"));
        assert_eq!(config.tool_config().stop_grace_period, Duration::from_secs(3));
    }
}
