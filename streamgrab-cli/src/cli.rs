use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "streamgrab",
    author,
    version,
    about = "Download a live stream fragment by fragment and merge it into one file",
    long_about = None
)]
pub struct Args {
    /// Manifest URL (HLS .m3u8 or DASH .mpd)
    pub url: String,

    /// Directory for the output file and the fragment directory
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Session name, used for `<name>.<ext>` and `<name>_fragments`
    #[arg(short, long)]
    pub name: Option<String>,

    /// Quality to select: best, worst, or a label such as 720p
    #[arg(long)]
    pub quality: Option<String>,

    /// Stop after this many fragments
    #[arg(long, value_name = "N")]
    pub max_fragments: Option<usize>,

    /// Netscape-format cookies file
    #[arg(long, value_name = "FILE")]
    pub cookies: Option<PathBuf>,

    /// Extra cookie sent with every request, may be repeated
    #[arg(long = "cookie", value_name = "NAME=VALUE")]
    pub cookie: Vec<String>,

    /// Container metadata entry, may be repeated
    #[arg(short, long = "metadata", value_name = "KEY=VALUE")]
    pub metadata: Vec<String>,

    /// Image embedded as the cover of the output file
    #[arg(long, value_name = "FILE")]
    pub thumbnail: Option<PathBuf>,

    /// Keep fragment files and progress.json after merging
    #[arg(long)]
    pub keep_fragments: bool,

    /// Skip fragments already stored by an earlier run of the same session
    #[arg(long)]
    pub resume: bool,

    /// Output container extension
    #[arg(short, long, value_name = "EXT")]
    pub format: Option<String>,

    /// Path to the ffmpeg binary
    #[arg(long, env = "STREAMGRAB_FFMPEG", value_name = "PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// Attempts per request
    #[arg(long)]
    pub retries: Option<u32>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    #[arg(long)]
    pub user_agent: Option<String>,

    /// Fail when more than this fraction of fragments come back empty
    #[arg(long, value_name = "RATIO")]
    pub max_failed_ratio: Option<f64>,

    /// Configuration file (defaults to <config dir>/streamgrab/config.toml)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the final outcome as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors and hide the progress bar
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
