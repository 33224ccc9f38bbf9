//! Fragment acquisition and reassembly for HLS/DASH live streams.
//!
//! A download runs in three stages:
//!
//! - [`AcquisitionCoordinator`] fetches the manifest, resolves its fragment
//!   list and stores each fragment as `fragment_00000.ts`, `fragment_00001.ts`
//!   and so on, rewriting `progress.json` after every fragment.
//! - [`ReassemblyEngine`] concatenates the fragments with an external
//!   [`MediaTool`] (ffmpeg by default), then embeds metadata and a thumbnail.
//! - [`PartialRecoverySweep`] turns whatever an interrupted download left
//!   behind into a `<dir>_partial.<ext>` file.
//!
//! [`DownloadSession`] strings the three together and reports a
//! [`SessionOutcome`].
//!
//! ## License
//!
//! This project is licensed under the [MIT](./LICENSE.MIT) or
//! [Apache-2.0](./LICENSE.Apache-2.0) license. You can choose between one of
//! them if you use this work.
//!
//! `SPDX-License-Identifier: MIT OR Apache-2.0`

pub mod config;
pub mod cookies;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod ffmpeg_parser;
pub mod layout;
pub mod manifest;
pub mod progress;
pub mod reassembly;
pub mod recovery;
pub mod retry;
pub mod session;
pub mod tool;

#[cfg(test)]
mod test_support;

pub use config::{DownloaderConfig, MergeOptions, ToolConfig};
pub use cookies::CookieJar;
pub use coordinator::{AcquireRequest, AcquisitionCoordinator, AcquisitionReport};
pub use error::DownloadError;
pub use events::{EventSink, LogLevel, MergeStage, SessionEvent};
pub use fetcher::{FragmentFetcher, install_rustls_provider};
pub use manifest::{FragmentDescriptor, ManifestKind, Representation};
pub use progress::ProgressRecord;
pub use reassembly::{MergeReport, ReassemblyEngine};
pub use recovery::{InterruptReason, PartialRecoverySweep, SalvageOutcome};
pub use retry::{RetryAction, RetryPolicy};
pub use session::{DownloadRequest, DownloadSession, SessionOutcome};
pub use tool::{FfmpegTool, MediaTool, ToolContext};
