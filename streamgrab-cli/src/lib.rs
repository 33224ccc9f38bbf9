//! Library target for the `streamgrab` package.
//!
//! The primary deliverable of this package is the `streamgrab` CLI binary
//! (`src/main.rs`). The argument, configuration and reporting layers live here
//! so they can be unit tested.

pub mod cli;
pub mod config;
pub mod error;
pub mod progress;
pub mod utils;

#[doc(hidden)]
pub use streamgrab_engine;
