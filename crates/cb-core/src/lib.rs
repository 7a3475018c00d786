//! cb-core: Shared types and utilities for cuebank
//!
//! This crate provides the pieces every bank loader needs:
//! - the error taxonomy (`CueError`) used across the workspace
//! - a little-endian reader/writer for the compiled bank formats
//! - decibel, pitch and filter conversions

mod error;
mod format;
mod gain;

pub use error::*;
pub use format::*;
pub use gain::*;
