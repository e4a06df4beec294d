#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # tsdemux - MPEG Transport Stream demuxer
//!
//! `tsdemux` splits an MPEG transport stream into the elementary streams of
//! one program and estimates the stream's duration from its program clock.
//!
//! ## Features
//!
//! - TS packet synchronisation and adaptation field parsing (PCR, OPCR)
//! - PAT/PMT acquisition and stream type to caps mapping
//! - PES reassembly with PTS/DTS extraction and bounded header buffering
//! - Per-stream flow aggregation and segment/EOS events
//! - Two-pass PCR duration estimation over a random-access source,
//!   optionally on a background tokio task
//! - Optional clock statistics events over tokio channels
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tsdemux::config::DemuxConfig;
//! use tsdemux::format::ts::{spawn_duration_scan, FileSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = FileSource::open("capture.ts").await?;
//!     let scan = spawn_duration_scan(DemuxConfig::load(), source);
//!     println!("duration: {:?}", scan.wait().await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `av`: stream handles, caps, buffers, flow statuses and the sink trait
//! - `format`: the transport stream demuxer and duration estimator
//! - `config`: demuxer and scan settings
//! - `error`: error type and result alias
//! - `utils`: bit reader, CRC and masked scanning helpers

/// Stream handles, buffers and downstream sinks
pub mod av;

/// Error types and utilities
pub mod error;

/// Container format implementations
pub mod format;

/// Common utilities and helper functions
pub mod utils;

/// Configuration module
pub mod config;

pub use error::{DemuxError, Result};
