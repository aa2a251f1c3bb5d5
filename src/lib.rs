//! # Reel Relay
//!
//! An unattended short-video republishing pipeline.
//!
//! Reel Relay periodically picks a video from a content source (an HTTP
//! trending feed or a local file), skips anything it has already published,
//! re-encodes it to a vertical frame with an optional watermark, and posts it
//! to a publish target with a templated caption. Every outcome lands in a
//! SQLite history that also drives duplicate detection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │  Sources    │──▶│    Pipeline      │──▶│    Targets    │
//! │ feed/local  │   │ dedup+transcode  │   │  dir / http   │
//! └─────────────┘   └────────┬─────────┘   └───────────────┘
//!                            │
//!          ┌─────────────────┼──────────────────┐
//!          ▼                 ▼                  ▼
//!    ┌──────────┐     ┌────────────┐     ┌────────────┐
//!    │ Schedule │     │  History   │     │  Resource  │
//!    │   loop   │     │  (SQLite)  │     │    gate    │
//!    └──────────┘     └────────────┘     └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! relay init                    # create database
//! relay check                   # verify ffmpeg, sources, target
//! relay plan                    # show the transcode command
//! relay run --once              # one iteration
//! relay run                     # loop until Ctrl-C
//! relay history --limit 20
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`dedup`] | Duplicate store over the history table |
//! | [`retry`] | Retry with exponential backoff |
//! | [`resources`] | CPU / memory / disk gate |
//! | [`transform`] | Captions, watermark geometry, transcoder arguments |
//! | [`traits`] | Source, target, and transcoder seams |
//! | [`pipeline`] | Per-cycle orchestration |
//! | [`schedule`] | Long-running loop with jitter and cancellation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod resources;
pub mod retry;
pub mod runner;
pub mod schedule;
pub mod source_feed;
pub mod source_local;
pub mod sources;
pub mod stats;
pub mod target_directory;
pub mod target_http;
pub mod traits;
pub mod transcoder;
pub mod transform;
