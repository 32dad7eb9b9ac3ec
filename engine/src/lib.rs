//! # digest-pipeline-engine
//!
//! Podcast digest pipeline engine.
//!
//! ## Architecture
//!
//! ```text
//! Feed ingester → Audio acquirer → Chunker → Transcriber → Scorer
//!        → Digest composer → Dialogue chunker + TTS → Publisher → Retention
//! ```
//!
//! Phases communicate through the relational store, never in-memory
//! handoff; the orchestrator drives them in order against one `Context`
//! per run.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod acquire;
pub mod chunk;
pub mod context;
pub mod db;
pub mod dialogue;
pub mod digest;
pub mod error;
pub mod feed;
pub mod orchestrator;
pub mod publish;
pub mod retention;
pub mod retry;
pub mod score;
pub mod settings;
pub mod transcoder;
pub mod transcribe;

pub use context::Context;
pub use error::{PipelineError, Result};
pub use orchestrator::{phases, Orchestrator, PhaseOutcome};
pub use settings::Settings;
