//! HelixAgent - LLM request-routing gateway with an AI Debate Ensemble.
//!
//! An OpenAI-compatible HTTP endpoint that selects upstream LLM
//! providers, optionally orchestrates a multi-round debate among
//! several of them, fuses their answers into a consensus response, and
//! streams or returns the result. A provider verifier/scorer
//! continuously probes upstreams; a background task queue drives async
//! debates and long operations; an OAuth credential manager keeps
//! third-party tokens fresh.
//!
//! ## Quick start
//!
//! ```bash
//! helixagent serve --config helixagent.toml
//! ```

pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod db;
pub mod debate;
pub mod error;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod providers;
pub mod registry;
pub mod selection;
pub mod tasks;
pub mod utils;
pub mod verifier;

pub use error::{ErrorCode, HelixError};

/// Version information, surfaced by the CLI's `--version` flag.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
