//! Translation engine capability.
//!
//! The engine is a black box: a call from a local input file and a
//! [`JobConfig`](crate::job::JobConfig) to local output files, or an error,
//! with optional progress updates along the way.

mod command;
mod config;
mod error;
mod traits;

pub use command::CommandEngine;
pub use config::EngineConfig;
pub use error::EngineError;
pub use traits::TranslationEngine;
