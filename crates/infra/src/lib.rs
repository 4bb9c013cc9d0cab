//! Infrastructure layer: job store, submission workers, configuration.

pub mod config;
pub mod jobs;
