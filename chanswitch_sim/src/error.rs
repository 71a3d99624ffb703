//! Simulation errors.

use chanswitch_core::{ConfigError, RegistryError};
use chanswitch_env::EnvError;
use thiserror::Error;

/// Failures that stop a simulation run.
///
/// Protocol violations are not here: the registry absorbs them. What is left
/// is a broken harness (an event for a connection nobody registered, a bad
/// configuration), which ends the run.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Environment error: {0}")]
    Env(#[from] EnvError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Export failed: {0}")]
    Export(#[from] std::io::Error),
}
