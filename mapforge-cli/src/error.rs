//! CLI error type.

use mapforge::config::ConfigError;
use mapforge::resource::FetchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("resource endpoint error: {0}")]
    Fetch(#[from] FetchError),

    #[error("import failed: {0}")]
    ImportFailed(String),
}
