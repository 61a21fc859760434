//! Error type for the taskwright CLI.

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("kernel error: {0}")]
    Kernel(#[from] taskwright_kernel::KernelError),

    #[error("run failed: {0}")]
    Run(#[from] taskwright_runtime::InterfaceError),

    #[error("{0}")]
    Other(String),
}

pub type CliResult<T> = std::result::Result<T, CliError>;

impl From<&str> for CliError {
    fn from(s: &str) -> Self {
        CliError::Other(s.to_string())
    }
}

impl From<String> for CliError {
    fn from(s: String) -> Self {
        CliError::Other(s)
    }
}
