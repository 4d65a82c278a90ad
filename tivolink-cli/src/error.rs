//! CLI error type.

use std::fmt;

use tivolink::config::ConfigError;

/// Errors surfaced to the user by the `tivolink` binary.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded or is inconsistent.
    Config(String),
    /// The named share does not exist.
    UnknownShare(String),
    /// A listing could not be produced.
    Listing(String),
    /// The HTTP server failed.
    Serve(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::UnknownShare(name) => write!(
                f,
                "No share named '{}'. Shares are sections with a 'type' key in the config file.",
                name
            ),
            CliError::Listing(msg) => write!(f, "Listing failed: {}", msg),
            CliError::Serve(e) => write!(f, "Server error: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Serve(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl CliError {
    /// Print the error and exit with a non-zero status.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);
        std::process::exit(1);
    }
}
