//! Shared setup for CLI commands: configuration and logging.

use std::path::{Path, PathBuf};

use tivolink::config::{config_file_path, ConfigFile};
use tivolink::logging::{self, WorkerGuard};

use crate::error::CliError;

/// Loaded configuration plus the logging guard, held for the command's
/// lifetime.
pub struct CliRunner {
    config: ConfigFile,
    config_path: PathBuf,
    log_guard: Option<WorkerGuard>,
}

impl CliRunner {
    /// Load configuration and start logging.
    ///
    /// An explicit `--config` path must exist. Without one, a missing
    /// default file yields an empty configuration.
    pub fn new(config_path: Option<&Path>) -> Result<Self, CliError> {
        let (config, path) = match config_path {
            Some(path) => (ConfigFile::load_from(path)?, path.to_path_buf()),
            None => {
                let path = config_file_path();
                let config = if path.exists() {
                    ConfigFile::load_from(&path)?
                } else {
                    ConfigFile::default()
                };
                (config, path)
            }
        };

        let log_guard = logging::init(config.server.log_dir.as_deref());
        Ok(Self {
            config,
            config_path: path,
            log_guard,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigFile {
        &mut self.config
    }

    pub fn into_config(self) -> (ConfigFile, Option<WorkerGuard>) {
        (self.config, self.log_guard)
    }

    /// Log the command being run and where its configuration came from.
    pub fn log_startup(&self, command: &str) {
        tracing::info!(
            version = tivolink::VERSION,
            command,
            config = %self.config_path.display(),
            shares = self.config.shares.len(),
            "TivoLink starting"
        );
    }
}
