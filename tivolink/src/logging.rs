//! Tracing subscriber setup.
//!
//! Console output always; a daily-rolling file as well when a log
//! directory is configured. The filter comes from `RUST_LOG` and falls
//! back to [`DEFAULT_FILTER`].

use std::path::Path;

use time::format_description::FormatItem;
use time::macros::format_description;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub use tracing_appender::non_blocking::WorkerGuard;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "tivolink=info,tivolink_cli=info";

/// Prefix of the rolling log files.
pub const LOG_FILE_PREFIX: &str = "tivolink.log";

const TIMESTAMP: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

/// Install the global subscriber.
///
/// The returned guard flushes the file writer when dropped and must be
/// kept alive for the lifetime of the process. Calling this twice is
/// harmless; the second call leaves the first subscriber in place.
///
/// # Arguments
///
/// * `log_dir` - Directory for daily log files, or `None` for console only
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console = fmt::layer()
        .with_timer(LocalTime::new(TIMESTAMP))
        .with_target(false)
        .boxed();

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_timer(LocalTime::new(TIMESTAMP))
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();
    if installed.is_err() {
        return None;
    }

    if let Some(dir) = log_dir {
        tracing::info!(path = %dir.display(), "Writing logs to directory");
    }
    guard
}
