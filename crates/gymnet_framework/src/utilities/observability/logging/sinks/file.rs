//! Gymnet File Logging Sink

use super::super::LoggingError;

use log4rs::{append::file::FileAppender, encode::pattern::PatternEncoder};
use std::path::Path;

pub const FILE_PATTERN: &str = "[{d(%Y-%m-%d %H:%M:%S%.3f)} {l} {M}] {m}{n}";

/// Appending file sink without rotation. Parent directories are created.
pub fn create_file_appender(path: &Path) -> Result<FileAppender, LoggingError> {
    if let Some(parent_dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent_dir).map_err(|e| {
            LoggingError::BuildError(format!(
                "failed to create log directory {}: {}",
                parent_dir.display(),
                e
            ))
        })?;
    }

    FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(FILE_PATTERN)))
        .append(true)
        .build(path)
        .map_err(|e| LoggingError::BuildError(format!("{}: {}", path.display(), e)))
}
