//! Gymnet Logging Sinks
//!
//! Destinations for log records: stdout and plain files.

pub mod console;
pub mod file;

pub use console::create_console_appender;
pub use file::create_file_appender;
