//! Gymnet Console Logging Sink

use log4rs::{
    append::console::{ConsoleAppender, Target},
    encode::pattern::PatternEncoder,
};

pub const CONSOLE_PATTERN: &str = "[{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l})} {M}] {m}{n}";

/// Colored stdout appender used by every default configuration.
pub fn create_console_appender() -> ConsoleAppender {
    create_custom_console_appender(Target::Stdout, CONSOLE_PATTERN)
}

pub fn create_custom_console_appender(target: Target, pattern: &str) -> ConsoleAppender {
    ConsoleAppender::builder()
        .target(target)
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build()
}
