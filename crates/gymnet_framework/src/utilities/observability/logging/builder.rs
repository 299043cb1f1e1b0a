//! Gymnet Logging Builder
//!
//! Fluent builder for custom log4rs configurations.

use super::sinks::{console::create_console_appender, file::create_file_appender};
use super::LoggingError;

use log::LevelFilter;
use log4rs::config::runtime::{ConfigBuilder, RootBuilder};
use log4rs::{
    config::{Appender, Config, Logger, Root},
    filter::threshold::ThresholdFilter,
};
use std::path::Path;

/// LoggingBuilder provides a fluent API for configuring the logging subsystem
pub struct LoggingBuilder {
    config_builder: ConfigBuilder,
    root_builder: RootBuilder,
    root_level: LevelFilter,
    appenders: Vec<String>,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self {
            config_builder: Config::builder(),
            root_builder: Root::builder(),
            root_level: LevelFilter::Info,
            appenders: Vec::new(),
        }
    }

    /// Add a stdout appender that passes records at or above `level`.
    pub fn with_console(mut self, name: &str, level: LevelFilter) -> Self {
        let console = create_console_appender();
        let appender = Appender::builder()
            .filter(Box::new(ThresholdFilter::new(level)))
            .build(name, Box::new(console));

        self.config_builder = self.config_builder.appender(appender);
        self.appenders.push(name.to_string());
        self.root_builder = self.root_builder.appender(name);
        self
    }

    /// Add a file appender, creating parent directories as needed.
    pub fn with_file(
        mut self,
        name: &str,
        path: &Path,
        level: LevelFilter,
    ) -> Result<Self, LoggingError> {
        let file = create_file_appender(path)?;
        let appender = Appender::builder()
            .filter(Box::new(ThresholdFilter::new(level)))
            .build(name, Box::new(file));

        self.config_builder = self.config_builder.appender(appender);
        self.appenders.push(name.to_string());
        self.root_builder = self.root_builder.appender(name);
        Ok(self)
    }

    /// Set the default log level for the root logger
    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.root_level = level;
        self
    }

    /// Configure a specific module's log level, e.g. `gymnet_framework::network`.
    pub fn with_module_level(mut self, module: &str, level: LevelFilter) -> Self {
        let logger = Logger::builder().build(module, level);
        self.config_builder = self.config_builder.logger(logger);
        self
    }

    pub fn appenders(&self) -> &[String] {
        &self.appenders
    }

    pub fn build(self) -> Result<Config, LoggingError> {
        if self.appenders.is_empty() {
            return Err(LoggingError::BuildError(
                "at least one appender must be configured".to_string(),
            ));
        }

        self.config_builder
            .build(self.root_builder.build(self.root_level))
            .map_err(|e| LoggingError::BuildError(e.to_string()))
    }
}
