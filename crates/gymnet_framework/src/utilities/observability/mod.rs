// Gymnet Observability Module
//
// Logging and metrics for the gym bridge: log4rs-backed logging behind the `log` facade and
// a prometheus registry of per-channel exchange counters.

pub mod logging;
pub mod metrics;

use crate::utilities::configuration::LoggingParams;

use logging::LoggingError;
use metrics::MetricsManager;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error("[ObservabilityError] Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Initialize logging from `params` and return the process-wide metrics manager.
pub fn init_observability(params: &LoggingParams) -> Result<Arc<MetricsManager>, ObservabilityError> {
    logging::init_logging_from_params(params)?;
    Ok(metrics::init_metrics()?)
}
