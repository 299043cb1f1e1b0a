//! Gymnet Metrics Module
//!
//! Prometheus counters and a latency histogram for request/reply exchanges.

use std::sync::{Arc, OnceLock};

pub mod manager;

pub use manager::MetricsManager;

// Global metrics manager (initialized once)
static METRICS_MANAGER: OnceLock<Arc<MetricsManager>> = OnceLock::new();

/// Returns the process-wide metrics manager, creating it on first use.
pub fn init_metrics() -> Result<Arc<MetricsManager>, prometheus::Error> {
    if let Some(manager) = METRICS_MANAGER.get() {
        return Ok(manager.clone());
    }
    let manager = Arc::new(MetricsManager::new()?);
    Ok(METRICS_MANAGER.get_or_init(|| manager).clone())
}
