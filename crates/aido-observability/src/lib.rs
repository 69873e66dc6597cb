//! aido observability
//!
//! Structured logging with pretty, compact, or JSON console output and
//! optional rotating JSON log files. Initialize once at process start and
//! hold the returned [`LogGuard`] until exit.

pub mod config;
pub mod error;
pub mod logging;

pub use config::*;
pub use error::{ObservabilityError, Result};
pub use logging::{init_logging, LogGuard};
