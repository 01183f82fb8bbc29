//! # Utility Modules
//!
//! Supporting utilities for observability and timing.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Per-driver observability counters
//! - **Time**: Injectable clocks for timeout and retry checks

pub mod logging;
pub mod metrics;
pub mod time;

pub use metrics::{Metrics, MetricsSnapshot};
pub use time::{Clock, ManualClock, SystemClock};
