//! Observability infrastructure for the energy market
//!
//! This crate provides:
//! - Structured logging via tracing
//! - Prometheus metrics
//! - The metric set recorded by the market engine
//!
//! # Quick Start
//!
//! ```ignore
//! use observability::{init_logging, LogFormat};
//!
//! // Initialize logging
//! init_logging("emarket", LogFormat::Pretty)?;
//!
//! // Initialize metrics (optional)
//! observability::metrics::init_metrics(9100)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_with_level, LogFormat};
pub use metrics::{init_metrics, MarketMetrics};
