//! Metrics export.
//!
//! Verdicts can be pushed to a Prometheus Push Gateway so certificate
//! problems show up next to the rest of the monitoring.
//!
//! # Submodules
//!
//! - `prom` - Prometheus Push Gateway integration

pub mod prom;
