//! Metrics export.
//!
//! Run results can be pushed to a Prometheus Push Gateway once all hosts
//! have been checked.
//!
//! # Submodules
//!
//! - `prom` - Prometheus metrics integration

pub mod prom;
