//! Prometheus metrics for the DB cluster operator
//!
//! Metrics are registered in the default registry on first use and served
//! on `/metrics` next to the health endpoints.

mod prometheus;

pub use prometheus::*;
