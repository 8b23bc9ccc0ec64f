//! Prometheus metrics for the Backup Plan Operator
//!
//! Controller-side metrics are scraped from the HTTP server; worker runs
//! push theirs to a Pushgateway.

mod prometheus;
pub mod publisher;

pub use prometheus::*;
