//! Kubernetes Opex Analytics agent
//!
//! Wires the collector, exporter and HTTP API together. Split from the
//! binary so the router and configuration can be tested directly.

pub mod api;
pub mod config;
