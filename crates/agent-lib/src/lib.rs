//! Resource-accounting library for Kubernetes Opex Analytics
//!
//! This crate provides the core functionality for:
//! - Decoding Kubernetes quantity strings
//! - Building per-cycle cluster snapshots and namespace accounting
//! - Fixed-step gauge series storage
//! - Trend, histogram and cost-attribution exports
//! - Health checks and observability

pub mod analytics;
pub mod cluster;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod quantity;
pub mod store;

pub use error::{SnapshotError, StoreError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{OpexMetrics, StructuredLogger};
pub use quantity::decode;
