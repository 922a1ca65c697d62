//! HTTP request handlers shared by services.

pub mod health;

pub use health::{ReadinessCheck, ReadinessChecks, health_check, readiness};
