//! HTTP request handlers.

pub mod agent;
pub mod health;
pub mod metrics;

pub use agent::query;
pub use health::{health, live};
