pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod ranking;
pub mod report;
pub mod service;
pub mod stats;
pub mod store;

pub use error::{AnalyticsError, Result};
pub use service::{AnalyticsService, InvalidationScope};
