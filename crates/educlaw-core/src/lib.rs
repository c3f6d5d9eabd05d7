//! # EduClaw Core
//!
//! Shared foundation for the EduClaw answering engine: configuration,
//! error taxonomy, data types, and the trait seams toward embedding,
//! completion, and content services.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::EduClawConfig;
pub use error::{EduClawError, Result};
