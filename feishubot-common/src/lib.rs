//! feishubot-common - configuration, logging and error types for feishubot.
//!
//! This crate provides:
//! - Configuration types, file loading and environment overrides
//! - Configuration validation
//! - The shared error type
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    Config, FeishuConfig, FilterConfig, ObservabilityConfig, ReplyConfig, ServerConfig,
    SessionConfig, UpstreamConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};
