//! Configuration validation.
//!
//! Checks that credentials are present and that numeric settings are usable
//! before the server starts.

use thiserror::Error;

use crate::config::{
    Config, InvalidOverride, FeishuConfig, ObservabilityConfig, ServerConfig, SessionConfig, UpstreamConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Longest accepted idle expiry: one year.
pub const MAX_EXPIRE_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let sections: [&dyn Validate; 5] = [
            &self.server,
            &self.feishu,
            &self.upstream,
            &self.session,
            &self.observability,
        ];

        let mut errors: Vec<ValidationError> = self
            .invalid_overrides
            .iter()
            .map(InvalidOverride::to_error)
            .collect();
        errors.extend(
            sections
                .iter()
                .filter_map(|section| section.validate().err()),
        );

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

impl InvalidOverride {
    fn to_error(&self) -> ValidationError {
        ValidationError::InvalidValue {
            field: self.key.clone(),
            reason: format!("expected {}, got {:?}", self.expected, self.value),
        }
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "server.port".into(),
            });
        }
        Ok(())
    }
}

impl Validate for FeishuConfig {
    fn validate(&self) -> ValidationResult<()> {
        let required = [
            ("feishu.app_id (FeishuAppID)", &self.app_id),
            ("feishu.app_secret (FeishuAppSecret)", &self.app_secret),
            (
                "feishu.verification_token (FeishuVerificationToken)",
                &self.verification_token,
            ),
            ("feishu.bot_name (FeishuBotName)", &self.bot_name),
        ];

        let mut missing: Vec<ValidationError> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| ValidationError::MissingField {
                field: (*field).into(),
            })
            .collect();

        match missing.len() {
            0 => Ok(()),
            1 => Err(missing.remove(0)),
            _ => Err(ValidationError::Multiple(missing)),
        }
    }
}

impl Validate for UpstreamConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "upstream.host (ChatGPTHost)".into(),
            });
        }
        Ok(())
    }
}

impl Validate for SessionConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.mailbox_capacity == 0 {
            return Err(ValidationError::InvalidValue {
                field: "session.mailbox_capacity".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.expire_seconds > MAX_EXPIRE_SECONDS {
            return Err(ValidationError::InvalidValue {
                field: "session.expire_seconds (ConversationExpireSeconds)".into(),
                reason: format!("must be at most {MAX_EXPIRE_SECONDS}"),
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "session.sweep_interval_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}
