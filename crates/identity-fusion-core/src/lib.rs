mod config;
mod fusion;
mod normalize;
mod privacy;

pub use config::{
    load_platforms_config, parse_platforms_config, ConfigFormat, GlobalSettings, PlatformConfig,
    PlatformType, PlatformsConfig, FALLBACK_CACHE_TTL_MINUTES,
};
pub use fusion::{
    age_penalty, fuse, fuse_deterministic_override, fuse_dual_estimator, Decision,
    DeterministicOverrideInput, DualEstimatorInput, FusionComponents, FusionResult, FusionStrategy,
    AGE_PENALTY_FACTOR, AGE_PENALTY_THRESHOLD_YEARS, COUNTER_EVIDENCE_PENALTY,
    DEFAULT_PLATFORM_WEIGHT,
};
pub use normalize::{
    hash_email, normalize, IdentitySalt, NormalizedSignal, RawSignal, SaltError, FALLBACK_SALT,
    SALT_ENV_VAR,
};
pub use privacy::{filter_fields, CandidateRecord};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FusionError {
    #[error("config validation error: platform {platform}: {reason}")]
    ConfigValidation { platform: String, reason: String },
    #[error("config error: {0}")]
    Config(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("unknown or disabled platform: {0}")]
    UnknownPlatform(String),
    #[error("lookup failed for platform {platform}: {reason}")]
    LookupFailure { platform: String, reason: String },
    #[error("delivery failed for tool {tool}: {reason}")]
    DeliveryFailure { tool: String, reason: String },
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
    #[error("invalid fusion input {field}: {reason}")]
    InvalidFusionInput { field: String, reason: String },
    #[error("invalid arguments for tool {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("internal error: {0}")]
    Internal(String),
}

impl FusionError {
    /// Errors caused by the caller's request rather than by the engine.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownTool(_)
                | Self::UnknownPlatform(_)
                | Self::InvalidFusionInput { .. }
                | Self::InvalidArguments { .. }
        )
    }

    pub(crate) fn config_validation(platform: &str, reason: impl Into<String>) -> Self {
        Self::ConfigValidation { platform: platform.to_string(), reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tool_message_names_the_tool() {
        let err = FusionError::UnknownTool("linkedin_lookup".to_string());
        assert_eq!(err.to_string(), "Unknown tool: linkedin_lookup");
        assert!(err.is_client_error());
    }

    #[test]
    fn lookup_and_delivery_failures_are_not_client_errors() {
        let lookup = FusionError::LookupFailure {
            platform: "github".to_string(),
            reason: "no base_url".to_string(),
        };
        let delivery = FusionError::DeliveryFailure {
            tool: "telegram_notify".to_string(),
            reason: "401".to_string(),
        };
        assert!(!lookup.is_client_error());
        assert!(!delivery.is_client_error());
        assert!(lookup.to_string().contains("github"));
    }

    #[test]
    fn invalid_fusion_input_is_a_client_error() {
        let err = FusionError::InvalidFusionInput {
            field: "det_confidence".to_string(),
            reason: "must be within [0, 1], got 1.7".to_string(),
        };
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "invalid fusion input det_confidence: must be within [0, 1], got 1.7");
    }
}
