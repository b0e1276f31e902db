use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::FusionError;

/// TTL applied when neither the platform nor the global settings name one.
pub const FALLBACK_CACHE_TTL_MINUTES: f64 = 10.0;

const PLATFORM_FIELD: &str = "platform";
const GLOBAL_SETTINGS: &str = "global_settings";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlatformType {
    Professional,
    Social,
    WeakSocial,
    Deterministic,
}

impl PlatformType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Professional => "professional",
            Self::Social => "social",
            Self::WeakSocial => "weak_social",
            Self::Deterministic => "deterministic",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "professional" => Some(Self::Professional),
            "social" => Some(Self::Social),
            "weak_social" => Some(Self::WeakSocial),
            "deterministic" => Some(Self::Deterministic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformConfig {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub platform_type: PlatformType,
    pub confidence_weight: f64,
    pub allowed_fields: Vec<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub cache_ttl_minutes: Option<f64>,
}

impl PlatformConfig {
    /// Validate one platform definition.
    ///
    /// # Errors
    /// Returns [`FusionError::ConfigValidation`] naming `name` and the violated rule.
    pub fn validate(&self, name: &str) -> Result<(), FusionError> {
        check_confidence_weight(name, Some(self.confidence_weight))?;
        check_allowed_fields(name, self.allowed_fields.iter().map(String::as_str))?;
        check_ttl(name, "cache_ttl_minutes", self.cache_ttl_minutes)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GlobalSettings {
    #[serde(default)]
    pub default_cache_ttl_minutes: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlatformsConfig {
    pub platforms: BTreeMap<String, PlatformConfig>,
    #[serde(default)]
    pub global_settings: GlobalSettings,
}

impl PlatformsConfig {
    /// Validate every platform, enabled or not. The first violation fails the whole set.
    ///
    /// # Errors
    /// Returns [`FusionError::ConfigValidation`] for the first invalid entry.
    pub fn validate(&self) -> Result<(), FusionError> {
        for (name, platform) in &self.platforms {
            platform.validate(name)?;
        }
        check_ttl(
            GLOBAL_SETTINGS,
            "default_cache_ttl_minutes",
            self.global_settings.default_cache_ttl_minutes,
        )
    }

    pub fn enabled(&self) -> impl Iterator<Item = (&String, &PlatformConfig)> {
        self.platforms.iter().filter(|(_, platform)| platform.enabled)
    }

    /// Platform TTL, then the global default, then [`FALLBACK_CACHE_TTL_MINUTES`].
    #[must_use]
    pub fn ttl_minutes_for(&self, platform: &PlatformConfig) -> f64 {
        platform
            .cache_ttl_minutes
            .or(self.global_settings.default_cache_ttl_minutes)
            .unwrap_or(FALLBACK_CACHE_TTL_MINUTES)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Self::Yaml,
            _ => Self::Json,
        }
    }
}

/// Parse and validate a platform configuration document.
///
/// The raw document is checked before typed deserialization so that a field
/// of the wrong shape is reported against its platform and rule.
///
/// # Errors
/// Returns [`FusionError::Config`] for unparseable input and
/// [`FusionError::ConfigValidation`] for rule violations.
pub fn parse_platforms_config(
    text: &str,
    format: ConfigFormat,
) -> Result<PlatformsConfig, FusionError> {
    let raw: Value = match format {
        ConfigFormat::Json => serde_json::from_str(text)
            .map_err(|err| FusionError::Config(format!("invalid JSON: {err}")))?,
        ConfigFormat::Yaml => serde_yaml::from_str(text)
            .map_err(|err| FusionError::Config(format!("invalid YAML: {err}")))?,
    };
    validate_raw(&raw)?;

    let config: PlatformsConfig = serde_json::from_value(raw)
        .map_err(|err| FusionError::Config(format!("invalid platform config: {err}")))?;
    config.validate()?;
    Ok(config)
}

/// # Errors
/// Returns [`FusionError::Config`] when the file cannot be read, plus every
/// error of [`parse_platforms_config`].
pub fn load_platforms_config(path: &Path) -> Result<PlatformsConfig, FusionError> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| FusionError::Config(format!("failed to read {}: {err}", path.display())))?;
    parse_platforms_config(&text, ConfigFormat::from_path(path))
}

fn validate_raw(raw: &Value) -> Result<(), FusionError> {
    let platforms = raw
        .get("platforms")
        .and_then(Value::as_object)
        .ok_or_else(|| FusionError::Config("`platforms` must be an object".to_string()))?;

    for (name, entry) in platforms {
        let Some(entry) = entry.as_object() else {
            return Err(FusionError::config_validation(name, "entry must be an object"));
        };

        if !entry.get("enabled").is_some_and(Value::is_boolean) {
            return Err(FusionError::config_validation(name, "enabled must be boolean"));
        }

        let platform_type = entry.get("type").and_then(Value::as_str);
        if platform_type.and_then(PlatformType::parse).is_none() {
            return Err(FusionError::config_validation(name, "invalid type"));
        }

        check_confidence_weight(name, entry.get("confidence_weight").and_then(Value::as_f64))?;

        let Some(fields) = entry.get("allowed_fields").and_then(Value::as_array) else {
            return Err(FusionError::config_validation(
                name,
                "allowed_fields must be a list including \"platform\"",
            ));
        };
        if fields.iter().any(|field| !field.is_string()) {
            return Err(FusionError::config_validation(
                name,
                "allowed_fields must contain only field names",
            ));
        }
        check_allowed_fields(name, fields.iter().filter_map(Value::as_str))?;

        if entry.get("base_url").is_some_and(|url| !url.is_null() && !url.is_string()) {
            return Err(FusionError::config_validation(name, "base_url must be a string"));
        }
        check_raw_ttl(name, "cache_ttl_minutes", entry.get("cache_ttl_minutes"))?;
    }

    if let Some(settings) = raw.get(GLOBAL_SETTINGS).filter(|value| !value.is_null()) {
        let Some(settings) = settings.as_object() else {
            return Err(FusionError::config_validation(GLOBAL_SETTINGS, "must be an object"));
        };
        check_raw_ttl(
            GLOBAL_SETTINGS,
            "default_cache_ttl_minutes",
            settings.get("default_cache_ttl_minutes"),
        )?;
    }

    Ok(())
}

fn check_confidence_weight(name: &str, weight: Option<f64>) -> Result<(), FusionError> {
    match weight {
        Some(weight) if weight.is_finite() && (0.0..=1.0).contains(&weight) => Ok(()),
        _ => Err(FusionError::config_validation(name, "confidence_weight must be 0-1")),
    }
}

fn check_allowed_fields<'a>(
    name: &str,
    mut fields: impl Iterator<Item = &'a str>,
) -> Result<(), FusionError> {
    if fields.any(|field| field == PLATFORM_FIELD) {
        Ok(())
    } else {
        Err(FusionError::config_validation(name, "allowed_fields must include \"platform\""))
    }
}

fn check_ttl(name: &str, field: &str, ttl: Option<f64>) -> Result<(), FusionError> {
    match ttl {
        Some(minutes) if !minutes.is_finite() || minutes <= 0.0 => Err(
            FusionError::config_validation(name, format!("{field} must be a positive number")),
        ),
        _ => Ok(()),
    }
}

fn check_raw_ttl(name: &str, field: &str, value: Option<&Value>) -> Result<(), FusionError> {
    match value.filter(|value| !value.is_null()) {
        None => Ok(()),
        Some(value) => match value.as_f64() {
            Some(minutes) => check_ttl(name, field, Some(minutes)),
            None => Err(FusionError::config_validation(
                name,
                format!("{field} must be a positive number"),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: &Value) -> Result<PlatformsConfig, FusionError> {
        parse_platforms_config(&value.to_string(), ConfigFormat::Json)
    }

    fn github(overrides: &Value) -> Value {
        let mut entry = json!({
            "enabled": true,
            "type": "professional",
            "confidence_weight": 0.8,
            "allowed_fields": ["platform", "username", "profile_url"],
            "base_url": "https://github.com"
        });
        if let (Some(target), Some(source)) = (entry.as_object_mut(), overrides.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        entry
    }

    fn expect_rejection(value: &Value, rule: &str) {
        match parse(value) {
            Err(FusionError::ConfigValidation { platform, reason }) => {
                assert_eq!(platform, "github");
                assert!(reason.contains(rule), "reason `{reason}` should mention `{rule}`");
            }
            other => panic!("expected validation error for `{rule}`, got {other:?}"),
        }
    }

    #[test]
    fn valid_config_parses_with_defaults() {
        let config = match parse(&json!({ "platforms": { "github": github(&json!({})) } })) {
            Ok(config) => config,
            Err(err) => panic!("config should validate: {err}"),
        };
        let platform = &config.platforms["github"];
        assert_eq!(platform.platform_type, PlatformType::Professional);
        assert_eq!(platform.cache_ttl_minutes, None);
        assert_eq!(config.global_settings, GlobalSettings::default());
        assert!((config.ttl_minutes_for(platform) - FALLBACK_CACHE_TTL_MINUTES).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_weight_above_one() {
        expect_rejection(
            &json!({ "platforms": { "github": github(&json!({"confidence_weight": 1.5})) } }),
            "confidence_weight",
        );
    }

    #[test]
    fn rejects_allowed_fields_without_platform() {
        expect_rejection(
            &json!({ "platforms": { "github": github(&json!({"allowed_fields": ["username"]})) } }),
            "allowed_fields",
        );
        expect_rejection(
            &json!({ "platforms": { "github": github(&json!({"allowed_fields": []})) } }),
            "allowed_fields",
        );
    }

    #[test]
    fn rejects_non_boolean_enabled_and_unknown_type() {
        expect_rejection(
            &json!({ "platforms": { "github": github(&json!({"enabled": "true"})) } }),
            "enabled must be boolean",
        );
        expect_rejection(
            &json!({ "platforms": { "github": github(&json!({"type": "forum"})) } }),
            "invalid type",
        );
    }

    #[test]
    fn disabled_platforms_are_still_validated() {
        expect_rejection(
            &json!({ "platforms": { "github": github(&json!({"enabled": false, "confidence_weight": -0.1})) } }),
            "confidence_weight",
        );
    }

    #[test]
    fn rejects_non_positive_ttls() {
        expect_rejection(
            &json!({ "platforms": { "github": github(&json!({"cache_ttl_minutes": 0})) } }),
            "cache_ttl_minutes",
        );

        match parse(&json!({
            "platforms": { "github": github(&json!({})) },
            "global_settings": { "default_cache_ttl_minutes": -5 }
        })) {
            Err(FusionError::ConfigValidation { platform, .. }) => {
                assert_eq!(platform, "global_settings");
            }
            other => panic!("expected global_settings rejection, got {other:?}"),
        }
    }

    #[test]
    fn ttl_resolution_prefers_platform_then_global() {
        let config = match parse(&json!({
            "platforms": {
                "github": github(&json!({"cache_ttl_minutes": 2.5})),
                "reddit": {
                    "enabled": true,
                    "type": "weak_social",
                    "confidence_weight": 0.3,
                    "allowed_fields": ["platform"]
                }
            },
            "global_settings": { "default_cache_ttl_minutes": 30 }
        })) {
            Ok(config) => config,
            Err(err) => panic!("config should validate: {err}"),
        };

        assert!((config.ttl_minutes_for(&config.platforms["github"]) - 2.5).abs() < f64::EPSILON);
        assert!((config.ttl_minutes_for(&config.platforms["reddit"]) - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn yaml_documents_are_accepted() {
        let yaml = "\
platforms:
  linkedin:
    enabled: true
    type: professional
    confidence_weight: 0.9
    allowed_fields: [platform, display_name]
    base_url: https://www.linkedin.com/in
global_settings:
  default_cache_ttl_minutes: 15
";
        let config = match parse_platforms_config(yaml, ConfigFormat::Yaml) {
            Ok(config) => config,
            Err(err) => panic!("yaml config should validate: {err}"),
        };
        assert_eq!(config.enabled().count(), 1);
        assert_eq!(config.global_settings.default_cache_ttl_minutes, Some(15.0));
    }

    #[test]
    fn missing_platforms_object_is_a_config_error() {
        assert!(matches!(parse(&json!({"global_settings": {}})), Err(FusionError::Config(_))));
        assert!(matches!(
            parse_platforms_config("{not json", ConfigFormat::Json),
            Err(FusionError::Config(_))
        ));
    }

    #[test]
    fn format_follows_file_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("p.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("p.yaml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("p.json")), ConfigFormat::Json);
    }

    #[test]
    fn programmatic_configs_share_the_same_rules() {
        let platform = PlatformConfig {
            enabled: true,
            platform_type: PlatformType::Social,
            confidence_weight: 0.5,
            allowed_fields: vec!["username".to_string()],
            base_url: None,
            cache_ttl_minutes: None,
        };
        assert!(matches!(
            platform.validate("mastodon"),
            Err(FusionError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn bundled_platform_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/platforms.json");
        let config = match load_platforms_config(&path) {
            Ok(config) => config,
            Err(err) => panic!("bundled config should validate: {err}"),
        };
        assert!(config.enabled().any(|(name, _)| name == "github"));
        assert!(config.platforms.get("mastodon").is_some_and(|platform| !platform.enabled));
    }
}
