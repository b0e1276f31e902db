use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use identity_fusion_cache::{cache_key, InFlight, TtlCache};
use identity_fusion_core::{
    filter_fields, CandidateRecord, FusionError, PlatformConfig, PlatformsConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const LOOKUP_TOOL_SUFFIX: &str = "_lookup";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LookupArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
}

impl LookupArgs {
    #[must_use]
    pub fn username(username: impl Into<String>) -> Self {
        Self { username: Some(username.into()), profile_url: None }
    }
}

/// One enabled platform bound to its validated configuration.
#[derive(Debug, Clone)]
pub struct PlatformLookup {
    name: String,
    tool_name: String,
    config: PlatformConfig,
    ttl_minutes: f64,
}

impl PlatformLookup {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    #[must_use]
    pub fn ttl_minutes(&self) -> f64 {
        self.ttl_minutes
    }

    /// Build the candidate record for `args` and apply the platform's allow-list.
    /// Without a `base_url` no profile URL is built; an explicit one is still used.
    #[must_use]
    pub fn synthesize(&self, args: &LookupArgs) -> CandidateRecord {
        let mut data = CandidateRecord::new();
        data.insert("platform".to_string(), Value::String(self.name.clone()));
        data.insert("confidence_weight".to_string(), Value::from(self.config.confidence_weight));

        let profile_url = non_empty(args.profile_url.as_deref());
        if let Some(username) = non_empty(args.username.as_deref()) {
            data.insert("username".to_string(), Value::String(username.to_string()));
            data.insert("display_name".to_string(), Value::String(username.to_string()));
            if let Some(base_url) = &self.config.base_url {
                data.insert(
                    "profile_url".to_string(),
                    Value::String(format!("{base_url}/{username}")),
                );
            }
        }

        if let Some(profile_url) = profile_url {
            data.insert("profile_url".to_string(), Value::String(profile_url.to_string()));
        }

        filter_fields(&data, &self.config.allowed_fields)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

/// Lookup operations for every enabled platform, sharing one result cache.
#[derive(Debug)]
pub struct PlatformDirectory {
    lookups: BTreeMap<String, PlatformLookup>,
    configured: Vec<String>,
    cache: Arc<TtlCache<CandidateRecord>>,
    in_flight: InFlight,
    synthesized: AtomicU64,
}

impl PlatformDirectory {
    /// Validate `config` and bind one lookup per enabled platform.
    ///
    /// # Errors
    /// Returns [`FusionError::ConfigValidation`] when any platform is invalid;
    /// no lookup is built in that case.
    pub fn build(
        config: &PlatformsConfig,
        cache: Arc<TtlCache<CandidateRecord>>,
    ) -> Result<Self, FusionError> {
        config.validate()?;

        let lookups = config
            .enabled()
            .map(|(name, platform)| {
                let lookup = PlatformLookup {
                    name: name.clone(),
                    tool_name: format!("{name}{LOOKUP_TOOL_SUFFIX}"),
                    config: platform.clone(),
                    ttl_minutes: config.ttl_minutes_for(platform),
                };
                (name.clone(), lookup)
            })
            .collect::<BTreeMap<_, _>>();

        tracing::info!(
            configured = config.platforms.len(),
            enabled = lookups.len(),
            "platform lookups registered"
        );

        Ok(Self {
            lookups,
            configured: config.platforms.keys().cloned().collect(),
            cache,
            in_flight: InFlight::new(),
            synthesized: AtomicU64::new(0),
        })
    }

    /// Every configured platform name, enabled or not.
    #[must_use]
    pub fn configured_platforms(&self) -> &[String] {
        &self.configured
    }

    pub fn enabled(&self) -> impl Iterator<Item = &PlatformLookup> {
        self.lookups.values()
    }

    #[must_use]
    pub fn get(&self, platform: &str) -> Option<&PlatformLookup> {
        self.lookups.get(platform)
    }

    /// Resolve a `{platform}_lookup` tool name.
    #[must_use]
    pub fn resolve_tool(&self, tool: &str) -> Option<&PlatformLookup> {
        tool.strip_suffix(LOOKUP_TOOL_SUFFIX).and_then(|platform| self.get(platform))
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<TtlCache<CandidateRecord>> {
        &self.cache
    }

    /// Records built from scratch since start-up, i.e. cache misses that ran synthesis.
    #[must_use]
    pub fn synthesized(&self) -> u64 {
        self.synthesized.load(Ordering::Relaxed)
    }

    /// Look up a candidate record, serving it from the cache when a live entry exists.
    ///
    /// # Errors
    /// Returns [`FusionError::UnknownPlatform`] for platforms that are not
    /// enabled, and [`FusionError::LookupFailure`] when the cache key cannot be derived.
    pub async fn lookup(
        &self,
        platform: &str,
        args: &LookupArgs,
    ) -> Result<CandidateRecord, FusionError> {
        let lookup = self
            .get(platform)
            .ok_or_else(|| FusionError::UnknownPlatform(platform.to_string()))?;

        let result = self.lookup_with(lookup, args).await;
        if let Err(err) = &result {
            tracing::error!(platform, error = %err, "platform lookup failed");
        }
        result
    }

    async fn lookup_with(
        &self,
        lookup: &PlatformLookup,
        args: &LookupArgs,
    ) -> Result<CandidateRecord, FusionError> {
        let key = cache_key(&lookup.tool_name, args).map_err(|err| FusionError::LookupFailure {
            platform: lookup.name.clone(),
            reason: format!("cannot derive cache key: {err}"),
        })?;

        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(platform = %lookup.name, "lookup cache hit");
            return Ok(cached);
        }

        let _flight = self.in_flight.acquire(&key).await;
        // A concurrent caller may have filled the entry while we waited.
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(platform = %lookup.name, "lookup cache filled while waiting");
            return Ok(cached);
        }

        let record = lookup.synthesize(args);
        let synthesized = self.synthesized.fetch_add(1, Ordering::Relaxed) + 1;
        self.cache.set(key, record.clone(), lookup.ttl_minutes);
        tracing::debug!(
            platform = %lookup.name,
            ttl_minutes = lookup.ttl_minutes,
            synthesized,
            "lookup cache miss; record stored"
        );
        Ok(record)
    }
}
