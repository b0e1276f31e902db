mod dispatcher;
mod journal;
mod notify;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use identity_fusion_cache::TtlCache;
use identity_fusion_core::{
    fuse, normalize, CandidateRecord, FusionError, FusionResult,
    FusionStrategy, IdentitySalt, NormalizedSignal, PlatformsConfig, RawSignal,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

pub use dispatcher::{LookupArgs, PlatformDirectory, PlatformLookup};
pub use journal::ErrorJournal;
pub use notify::{
    ChatTarget, Notifier, NotifyArgs, TelegramNotifier, DEFAULT_DELIVERY_TIMEOUT,
    TELEGRAM_TOKEN_ENV_VAR, TELEGRAM_TOOL,
};

pub const API_CONTRACT_VERSION: &str = "api.v1";
pub const NORMALIZE_TOOL: &str = "normalize_signal";
pub const FUSE_TOOL: &str = "fuse_confidence";
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct ApiInner {
    salt: IdentitySalt,
    directory: PlatformDirectory,
    notifiers: BTreeMap<String, Arc<dyn Notifier>>,
    journal: Option<ErrorJournal>,
    tool_timeout: Duration,
}

/// Entry point for collaborators: normalization, lookups, fusion, and the
/// named-tool surface used by the HTTP service.
#[derive(Debug, Clone)]
pub struct IdentityFusionApi {
    inner: Arc<ApiInner>,
}

#[derive(Debug)]
pub struct ApiBuilder {
    config: PlatformsConfig,
    salt: IdentitySalt,
    cache: Option<Arc<TtlCache<CandidateRecord>>>,
    notifiers: Vec<Arc<dyn Notifier>>,
    journal: Option<ErrorJournal>,
    tool_timeout: Duration,
}

impl ApiBuilder {
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<TtlCache<CandidateRecord>>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    #[must_use]
    pub fn with_journal(mut self, journal: ErrorJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    #[must_use]
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Validate the configuration and bind every enabled platform.
    ///
    /// # Errors
    /// Returns [`FusionError::ConfigValidation`] when any platform is invalid,
    /// and [`FusionError::Config`] when a notifier name collides with another tool.
    pub fn build(self) -> Result<IdentityFusionApi, FusionError> {
        let cache = self.cache.unwrap_or_else(|| Arc::new(TtlCache::new()));
        let directory = match PlatformDirectory::build(&self.config, cache) {
            Ok(directory) => directory,
            Err(err) => {
                tracing::error!(error = %err, "platform configuration rejected");
                if let Some(journal) = &self.journal {
                    journal.record(&err, "Config validation failed");
                }
                return Err(err);
            }
        };

        let mut notifiers = BTreeMap::new();
        for notifier in self.notifiers {
            let name = notifier.tool_name().to_string();
            if name == NORMALIZE_TOOL
                || name == FUSE_TOOL
                || directory.resolve_tool(&name).is_some()
                || notifiers.contains_key(&name)
            {
                return Err(FusionError::Config(format!("duplicate tool name: {name}")));
            }
            notifiers.insert(name, notifier);
        }

        if self.salt.is_fallback() {
            tracing::warn!("IDENTITY_SALT is not set; email digests use the built-in fallback salt");
        }

        Ok(IdentityFusionApi {
            inner: Arc::new(ApiInner {
                salt: self.salt,
                directory,
                notifiers,
                journal: self.journal,
                tool_timeout: self.tool_timeout,
            }),
        })
    }
}

impl IdentityFusionApi {
    #[must_use]
    pub fn builder(config: PlatformsConfig, salt: IdentitySalt) -> ApiBuilder {
        ApiBuilder {
            config,
            salt,
            cache: None,
            notifiers: Vec::new(),
            journal: None,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    #[must_use]
    pub fn normalize(&self, raw: &RawSignal) -> NormalizedSignal {
        normalize(raw, &self.inner.salt)
    }

    /// # Errors
    /// Returns [`FusionError::InvalidFusionInput`] for out-of-range inputs.
    pub fn fuse(&self, strategy: &FusionStrategy) -> Result<FusionResult, FusionError> {
        fuse(strategy)
    }

    /// # Errors
    /// See [`PlatformDirectory::lookup`].
    pub async fn lookup(
        &self,
        platform: &str,
        args: &LookupArgs,
    ) -> Result<CandidateRecord, FusionError> {
        let result = self.inner.directory.lookup(platform, args).await;
        if let Err(err) = &result {
            if !err.is_client_error() {
                self.journal(err, &format!("Platform lookup failed: {platform}"));
            }
        }
        result
    }

    /// Every configured platform name, enabled or not.
    #[must_use]
    pub fn platform_names(&self) -> Vec<String> {
        self.inner.directory.configured_platforms().to_vec()
    }

    #[must_use]
    pub fn directory(&self) -> &PlatformDirectory {
        &self.inner.directory
    }

    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        let mut names = vec![NORMALIZE_TOOL.to_string(), FUSE_TOOL.to_string()];
        names.extend(self.inner.directory.enabled().map(|lookup| lookup.tool_name().to_string()));
        names.extend(self.inner.notifiers.keys().cloned());
        names.sort_unstable();
        names
    }

    /// Run a named tool with JSON arguments, bounded by the tool timeout.
    /// `null` arguments are treated as an empty object.
    ///
    /// # Errors
    /// Returns [`FusionError::UnknownTool`] for unregistered names,
    /// [`FusionError::InvalidArguments`] for malformed arguments,
    /// [`FusionError::Timeout`] when the tool exceeds its budget, and any
    /// error the tool itself reports.
    pub async fn invoke_tool(&self, tool: &str, args: Value) -> Result<Value, FusionError> {
        let timeout = self.inner.tool_timeout;
        let result = match tokio::time::timeout(timeout, self.dispatch(tool, args)).await {
            Ok(result) => result,
            Err(_) => Err(FusionError::Timeout {
                operation: tool.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match &result {
            Ok(_) => tracing::debug!(tool, "tool completed"),
            Err(err) if err.is_client_error() => {
                tracing::warn!(tool, error = %err, "tool request rejected");
            }
            // Already logged and journaled by `lookup` with its platform.
            Err(err @ FusionError::LookupFailure { .. }) => {
                tracing::debug!(tool, error = %err, "lookup tool failed");
            }
            Err(err) => {
                tracing::error!(tool, error = %err, "tool failed");
                self.journal(err, &format!("Tool failed: {tool}"));
            }
        }
        result
    }

    async fn dispatch(&self, tool: &str, args: Value) -> Result<Value, FusionError> {
        match tool {
            NORMALIZE_TOOL => {
                let raw: RawSignal = parse_args(tool, args)?;
                to_json(&self.normalize(&raw))
            }
            FUSE_TOOL => {
                let strategy: FusionStrategy = parse_args(tool, args)?;
                let result = self.fuse(&strategy).map_err(|err| FusionError::InvalidArguments {
                    tool: tool.to_string(),
                    reason: err.to_string(),
                })?;
                to_json(&result)
            }
            _ => {
                if let Some(lookup) = self.inner.directory.resolve_tool(tool) {
                    let lookup_args: LookupArgs = parse_args(tool, args)?;
                    let record = self.lookup(lookup.name(), &lookup_args).await?;
                    return Ok(Value::Object(record));
                }
                if let Some(notifier) = self.inner.notifiers.get(tool) {
                    let notify_args: NotifyArgs = parse_args(tool, args)?;
                    notifier.deliver(&notify_args).await?;
                    return Ok(serde_json::json!({ "status": "sent" }));
                }
                Err(FusionError::UnknownTool(tool.to_string()))
            }
        }
    }

    fn journal(&self, error: &FusionError, context: &str) {
        if let Some(journal) = &self.inner.journal {
            journal.record(error, context);
        }
    }
}

fn parse_args<T>(tool: &str, args: Value) -> Result<T, FusionError>
where
    T: DeserializeOwned,
{
    let args = if args.is_null() { Value::Object(Map::new()) } else { args };
    serde_json::from_value(args).map_err(|err| FusionError::InvalidArguments {
        tool: tool.to_string(),
        reason: err.to_string(),
    })
}

fn to_json<T>(value: &T) -> Result<Value, FusionError>
where
    T: Serialize,
{
    serde_json::to_value(value).map_err(|err| FusionError::Internal(err.to_string()))
}
