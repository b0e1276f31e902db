use std::fmt::{Debug, Formatter};
use std::time::Duration;

use async_trait::async_trait;
use identity_fusion_core::FusionError;
use serde::{Deserialize, Serialize};

pub const TELEGRAM_TOOL: &str = "telegram_notify";
pub const TELEGRAM_TOKEN_ENV_VAR: &str = "TELEGRAM_TOKEN";
const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// A chat addressed by numeric id or by name (`@channel`, an email address).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ChatTarget {
    Id(i64),
    Name(String),
}

impl From<i64> for ChatTarget {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for ChatTarget {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifyArgs {
    #[serde(alias = "chat_id", alias = "chatId", alias = "to")]
    pub target: ChatTarget,
    #[serde(alias = "body")]
    pub message: String,
}

/// Side-effect delivery of a decision to a person or channel.
#[async_trait]
pub trait Notifier: Debug + Send + Sync {
    /// Name under which the tool registry exposes this notifier.
    fn tool_name(&self) -> &str;

    async fn deliver(&self, args: &NotifyArgs) -> Result<(), FusionError>;
}

/// Delivers through the Telegram Bot API `sendMessage` method.
/// Each request is bounded by the delivery timeout.
#[derive(Clone)]
pub struct TelegramNotifier {
    token: String,
    api_base: String,
    timeout: Duration,
    agent: ureq::Agent,
}

impl TelegramNotifier {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: TELEGRAM_API_BASE.to_string(),
            timeout: DEFAULT_DELIVERY_TIMEOUT,
            agent: build_agent(DEFAULT_DELIVERY_TIMEOUT),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.agent = build_agent(timeout);
        self
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// A notifier keyed by `TELEGRAM_TOKEN`, if it is set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var(TELEGRAM_TOKEN_ENV_VAR)
            .ok()
            .filter(|token| !token.is_empty())
            .map(Self::new)
    }

    fn failure(reason: impl Into<String>) -> FusionError {
        FusionError::DeliveryFailure { tool: TELEGRAM_TOOL.to_string(), reason: reason.into() }
    }
}

impl Debug for TelegramNotifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(timeout).build()
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn tool_name(&self) -> &str {
        TELEGRAM_TOOL
    }

    async fn deliver(&self, args: &NotifyArgs) -> Result<(), FusionError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let payload = serde_json::json!({ "chat_id": args.target, "text": args.message });

        let agent = self.agent.clone();
        let response = tokio::task::spawn_blocking(move || agent.post(&url).send_json(payload))
            .await
            .map_err(|err| Self::failure(format!("delivery task failed: {err}")))?;

        // The request URL embeds the bot token, so ureq's own messages are not surfaced.
        match response {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => {
                Err(Self::failure(format!("telegram API responded with status {code}")))
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(Self::failure(format!("transport error: {}", transport.kind())))
            }
        }
    }
}
