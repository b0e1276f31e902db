use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use identity_fusion_api::{ErrorJournal, IdentityFusionApi, TelegramNotifier, API_CONTRACT_VERSION};
use identity_fusion_core::{
    load_platforms_config, FusionError, FusionResult, FusionStrategy, IdentitySalt,
    NormalizedSignal, RawSignal,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";

#[derive(Debug, Clone)]
struct ServiceState {
    api: IdentityFusionApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolRequest {
    tool: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "identity-fusion-service")]
#[command(about = "Local HTTP service for identity signal fusion")]
struct Args {
    #[arg(long, default_value = "./config/platforms.json")]
    config: PathBuf,
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,
    #[arg(long, default_value = "./logs")]
    logs_dir: PathBuf,
    /// Refuse to start when `IDENTITY_SALT` is unset instead of using the fallback salt.
    #[arg(long)]
    strict_salt: bool,
    #[arg(long, default_value_t = 10_000)]
    tool_timeout_ms: u64,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl From<FusionError> for ServiceError {
    fn from(err: FusionError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        ServiceError {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: err.to_string(),
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/normalize", post(normalize))
        .route("/v1/fuse", post(fuse))
        .route("/tool", post(tool))
        .route("/debug/platforms", get(debug_platforms))
        .with_state(state)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_api(args: &Args) -> Result<IdentityFusionApi> {
    let journal = ErrorJournal::new(&args.logs_dir);
    let salt = IdentitySalt::from_env(args.strict_salt).context("cannot resolve identity salt")?;

    let config = match load_platforms_config(&args.config) {
        Ok(config) => config,
        Err(err) => {
            journal.record(&err, &format!("Loading {}", args.config.display()));
            return Err(err)
                .with_context(|| format!("cannot load platform config {}", args.config.display()));
        }
    };

    let tool_timeout = Duration::from_millis(args.tool_timeout_ms);
    let mut builder = IdentityFusionApi::builder(config, salt)
        .with_journal(journal)
        .with_tool_timeout(tool_timeout);
    if let Some(telegram) = TelegramNotifier::from_env() {
        tracing::info!(timeout_ms = args.tool_timeout_ms, "telegram delivery enabled");
        builder = builder.with_notifier(Arc::new(telegram.with_timeout(tool_timeout)));
    }
    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let api = build_api(&args)?;

    tracing::info!(
        bind = %args.bind,
        config = %args.config.display(),
        tools = api.tool_names().len(),
        "identity fusion service starting"
    );
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app(ServiceState { api })).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn normalize(
    State(state): State<ServiceState>,
    Json(raw): Json<RawSignal>,
) -> Json<ServiceEnvelope<NormalizedSignal>> {
    Json(envelope(state.api.normalize(&raw)))
}

async fn fuse(
    State(state): State<ServiceState>,
    Json(strategy): Json<FusionStrategy>,
) -> Result<Json<ServiceEnvelope<FusionResult>>, ServiceError> {
    let result = state.api.fuse(&strategy)?;
    Ok(Json(envelope(result)))
}

async fn tool(
    State(state): State<ServiceState>,
    Json(request): Json<ToolRequest>,
) -> Result<Json<Value>, ServiceError> {
    let result = state.api.invoke_tool(&request.tool, request.args).await?;
    Ok(Json(result))
}

async fn debug_platforms(State(state): State<ServiceState>) -> Json<Vec<String>> {
    Json(state.api.platform_names())
}
