//! HTTP 接口：研究请求 SSE 流 + 会话历史 / 清空 + 健康检查 + 工具列表

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::config::{AppConfig, UpstreamSection};
use crate::core::ShutdownManager;
use crate::memory::{InMemorySessionStore, SessionStore};
use crate::research::SessionController;
use crate::tools::{Dispatcher, HttpTransport, ToolRegistry, ToolScheduler};
use crate::upstream::ReasoningProcess;

pub const SESSION_HEADER: &str = "x-session-id";

/// 所有请求共享的只读状态
pub struct AppState {
    pub controller: Arc<SessionController>,
    pub upstream: UpstreamSection,
    /// 进程级关闭信号，每个请求派生子令牌
    pub shutdown: Arc<ShutdownManager>,
}

impl AppState {
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.controller.dispatcher().registry()
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        self.controller.store()
    }
}

/// 由配置组装控制器与共享状态；密钥按工具定义从环境变量读取
pub fn build_state(
    config: &AppConfig,
    transport: Arc<dyn HttpTransport>,
    upstream: Arc<dyn ReasoningProcess>,
    shutdown: Arc<ShutdownManager>,
) -> Arc<AppState> {
    let registry = Arc::new(ToolRegistry::from_env(config.tools.effective_definitions()));
    build_state_with_registry(config, registry, transport, upstream, shutdown)
}

pub fn build_state_with_registry(
    config: &AppConfig,
    registry: Arc<ToolRegistry>,
    transport: Arc<dyn HttpTransport>,
    upstream: Arc<dyn ReasoningProcess>,
    shutdown: Arc<ShutdownManager>,
) -> Arc<AppState> {
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        transport,
        Duration::from_secs(config.tools.attempt_timeout_secs),
        config.tools.output_max_chars,
    ));
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new(
        config.session.max_exchanges,
        config.session.ttl_hours,
    ));
    let controller = SessionController::new(
        dispatcher,
        ToolScheduler::new(config.tools.max_concurrency),
        store,
        upstream,
        config.controller_settings(),
    );
    Arc::new(AppState {
        controller: Arc::new(controller),
        upstream: config.upstream.clone(),
        shutdown,
    })
}

pub fn router(state: Arc<AppState>, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/api/research", post(handlers::api_research))
        .route("/api/session/:id/history", get(handlers::api_session_history))
        .route("/api/session/:id", delete(handlers::api_session_clear))
        .route("/api/health", get(handlers::api_health))
        .route("/api/tools", get(handlers::api_tools))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "invalid CORS origin ignored");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([HeaderName::from_static(SESSION_HEADER)])
}
