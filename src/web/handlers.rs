//! 路由处理函数

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream;
use serde::Deserialize;
use uuid::Uuid;

use crate::research::{EventSink, ResearchRequest};
use crate::web::{AppState, SESSION_HEADER};

const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchBody {
    #[serde(default)]
    pub query: String,
    #[serde(default, alias = "session_id")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// POST /api/research：SSE 流式返回研究过程事件
///
/// 控制器在独立任务中运行；SSE 流被丢弃（客户端断开）时 DropGuard 取消请求令牌，
/// 控制器随即终止上游进程并丢弃在途工具调用。
pub async fn api_research(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResearchBody>,
) -> Result<Response, (StatusCode, String)> {
    if state.shutdown.is_shutdown() {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "server is shutting down".to_string()));
    }
    let query = body.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "query must not be empty".to_string()));
    }
    let model = state.upstream.resolve_model(body.model.as_deref()).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("unsupported model: {}", body.model.as_deref().unwrap_or_default()),
        )
    })?;
    let session_id = match body.session_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => id.to_string(),
        None => Uuid::new_v4().to_string(),
    };
    let header_value = session_header(&session_id)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "invalid session id".to_string()))?;

    let request = ResearchRequest {
        query,
        session_id,
        model,
    };
    let (mut sink, rx) = EventSink::channel();
    let cancel = state.shutdown.request_token();
    let guard = cancel.clone().drop_guard();
    let controller = Arc::clone(&state.controller);
    tokio::spawn(async move {
        controller.run(request, &mut sink, cancel).await;
    });

    // complete 之后立即结束流
    let events = stream::unfold((rx, guard, false), |(mut rx, guard, done)| async move {
        if done {
            return None;
        }
        let event = rx.recv().await?;
        let terminal = event.is_terminal();
        Some((Ok::<_, Infallible>(Event::default().data(event.to_json())), (rx, guard, terminal)))
    });
    let sse = Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    );

    let mut response = sse.into_response();
    response.headers_mut().insert(SESSION_HEADER, header_value);
    Ok(response)
}

fn session_header(session_id: &str) -> Option<HeaderValue> {
    if session_id.len() > MAX_SESSION_ID_LEN || !session_id.chars().all(|c| c.is_ascii_graphic()) {
        return None;
    }
    HeaderValue::from_str(session_id).ok()
}

/// GET /api/session/:id/history：历史记录 + 统计（未知会话返回空）
pub async fn api_session_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let exchanges = state.store().get(&session_id).await.unwrap_or_default();
    let summary = state.store().summary(&session_id).await;
    Json(serde_json::json!({
        "session_id": session_id,
        "exchanges": exchanges,
        "summary": summary,
    }))
}

/// DELETE /api/session/:id：清空会话
pub async fn api_session_clear(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let cleared = state.store().clear(&session_id).await;
    Json(serde_json::json!({ "session_id": session_id, "cleared": cleared }))
}

pub async fn api_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let registry = state.registry();
    Json(serde_json::json!({
        "status": "ok",
        "tools": { "count": registry.len(), "names": registry.tool_names() },
    }))
}

/// GET /api/tools：工具元数据（不含密钥）
pub async fn api_tools(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry().summaries())
}
